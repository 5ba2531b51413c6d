//! The per-tenant policy pipeline.
//!
//! Every inbound chat event runs the same ordered chain: activity tracking,
//! currency accrual, banned words, the moderation rule chain, trivia
//! answers, command dispatch, giveaway entry, keyword triggers. The order
//! is contractual. A moderation hit or a handled command halts the later
//! steps; nothing in here panics the worker — step failures are logged with
//! the event identity, counted, and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use ember_ai::ToxicSeverity;
use ember_core::types::{BotEventKind, ChatAction, ChatEvent, TenantId};
use ember_platforms::PlatformSession;
use ember_store::{EntryOutcome, ModAction, RuleType, Severity};

use crate::commands::{self, CommandDeps};
use crate::context::WorkerContext;
use crate::games::GameEngine;
use crate::moderation;

/// Timeout handed out by the banned-word step.
const BANNED_WORD_TIMEOUT_SECS: u32 = 300;

/// What one processed event produced.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    pub actions: Vec<ChatAction>,
    /// A chat keyword matched — the worker should generate and post an AI
    /// fact (asynchronously; the pipeline itself never waits on the LLM).
    pub fact_requested: bool,
}

/// Per-worker pipeline state. Driven serially by the worker's executor
/// task, which is what guarantees per-tenant ordering.
pub struct Pipeline {
    tenant: TenantId,
    channel_display: String,
    ctx: Arc<WorkerContext>,
    spam: moderation::SpamTracker,
    games: GameEngine,
    command_cooldowns: HashMap<String, Instant>,
    spotify: Option<Arc<dyn PlatformSession>>,
    /// Unclassified step failures since start (surfaced on status).
    error_count: u64,
}

impl Pipeline {
    pub fn new(ctx: Arc<WorkerContext>, tenant: TenantId, channel_display: String) -> Self {
        Self {
            tenant,
            channel_display,
            ctx,
            spam: moderation::SpamTracker::new(),
            games: GameEngine::new(),
            command_cooldowns: HashMap::new(),
            spotify: None,
            error_count: 0,
        }
    }

    /// Attach the tenant's Spotify session (feeds `!song`).
    pub fn set_spotify(&mut self, session: Option<Arc<dyn PlatformSession>>) {
        self.spotify = session;
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Periodic maintenance: expire spam windows, trivia, duels.
    pub fn sweep(&mut self) {
        self.spam.sweep();
        self.games.sweep();
    }

    /// Run the full chain for one event.
    pub async fn process(&mut self, event: &ChatEvent) -> PipelineOutput {
        let mut output = PipelineOutput::default();

        // 1. Chat activity (non-blocking for the chat flow: failures only log).
        let uptime = self.track_activity(event);

        // 2. Currency accrual.
        self.accrue_currency(event);

        // 3. Banned words — hit aborts everything below.
        if let Some(word) = self.banned_word_check(event) {
            debug!(tenant = %self.tenant, username = %event.username, %word, "banned word hit");
            output.actions.push(ChatAction::Timeout {
                username: event.username.clone(),
                seconds: BANNED_WORD_TIMEOUT_SECS,
                reason: "Auto-moderation".to_string(),
            });
            self.emit_moderation(event, "timeout", "banned_words");
            return output;
        }

        // 4. Moderation rule chain — first violating rule wins.
        if let Some(actions) = self.moderation_chain(event).await {
            let terminal = actions
                .iter()
                .any(|a| matches!(a, ChatAction::Timeout { .. } | ChatAction::Ban { .. }));
            output.actions.extend(actions);
            if terminal {
                return output;
            }
        }

        // 5. Trivia answers.
        if self.games.has_active_trivia(&event.username, event.platform)
            && self
                .games
                .try_trivia_answer(&event.username, event.platform, &event.text)
        {
            output.actions.extend(self.award_trivia(event));
            return output;
        }

        // 6. Command dispatch.
        if event.text.starts_with('!') {
            let mut deps = CommandDeps {
                ctx: &self.ctx,
                tenant: &self.tenant,
                channel_display: &self.channel_display,
                games: &mut self.games,
                command_cooldowns: &mut self.command_cooldowns,
                uptime,
                spotify: self.spotify.clone(),
            };
            if let Some(actions) = commands::dispatch(&mut deps, event).await {
                output.actions.extend(actions);
                return output;
            }
        }

        // 7. Giveaway entry.
        output.actions.extend(self.giveaway_entry(event));

        // 8. Keyword trigger.
        output.fact_requested = self.keyword_hit(event);

        output
    }

    // --- steps ------------------------------------------------------------

    /// Append chat activity; returns the session uptime for `{uptime}`.
    fn track_activity(&mut self, event: &ChatEvent) -> Option<Duration> {
        match self.ctx.stats.open_session(&self.tenant, event.platform) {
            Ok(Some(session)) => {
                if let Err(e) = self
                    .ctx
                    .stats
                    .track_chat_message(&session.id, &event.username)
                {
                    self.step_failed(event, "activity", &e.to_string());
                }
                self.ctx.bus.emit(
                    &self.tenant,
                    BotEventKind::NewMessage,
                    serde_json::json!({
                        "platform": event.platform,
                        "username": event.username,
                        "text": event.text,
                    }),
                );
                (chrono::Utc::now() - session.started_at).to_std().ok()
            }
            Ok(None) => None,
            Err(e) => {
                self.step_failed(event, "activity", &e.to_string());
                None
            }
        }
    }

    fn accrue_currency(&mut self, event: &ChatEvent) {
        match self.ctx.store.currency_settings(&self.tenant) {
            Ok(settings) if settings.enabled && settings.earn_per_message > 0 => {
                if let Err(e) = self.ctx.store.credit(
                    &self.tenant,
                    &event.username,
                    event.platform,
                    settings.earn_per_message,
                    "chat",
                    "earn",
                ) {
                    self.step_failed(event, "currency", &e.to_string());
                }
            }
            Ok(_) => {}
            Err(e) => self.step_failed(event, "currency", &e.to_string()),
        }
    }

    fn banned_word_check(&mut self, event: &ChatEvent) -> Option<String> {
        match self.ctx.store.bot_config(&self.tenant) {
            Ok(config) => moderation::banned_word_hit(&event.text, &config.banned_words),
            Err(e) => {
                self.step_failed(event, "banned_words", &e.to_string());
                None
            }
        }
    }

    /// Evaluate enabled rules in contract order; map the first violation to
    /// its configured action.
    async fn moderation_chain(&mut self, event: &ChatEvent) -> Option<Vec<ChatAction>> {
        let rules = match self.ctx.store.enabled_rules(&self.tenant) {
            Ok(rules) => rules,
            Err(e) => {
                self.step_failed(event, "moderation", &e.to_string());
                return None;
            }
        };

        for rule in rules {
            let violated = match rule.rule_type {
                RuleType::Toxic => self.toxic_violation(event, rule.severity_threshold).await,
                RuleType::Spam => self.spam.observe(&event.username, &event.text),
                RuleType::Links => {
                    let whitelist = self
                        .ctx
                        .store
                        .link_whitelist(&self.tenant)
                        .unwrap_or_default();
                    moderation::link_violation(&event.text, &whitelist).is_some()
                }
                RuleType::Caps => moderation::caps_violation(&event.text),
                RuleType::Symbols => moderation::symbols_violation(&event.text),
            };
            if !violated {
                continue;
            }

            let rule_name = rule.rule_type.as_str();
            return match rule.action {
                ModAction::Allow => None,
                ModAction::Warn => {
                    self.emit_moderation(event, "warn", rule_name);
                    Some(vec![ChatAction::Reply {
                        to: event.username.clone(),
                        text: warn_text(rule.rule_type),
                    }])
                }
                ModAction::Timeout => {
                    self.emit_moderation(event, "timeout", rule_name);
                    Some(vec![ChatAction::Timeout {
                        username: event.username.clone(),
                        seconds: rule.timeout_seconds.max(1),
                        reason: "Auto-moderation".to_string(),
                    }])
                }
                ModAction::Ban => {
                    self.emit_moderation(event, "ban", rule_name);
                    Some(vec![ChatAction::Ban {
                        username: event.username.clone(),
                        reason: "Auto-moderation".to_string(),
                    }])
                }
            };
        }
        None
    }

    async fn toxic_violation(&mut self, event: &ChatEvent, threshold: Severity) -> bool {
        match self.ctx.toxicity.classify(&event.text).await {
            Ok(Some(verdict)) => {
                verdict.flagged && severity_rank(verdict.severity) >= threshold_rank(threshold)
            }
            Ok(None) => false,
            Err(e) => {
                // Classifier down ≠ message toxic. Fail open, count it.
                self.step_failed(event, "toxic", &e.to_string());
                false
            }
        }
    }

    fn award_trivia(&mut self, event: &ChatEvent) -> Vec<ChatAction> {
        let points = self
            .ctx
            .store
            .game_settings(&self.tenant)
            .map(|s| s.trivia_points)
            .unwrap_or(50);
        if let Err(e) = self.ctx.store.credit(
            &self.tenant,
            &event.username,
            event.platform,
            points,
            "trivia correct",
            "game",
        ) {
            self.step_failed(event, "trivia", &e.to_string());
        }
        vec![ChatAction::Reply {
            to: event.username.clone(),
            text: format!("✅ Correct! +{} points", points),
        }]
    }

    fn giveaway_entry(&mut self, event: &ChatEvent) -> Vec<ChatAction> {
        let giveaway = match self.ctx.store.active_giveaway(&self.tenant) {
            Ok(Some(g)) => g,
            Ok(None) => return vec![],
            Err(e) => {
                self.step_failed(event, "giveaway", &e.to_string());
                return vec![];
            }
        };
        if event.text.trim().to_lowercase() != giveaway.keyword {
            return vec![];
        }

        match self.ctx.store.enter_giveaway(
            &giveaway,
            &event.username,
            event.platform,
            event.tags.is_subscriber,
        ) {
            Ok(EntryOutcome::Entered) => {
                self.ctx.bus.emit(
                    &self.tenant,
                    BotEventKind::GiveawayEntry,
                    serde_json::json!({
                        "giveaway_id": giveaway.id,
                        "title": giveaway.title,
                        "username": event.username,
                        "platform": event.platform,
                    }),
                );
                vec![ChatAction::Reply {
                    to: event.username.clone(),
                    text: format!("🎉 you're entered in \"{}\"!", giveaway.title),
                }]
            }
            Ok(EntryOutcome::AlreadyEntered) => vec![],
            Ok(EntryOutcome::SubscriberOnly) => vec![ChatAction::Reply {
                to: event.username.clone(),
                text: "this giveaway is subscribers-only".to_string(),
            }],
            Err(e) => {
                self.step_failed(event, "giveaway", &e.to_string());
                vec![]
            }
        }
    }

    fn keyword_hit(&mut self, event: &ChatEvent) -> bool {
        match self.ctx.store.bot_config(&self.tenant) {
            Ok(config) => {
                let text = event.text.to_lowercase();
                config
                    .chat_keywords
                    .iter()
                    .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
            }
            Err(e) => {
                self.step_failed(event, "keyword", &e.to_string());
                false
            }
        }
    }

    // --- helpers ----------------------------------------------------------

    fn emit_moderation(&self, event: &ChatEvent, action: &str, rule: &str) {
        self.ctx.bus.emit(
            &self.tenant,
            BotEventKind::ModerationAction,
            serde_json::json!({
                "action": action,
                "ruleTriggered": rule,
                "username": event.username,
                "platform": event.platform,
            }),
        );
    }

    fn step_failed(&mut self, event: &ChatEvent, step: &str, error: &str) {
        self.error_count += 1;
        warn!(
            tenant = %self.tenant,
            platform = %event.platform,
            username = %event.username,
            step,
            error,
            "pipeline step failed, skipping"
        );
    }
}

fn warn_text(rule: RuleType) -> String {
    match rule {
        RuleType::Toxic => "please keep chat friendly".to_string(),
        RuleType::Spam => "please don't spam".to_string(),
        RuleType::Links => "links aren't allowed here".to_string(),
        RuleType::Caps => "please ease up on the caps".to_string(),
        RuleType::Symbols => "please ease up on the symbols".to_string(),
    }
}

fn severity_rank(s: ToxicSeverity) -> u8 {
    match s {
        ToxicSeverity::Low => 0,
        ToxicSeverity::Medium => 1,
        ToxicSeverity::High => 2,
    }
}

fn threshold_rank(s: Severity) -> u8 {
    match s {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
    }
}
