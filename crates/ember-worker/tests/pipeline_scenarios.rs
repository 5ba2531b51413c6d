//! End-to-end pipeline scenarios over in-memory stores: banned words, the
//! link filter, short-circuiting, currency accrual, giveaways, keyword
//! triggers, and custom command templating.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use ember_ai::{FactGenerator, GenerateRequest, LlmProvider, ProviderError, ToxicityClassifier};
use ember_core::crypto::TokenCipher;
use ember_core::types::{
    BotEventKind, ChatAction, ChatEvent, ChatTags, PermissionLevel, Platform, TenantId,
};
use ember_guard::{CircuitBreaker, QuotaTracker};
use ember_queue::MessageQueue;
use ember_stats::StatsAggregator;
use ember_store::{BotConfig, ModAction, ModerationRule, RuleType, Severity, Store};
use ember_tokens::{GuardHooks, TokenManager, TokenStore};
use ember_worker::pipeline::Pipeline;
use ember_worker::{EventBus, WorkerContext};

struct CannedProvider;

#[async_trait]
impl LlmProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }
    async fn generate(&self, _req: &GenerateRequest) -> Result<String, ProviderError> {
        Ok("Here is a fact.".to_string())
    }
}

fn context() -> Arc<WorkerContext> {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let cipher = Arc::new(TokenCipher::from_secret("0123456789abcdef0123456789abcdef"));
    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        Arc::new(TokenStore::open_in_memory().unwrap()),
        cipher,
        Default::default(),
        GuardHooks::noop(),
    ));
    Arc::new(WorkerContext {
        store: store.clone(),
        stats: Arc::new(StatsAggregator::open_in_memory().unwrap()),
        queue: Arc::new(MessageQueue::open_in_memory().unwrap()),
        breaker: Arc::new(CircuitBreaker::new()),
        quota: Arc::new(QuotaTracker::new()),
        bus: Arc::new(EventBus::new(store)),
        tokens,
        facts: Arc::new(FactGenerator::new(Arc::new(CannedProvider))),
        toxicity: Arc::new(ToxicityClassifier::new(None)),
        adapters: HashMap::new(),
    })
}

fn tenant(ctx: &WorkerContext) -> TenantId {
    let id = TenantId::from("t1");
    ctx.store.create_tenant(&id, "Emberfall").unwrap();
    id
}

fn event(text: &str) -> ChatEvent {
    event_from("alice", text)
}

fn event_from(username: &str, text: &str) -> ChatEvent {
    ChatEvent {
        platform: Platform::Twitch,
        channel: "emberfall".to_string(),
        username: username.to_string(),
        text: text.to_string(),
        tags: ChatTags::default(),
        arrived_at: Utc::now(),
    }
}

#[tokio::test]
async fn banned_word_times_out_and_aborts_everything_else() {
    let ctx = context();
    let tenant = tenant(&ctx);

    let mut config = BotConfig::defaults(tenant.clone());
    config.banned_words = vec!["badword".to_string()];
    config.chat_keywords = vec!["hello".to_string()];
    ctx.store.save_bot_config(&config).unwrap();
    // a custom command that would also match
    ctx.store
        .create_command(&tenant, "!hello", "hi {user}", 0, PermissionLevel::Everyone)
        .unwrap();

    let (_backlog, mut events) = ctx.bus.subscribe(&tenant);
    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());

    let output = pipeline.process(&event("hello BADword world")).await;

    // exactly one outbound: the timeout — no command reply, no fact
    assert_eq!(
        output.actions,
        vec![ChatAction::Timeout {
            username: "alice".to_string(),
            seconds: 300,
            reason: "Auto-moderation".to_string(),
        }]
    );
    assert!(!output.fact_requested);

    let moderation = events.recv().await.unwrap();
    assert_eq!(moderation.kind, BotEventKind::ModerationAction);
    assert_eq!(moderation.payload["action"], "timeout");
    assert_eq!(moderation.payload["ruleTriggered"], "banned_words");
}

#[tokio::test]
async fn link_filter_honors_whitelist_and_subdomains() {
    let ctx = context();
    let tenant = tenant(&ctx);

    ctx.store.add_whitelist_domain(&tenant, "twitch.tv").unwrap();
    ctx.store
        .save_moderation_rule(&ModerationRule {
            tenant_id: tenant.clone(),
            rule_type: RuleType::Links,
            enabled: true,
            action: ModAction::Timeout,
            severity_threshold: Severity::Medium,
            timeout_seconds: 60,
        })
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());

    let blocked = pipeline
        .process(&event("watch https://evil.example.com/x"))
        .await;
    assert_eq!(
        blocked.actions,
        vec![ChatAction::Timeout {
            username: "alice".to_string(),
            seconds: 60,
            reason: "Auto-moderation".to_string(),
        }]
    );

    let allowed = pipeline
        .process(&event("watch https://clips.twitch.tv/foo"))
        .await;
    assert!(allowed.actions.is_empty());
}

#[tokio::test]
async fn warn_action_replies_but_does_not_abort_keywords() {
    let ctx = context();
    let tenant = tenant(&ctx);

    let mut config = BotConfig::defaults(tenant.clone());
    config.chat_keywords = vec!["ember".to_string()];
    ctx.store.save_bot_config(&config).unwrap();
    ctx.store
        .save_moderation_rule(&ModerationRule {
            tenant_id: tenant.clone(),
            rule_type: RuleType::Caps,
            enabled: true,
            action: ModAction::Warn,
            severity_threshold: Severity::Low,
            timeout_seconds: 0,
        })
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    let output = pipeline.process(&event("EMBER IS THE GREATEST")).await;

    assert!(matches!(
        output.actions.as_slice(),
        [ChatAction::Reply { .. }]
    ));
    // warn does not short-circuit the keyword step
    assert!(output.fact_requested);
}

#[tokio::test]
async fn currency_accrues_per_message_when_enabled() {
    let ctx = context();
    let tenant = tenant(&ctx);

    let mut settings = ctx.store.currency_settings(&tenant).unwrap();
    settings.enabled = true;
    settings.earn_per_message = 3;
    ctx.store.save_currency_settings(&settings).unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    pipeline.process(&event("nice stream")).await;
    pipeline.process(&event("really nice")).await;

    assert_eq!(ctx.store.balance(&tenant, "alice", Platform::Twitch).unwrap(), 6);
    // ledger invariant holds
    assert_eq!(
        ctx.store.ledger_sum(&tenant, "alice", Platform::Twitch).unwrap(),
        6
    );
}

#[tokio::test]
async fn giveaway_entry_is_unique_and_emits_durable_event() {
    let ctx = context();
    let tenant = tenant(&ctx);
    ctx.store
        .create_giveaway(&tenant, "Key drop", "!win", false, 1)
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());

    let first = pipeline.process(&event("!win")).await;
    assert!(matches!(first.actions.as_slice(), [ChatAction::Reply { .. }]));

    // duplicate entry is silent
    let second = pipeline.process(&event("!win")).await;
    assert!(second.actions.is_empty());

    // the durable event survives with no subscriber and replays on subscribe
    let (backlog, _rx) = ctx.bus.subscribe(&tenant);
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].payload["username"], "alice");

    let giveaway = ctx.store.active_giveaway(&tenant).unwrap().unwrap();
    assert_eq!(ctx.store.giveaway_entries(&giveaway.id).unwrap().len(), 1);
}

#[tokio::test]
async fn subscriber_only_giveaway_rejects_plebs() {
    let ctx = context();
    let tenant = tenant(&ctx);
    ctx.store
        .create_giveaway(&tenant, "Subs", "!win", true, 1)
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    let output = pipeline.process(&event("!win")).await;
    match output.actions.as_slice() {
        [ChatAction::Reply { text, .. }] => assert!(text.contains("subscribers-only")),
        other => panic!("unexpected actions: {:?}", other),
    }

    let mut sub_event = event_from("bob", "!win");
    sub_event.tags.is_subscriber = true;
    let output = pipeline.process(&sub_event).await;
    match output.actions.as_slice() {
        [ChatAction::Reply { text, .. }] => assert!(text.contains("entered")),
        other => panic!("unexpected actions: {:?}", other),
    }
}

#[tokio::test]
async fn keyword_match_requests_a_fact() {
    let ctx = context();
    let tenant = tenant(&ctx);
    let mut config = BotConfig::defaults(tenant.clone());
    config.chat_keywords = vec!["space".to_string()];
    ctx.store.save_bot_config(&config).unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    assert!(pipeline.process(&event("tell me about SPACE please")).await.fact_requested);
    assert!(!pipeline.process(&event("tell me about dogs")).await.fact_requested);
}

#[tokio::test]
async fn custom_command_renders_template_and_counts_usage() {
    let ctx = context();
    let tenant = tenant(&ctx);
    ctx.store
        .create_command(
            &tenant,
            "!visits",
            "{user} is visitor #{count} of {channel}",
            0,
            PermissionLevel::Everyone,
        )
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());

    let first = pipeline.process(&event("!visits")).await;
    assert_eq!(
        first.actions,
        vec![ChatAction::Say {
            text: "alice is visitor #1 of Emberfall".to_string()
        }]
    );

    let second = pipeline.process(&event_from("bob", "!VISITS")).await;
    assert_eq!(
        second.actions,
        vec![ChatAction::Say {
            text: "bob is visitor #2 of Emberfall".to_string()
        }]
    );
}

#[tokio::test]
async fn command_cooldown_is_tenant_wide() {
    let ctx = context();
    let tenant = tenant(&ctx);
    ctx.store
        .create_command(&tenant, "!hi", "hello", 3600, PermissionLevel::Everyone)
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    assert_eq!(pipeline.process(&event("!hi")).await.actions.len(), 1);
    // different user, same command, still cooling down
    assert!(pipeline.process(&event_from("bob", "!hi")).await.actions.is_empty());
}

#[tokio::test]
async fn unknown_command_falls_through_to_giveaway_keyword() {
    let ctx = context();
    let tenant = tenant(&ctx);
    ctx.store
        .create_giveaway(&tenant, "Key", "!enter", false, 1)
        .unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    // "!enter" is not a built-in or custom command; the giveaway step gets it
    let output = pipeline.process(&event("!enter")).await;
    assert!(matches!(output.actions.as_slice(), [ChatAction::Reply { .. }]));
}

#[tokio::test]
async fn chat_activity_feeds_session_projections() {
    let ctx = context();
    let tenant = tenant(&ctx);
    let session = ctx.stats.create_session(&tenant, Platform::Twitch).unwrap();

    let mut pipeline = Pipeline::new(ctx.clone(), tenant.clone(), "Emberfall".to_string());
    pipeline.process(&event("one")).await;
    pipeline.process(&event("two")).await;
    pipeline.process(&event_from("bob", "three")).await;

    let open = ctx
        .stats
        .open_session(&tenant, Platform::Twitch)
        .unwrap()
        .unwrap();
    assert_eq!(open.id, session.id);
    assert_eq!(open.total_messages, 3);
    assert_eq!(open.unique_chatters, 2);
}
