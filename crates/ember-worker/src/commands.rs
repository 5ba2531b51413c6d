//! `!command` dispatch: built-in shoutout / games / currency commands, then
//! tenant-defined custom commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use ember_core::types::{ChatAction, ChatEvent, PermissionLevel, TenantId};
use ember_platforms::PlatformSession;

use crate::context::WorkerContext;
use crate::games::{GameEngine, RouletteOutcome};
use crate::template::{self, RenderContext};

/// Flat cost of a `!redeem` (no reward catalog exists — see DESIGN notes).
const REDEEM_COST: i64 = 100;
/// Leaderboard length.
const LEADERBOARD_SIZE: usize = 5;

/// Everything a dispatch call can touch.
pub struct CommandDeps<'a> {
    pub ctx: &'a WorkerContext,
    pub tenant: &'a TenantId,
    /// Streamer display name, the `{channel}` variable.
    pub channel_display: &'a str,
    pub games: &'a mut GameEngine,
    /// Tenant-wide custom command cooldowns, keyed by command id.
    pub command_cooldowns: &'a mut HashMap<String, Instant>,
    pub uptime: Option<Duration>,
    /// Spotify session for `!song`, when the tenant has one.
    pub spotify: Option<Arc<dyn PlatformSession>>,
}

/// Dispatch one `!command` message. `None` means nothing matched and the
/// pipeline should continue with the later steps.
pub async fn dispatch(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let text = event.text.trim();
    let mut parts = text.split_whitespace();
    let command = parts.next()?.to_lowercase();
    let args: Vec<&str> = parts.collect();

    match command.as_str() {
        "!so" | "!shoutout" => shoutout(deps, event, &args).await,
        "!8ball" => eightball(deps, event),
        "!trivia" => trivia(deps, event),
        "!duel" => duel(deps, event, &args),
        "!slots" => slots(deps, event).await,
        "!roulette" => roulette(deps, event),
        "!balance" => balance(deps, event).await,
        "!gamble" => gamble(deps, event, &args).await,
        "!leaderboard" => leaderboard(deps, event).await,
        "!redeem" => redeem(deps, event, &args).await,
        "!song" => song(deps, event).await,
        _ => custom(deps, event, &command).await,
    }
}

async fn shoutout(
    deps: &mut CommandDeps<'_>,
    event: &ChatEvent,
    args: &[&str],
) -> Option<Vec<ChatAction>> {
    if event.tags.permission_level() < PermissionLevel::Moderator {
        return Some(vec![]);
    }
    let settings = deps.ctx.store.shoutout_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    let target = args.first()?.trim_start_matches('@');
    let text = settings.template.replace("{user}", target);
    Some(vec![ChatAction::Say { text }])
}

/// Render a shoutout for an incoming raid (auto-shoutout path).
pub fn raid_shoutout(
    ctx: &WorkerContext,
    tenant: &TenantId,
    raider: &str,
) -> Option<ChatAction> {
    let settings = ctx.store.shoutout_settings(tenant).ok()?;
    if !settings.enabled || !settings.auto_shoutout_on_raid {
        return None;
    }
    Some(ChatAction::Say {
        text: settings.template.replace("{user}", raider),
    })
}

fn eightball(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.game_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    if deps
        .games
        .check_cooldown(&event.username, "8ball", settings.cooldown_minutes)
        .is_some()
    {
        return Some(vec![]);
    }
    let answer = deps.games.eightball(&mut rand::thread_rng());
    Some(vec![ChatAction::Reply {
        to: event.username.clone(),
        text: format!("🎱 {}", answer),
    }])
}

fn trivia(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.game_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    if deps.games.has_active_trivia(&event.username, event.platform) {
        return Some(vec![]);
    }
    if deps
        .games
        .check_cooldown(&event.username, "trivia", settings.cooldown_minutes)
        .is_some()
    {
        return Some(vec![]);
    }
    let question =
        deps.games
            .start_trivia(&event.username, event.platform, &mut rand::thread_rng());
    Some(vec![ChatAction::Reply {
        to: event.username.clone(),
        text: format!("❓ {} (answer in chat, {} points!)", question, settings.trivia_points),
    }])
}

fn duel(deps: &mut CommandDeps<'_>, event: &ChatEvent, args: &[&str]) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.game_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }

    match args.first().copied() {
        Some("accept") => {
            let (challenger, wager, accepter_won) = match deps
                .games
                .accept_duel(&event.username, &mut rand::thread_rng())
            {
                Some(result) => result,
                None => {
                    return Some(vec![ChatAction::Reply {
                        to: event.username.clone(),
                        text: "no duel is waiting for you".to_string(),
                    }])
                }
            };
            let (winner, loser) = if accepter_won {
                (event.username.to_lowercase(), challenger)
            } else {
                (challenger, event.username.to_lowercase())
            };
            // Move the wager between ledgers; a failed debit voids the pot.
            let paid = deps
                .ctx
                .store
                .debit(deps.tenant, &loser, event.platform, wager, "duel lost", "game")
                .is_ok();
            if paid {
                let _ = deps.ctx.store.credit(
                    deps.tenant,
                    &winner,
                    event.platform,
                    wager,
                    "duel won",
                    "game",
                );
                Some(vec![ChatAction::Say {
                    text: format!("⚔️ {} wins the duel and takes {} points from {}!", winner, wager, loser),
                }])
            } else {
                Some(vec![ChatAction::Say {
                    text: format!("⚔️ {} wins the duel, but {} couldn't cover the wager", winner, loser),
                }])
            }
        }
        Some(target) => {
            if deps
                .games
                .check_cooldown(&event.username, "duel", settings.cooldown_minutes)
                .is_some()
            {
                return Some(vec![]);
            }
            let wager = args
                .get(1)
                .and_then(|w| w.parse::<i64>().ok())
                .filter(|w| *w > 0)
                .unwrap_or(10);
            let target = target.trim_start_matches('@');
            deps.games.challenge_duel(&event.username, target, wager);
            Some(vec![ChatAction::Say {
                text: format!(
                    "⚔️ {} challenges {} to a duel for {} points! Type !duel accept",
                    event.username, target, wager
                ),
            }])
        }
        None => Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: "usage: !duel <user> [wager] or !duel accept".to_string(),
        }]),
    }
}

async fn slots(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.game_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    if deps
        .games
        .check_cooldown(&event.username, "slots", settings.cooldown_minutes)
        .is_some()
    {
        return Some(vec![]);
    }
    let spin = deps.games.slots(&mut rand::thread_rng());
    let reels = spin.reels.join(" ");
    let text = if spin.payout > 0 {
        if let Err(e) = deps.ctx.store.credit(
            deps.tenant,
            &event.username,
            event.platform,
            spin.payout,
            "slots win",
            "game",
        ) {
            warn!(error = %e, "slots payout failed");
        }
        format!("🎰 {} — {} wins {} points!", reels, event.username, spin.payout)
    } else {
        format!("🎰 {} — no luck, {}", reels, event.username)
    };
    Some(vec![ChatAction::Say { text }])
}

fn roulette(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.game_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    if deps
        .games
        .check_cooldown(&event.username, "roulette", settings.cooldown_minutes)
        .is_some()
    {
        return Some(vec![]);
    }
    match deps.games.roulette(&mut rand::thread_rng()) {
        RouletteOutcome::Survived => Some(vec![ChatAction::Say {
            text: format!("🔫 click — {} survives the roulette", event.username),
        }]),
        RouletteOutcome::Shot { timeout_seconds } => Some(vec![
            ChatAction::Say {
                text: format!("🔫 BANG! {} is down for {}s", event.username, timeout_seconds),
            },
            ChatAction::Timeout {
                username: event.username.clone(),
                seconds: timeout_seconds,
                reason: "roulette".to_string(),
            },
        ]),
    }
}

async fn balance(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.currency_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    let balance = deps
        .ctx
        .store
        .balance(deps.tenant, &event.username, event.platform)
        .unwrap_or(0);
    Some(vec![ChatAction::Reply {
        to: event.username.clone(),
        text: format!("you have {} {}", balance, settings.currency_name),
    }])
}

async fn gamble(
    deps: &mut CommandDeps<'_>,
    event: &ChatEvent,
    args: &[&str],
) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.currency_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    let Some(amount) = args.first().and_then(|a| a.parse::<i64>().ok()).filter(|a| *a > 0)
    else {
        return Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: "usage: !gamble <amount>".to_string(),
        }]);
    };

    if let Err(e) = deps.ctx.store.debit(
        deps.tenant,
        &event.username,
        event.platform,
        amount,
        "gamble stake",
        "gamble",
    ) {
        debug!(error = %e, "gamble rejected");
        return Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: format!("you don't have {} {} to gamble", amount, settings.currency_name),
        }]);
    }

    if rand::Rng::gen_bool(&mut rand::thread_rng(), 0.5) {
        let winnings = amount * 2;
        let _ = deps.ctx.store.credit(
            deps.tenant,
            &event.username,
            event.platform,
            winnings,
            "gamble win",
            "gamble",
        );
        Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: format!("🎲 you won {} {}!", winnings, settings.currency_name),
        }])
    } else {
        Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: format!("🎲 you lost {} {}", amount, settings.currency_name),
        }])
    }
}

async fn leaderboard(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.currency_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    let board = deps
        .ctx
        .store
        .leaderboard(deps.tenant, LEADERBOARD_SIZE)
        .unwrap_or_default();
    if board.is_empty() {
        return Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: "nobody has any points yet".to_string(),
        }]);
    }
    let lines: Vec<String> = board
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}. {} ({})", i + 1, b.username, b.balance))
        .collect();
    Some(vec![ChatAction::Say {
        text: format!("🏆 Top {}: {}", settings.currency_name, lines.join(" | ")),
    }])
}

async fn redeem(
    deps: &mut CommandDeps<'_>,
    event: &ChatEvent,
    args: &[&str],
) -> Option<Vec<ChatAction>> {
    let settings = deps.ctx.store.currency_settings(deps.tenant).ok()?;
    if !settings.enabled {
        return Some(vec![]);
    }
    let Some(reward) = args.first() else {
        return Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: "usage: !redeem <name>".to_string(),
        }]);
    };

    match deps.ctx.store.debit(
        deps.tenant,
        &event.username,
        event.platform,
        REDEEM_COST,
        &format!("redeem {}", reward),
        "redeem",
    ) {
        Ok(_) => Some(vec![ChatAction::Say {
            text: format!("🎁 {} redeemed {} for {} {}!", event.username, reward, REDEEM_COST, settings.currency_name),
        }]),
        Err(_) => Some(vec![ChatAction::Reply {
            to: event.username.clone(),
            text: format!("redeeming {} costs {} {}", reward, REDEEM_COST, settings.currency_name),
        }]),
    }
}

async fn song(deps: &mut CommandDeps<'_>, event: &ChatEvent) -> Option<Vec<ChatAction>> {
    let Some(spotify) = deps.spotify.clone() else {
        return Some(vec![]);
    };
    let text = match spotify.now_playing().await {
        Some(track) => track.display(),
        None => "Nothing is playing right now.".to_string(),
    };
    Some(vec![ChatAction::Reply {
        to: event.username.clone(),
        text,
    }])
}

/// Tenant-defined commands: case-insensitive lookup, active flag, a
/// tenant-wide cooldown, template render, usage count.
async fn custom(
    deps: &mut CommandDeps<'_>,
    event: &ChatEvent,
    command: &str,
) -> Option<Vec<ChatAction>> {
    let stored = deps.ctx.store.find_command(deps.tenant, command).ok()??;
    if !stored.is_active {
        return None;
    }
    if event.tags.permission_level() < stored.permission_level {
        return Some(vec![]);
    }

    // Cooldown is per command per tenant, not per user.
    let cooldown = Duration::from_secs(u64::from(stored.cooldown_seconds));
    if let Some(last) = deps.command_cooldowns.get(&stored.id) {
        if last.elapsed() < cooldown {
            return Some(vec![]);
        }
    }
    deps.command_cooldowns.insert(stored.id.clone(), Instant::now());

    let count = deps
        .ctx
        .store
        .increment_command_usage(&stored.id)
        .unwrap_or(stored.usage_count + 1);

    let rendered = template::expand(
        &stored.response,
        &RenderContext {
            user: event.username.clone(),
            channel: deps.channel_display.to_string(),
            count,
            now: Utc::now(),
            uptime: deps.uptime,
        },
        &mut rand::thread_rng(),
    );
    Some(vec![ChatAction::Say { text: rendered }])
}
