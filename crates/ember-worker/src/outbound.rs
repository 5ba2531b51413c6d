//! The guarded outbound path: quota check → circuit breaker → adapter call
//! → record outcome → queue on denial or failure.
//!
//! The inbound pipeline never waits on any of this; actions are handed to a
//! single per-worker dispatcher task, and anything the guards refuse goes
//! to the durable queue for the drainer to redrive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use ember_core::types::{ChatAction, Platform, TenantId};
use ember_guard::breaker::Denial;
use ember_guard::Tuning;
use ember_platforms::{PlatformSession, SendOutcome};
use ember_queue::QueueItem;

use crate::context::WorkerContext;

/// Priority for moderation actions — they outrank chatter in the queue.
const MODERATION_PRIORITY: u8 = 8;
const CHAT_PRIORITY: u8 = 5;
/// Requeue delay after an auth failure, giving the refresh a moment.
const AUTH_RETRY_DELAY_MS: u64 = 5_000;

fn message_type(action: &ChatAction) -> &'static str {
    match action {
        ChatAction::Say { .. } | ChatAction::Reply { .. } => "chat",
        ChatAction::Timeout { .. } => "timeout",
        ChatAction::Ban { .. } => "ban",
    }
}

fn priority(action: &ChatAction) -> u8 {
    match action {
        ChatAction::Timeout { .. } | ChatAction::Ban { .. } => MODERATION_PRIORITY,
        _ => CHAT_PRIORITY,
    }
}

/// Persist an action for later delivery.
pub fn enqueue_action(
    ctx: &WorkerContext,
    tenant: &TenantId,
    platform: Platform,
    channel: &str,
    action: &ChatAction,
    delay_ms: u64,
) {
    let scheduled = (delay_ms > 0)
        .then(|| chrono::Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
    let metadata = serde_json::json!({
        "action": action,
        "channel": channel,
    });
    if let Err(e) = ctx.queue.enqueue(
        tenant,
        platform,
        message_type(action),
        &action.message_text().unwrap_or_default(),
        &metadata,
        priority(action),
        scheduled,
    ) {
        warn!(tenant = %tenant, platform = %platform, error = %e, "failed to enqueue outbound");
    }
}

/// Rebuild the action a queue item carries.
pub fn action_from_item(item: &QueueItem) -> Option<(ChatAction, String)> {
    let action = serde_json::from_value(item.metadata.get("action")?.clone()).ok()?;
    let channel = item
        .metadata
        .get("channel")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    Some((action, channel))
}

/// Perform the platform call for an action.
async fn execute(
    session: &dyn PlatformSession,
    channel: &str,
    action: &ChatAction,
) -> SendOutcome {
    match action {
        ChatAction::Say { .. } | ChatAction::Reply { .. } => {
            let text = action.message_text().unwrap_or_default();
            session.send(channel, &text).await
        }
        ChatAction::Timeout {
            username,
            seconds,
            reason,
        } => session.timeout_user(channel, username, *seconds, reason).await,
        ChatAction::Ban { username, reason } => session.ban_user(channel, username, reason).await,
    }
}

/// Why a guard refused, and how long to back off.
fn guard_delay_ms(platform: Platform, denial: &Denial) -> u64 {
    match denial {
        Denial::CircuitOpen => Tuning::for_platform(platform).timeout.as_millis() as u64,
        Denial::Throttled { remaining_ms } => (*remaining_ms).max(1_000),
    }
}

/// Live path: called (via the worker's dispatcher task) for every action
/// the pipeline produces.
pub async fn dispatch(
    ctx: &Arc<WorkerContext>,
    tenant: &TenantId,
    platform: Platform,
    session: &dyn PlatformSession,
    channel: &str,
    action: &ChatAction,
) {
    // 1. Quota.
    let decision = ctx.quota.check_quota(platform, 1);
    if !decision.allowed {
        let delay = ctx.quota.reset_in_ms(platform).max(1_000);
        debug!(tenant = %tenant, platform = %platform, delay_ms = delay, "quota full, queueing outbound");
        enqueue_action(ctx, tenant, platform, channel, action, delay);
        return;
    }

    // 2. Breaker (throttle included).
    if let Err(denial) = ctx.breaker.can_make_request(platform) {
        let delay = guard_delay_ms(platform, &denial);
        debug!(tenant = %tenant, platform = %platform, ?denial, "breaker refused, queueing outbound");
        enqueue_action(ctx, tenant, platform, channel, action, delay);
        return;
    }

    // 3–5. Send, record, queue on failure.
    let started = Instant::now();
    let outcome = execute(session, channel, action).await;
    record_outcome(ctx, tenant, platform, started, &outcome);

    match outcome {
        SendOutcome::Sent => {}
        SendOutcome::Throttled { retry_after_ms } => {
            enqueue_action(ctx, tenant, platform, channel, action, retry_after_ms);
        }
        SendOutcome::AuthError => {
            enqueue_action(ctx, tenant, platform, channel, action, AUTH_RETRY_DELAY_MS);
        }
        SendOutcome::Transient { reason } => {
            debug!(tenant = %tenant, platform = %platform, %reason, "send failed, queueing for retry");
            enqueue_action(ctx, tenant, platform, channel, action, 1_000);
        }
    }
}

/// Record an outcome into breaker + quota, and kick a token refresh on
/// auth errors (fire-and-forget; the original call is not retried here).
fn record_outcome(
    ctx: &Arc<WorkerContext>,
    tenant: &TenantId,
    platform: Platform,
    started: Instant,
    outcome: &SendOutcome,
) {
    match outcome {
        SendOutcome::Sent => {
            let latency = started.elapsed().as_secs_f64() * 1_000.0;
            ctx.breaker.record_success(platform, Some(latency));
            ctx.quota.track_api_call(platform, 1);
        }
        SendOutcome::Throttled { retry_after_ms } => {
            ctx.breaker
                .record_throttle(platform, Duration::from_millis(*retry_after_ms));
        }
        SendOutcome::AuthError => {
            ctx.breaker.record_failure(platform);
            let ctx = ctx.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move {
                if let Err(e) = ctx.tokens.handle_unauthorized(&tenant, platform).await {
                    warn!(tenant = %tenant, platform = %platform, error = %e, "post-401 refresh failed");
                }
            });
        }
        SendOutcome::Transient { .. } => {
            ctx.breaker.record_failure(platform);
        }
    }
}

/// Drain one batch of this worker's queued messages for a platform.
///
/// Guard refusals release the claim without charging the retry budget;
/// real send failures go through `complete` and its exponential backoff.
pub async fn drain(
    ctx: &Arc<WorkerContext>,
    tenant: &TenantId,
    platform: Platform,
    session: &dyn PlatformSession,
    batch: usize,
) {
    let items = match ctx.queue.claim_for(tenant, platform, batch) {
        Ok(items) => items,
        Err(e) => {
            warn!(platform = %platform, error = %e, "queue claim failed");
            return;
        }
    };

    for item in items {
        let Some((action, channel)) = action_from_item(&item) else {
            // Unreadable payload — burn it so it cannot loop forever.
            let _ = ctx.queue.complete(&item.id, false, Some("unparseable action"));
            continue;
        };

        let decision = ctx.quota.check_quota(platform, 1);
        if !decision.allowed {
            let _ = ctx
                .queue
                .release(&item.id, ctx.quota.reset_in_ms(platform).max(1_000));
            continue;
        }
        if let Err(denial) = ctx.breaker.can_make_request(platform) {
            let _ = ctx
                .queue
                .release(&item.id, guard_delay_ms(platform, &denial));
            continue;
        }

        let started = Instant::now();
        let outcome = execute(session, &channel, &action).await;
        record_outcome(ctx, tenant, platform, started, &outcome);

        match outcome {
            SendOutcome::Sent => {
                let _ = ctx.queue.complete(&item.id, true, None);
            }
            SendOutcome::Throttled { retry_after_ms } => {
                // Platform pushback, not a delivery failure.
                let _ = ctx.queue.release(&item.id, retry_after_ms);
            }
            SendOutcome::AuthError => {
                let _ = ctx.queue.complete(&item.id, false, Some("auth error"));
            }
            SendOutcome::Transient { reason } => {
                let _ = ctx.queue.complete(&item.id, false, Some(&reason));
            }
        }
    }
}
