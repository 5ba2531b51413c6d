//! Per-platform API budget tracking.
//!
//! Counters are process-local windows. The optional shared-cache backing
//! (REDIS_URL) is a store capability we do not carry; a multi-process
//! deployment accepts independent per-process budgets.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use ember_core::types::Platform;

/// Log a quota warning at most this often per platform.
const WARN_COOLDOWN: Duration = Duration::from_secs(300);

/// Usage fraction that triggers a warning log.
const WARN_PCT: f64 = 70.0;
/// Usage fraction that triggers an alert log.
const ALERT_PCT: f64 = 85.0;
/// Usage fraction at which further calls are denied.
const DENY_PCT: f64 = 95.0;

#[derive(Debug, Clone, Copy)]
struct Budget {
    limit: u32,
    window: Duration,
}

fn budget_for(platform: Platform) -> Option<Budget> {
    match platform {
        Platform::Twitch => Some(Budget {
            limit: 800,
            window: Duration::from_secs(60),
        }),
        Platform::Youtube => Some(Budget {
            limit: 10_000,
            window: Duration::from_secs(86_400),
        }),
        Platform::Kick => Some(Budget {
            limit: 100,
            window: Duration::from_secs(60),
        }),
        // Read-only metadata calls — no published budget to enforce.
        Platform::Spotify => None,
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
    last_warned: Option<Instant>,
}

/// Usage snapshot returned with every decision.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub platform: Platform,
    pub used: u32,
    pub limit: u32,
    pub percentage: f64,
    pub reset_time: DateTime<Utc>,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub status: QuotaStatus,
    pub reason: Option<String>,
}

/// Windowed per-platform call counters with warn/alert/deny thresholds.
pub struct QuotaTracker {
    windows: Mutex<HashMap<Platform, Window>>,
    budgets: HashMap<Platform, Budget>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        let budgets = Platform::all()
            .into_iter()
            .filter_map(|p| budget_for(p).map(|b| (p, b)))
            .collect();
        Self {
            windows: Mutex::new(HashMap::new()),
            budgets,
        }
    }

    /// Override budgets (tests and ops tuning).
    pub fn with_budget(platform: Platform, limit: u32, window: Duration) -> Self {
        let mut tracker = Self::new();
        tracker.budgets.insert(platform, Budget { limit, window });
        tracker
    }

    /// Would a call of `cost` be admitted right now? Does not consume budget.
    pub fn check_quota(&self, platform: Platform, cost: u32) -> QuotaDecision {
        self.evaluate(platform, cost, false)
    }

    /// Consume `cost` units and return the updated status.
    ///
    /// Call this after a request is actually dispatched; the denial
    /// decision belongs to `check_quota`.
    pub fn track_api_call(&self, platform: Platform, cost: u32) -> QuotaStatus {
        self.evaluate(platform, cost, true).status
    }

    fn evaluate(&self, platform: Platform, cost: u32, consume: bool) -> QuotaDecision {
        let Some(budget) = self.budgets.get(&platform).copied() else {
            // No budget — always admitted, zeroed status.
            return QuotaDecision {
                allowed: true,
                status: QuotaStatus {
                    platform,
                    used: 0,
                    limit: 0,
                    percentage: 0.0,
                    reset_time: Utc::now(),
                },
                reason: None,
            };
        };

        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();
        let window = windows.entry(platform).or_insert_with(|| Window {
            started: now,
            used: 0,
            last_warned: None,
        });

        // Window rollover.
        if now.duration_since(window.started) >= budget.window {
            window.started = now;
            window.used = 0;
        }

        let projected = window.used.saturating_add(cost);
        let percentage = (projected as f64 / budget.limit as f64) * 100.0;
        let allowed = percentage < DENY_PCT;

        if consume && allowed {
            window.used = projected;
        }

        if percentage >= WARN_PCT {
            let warn_due = window
                .last_warned
                .map(|at| now.duration_since(at) >= WARN_COOLDOWN)
                .unwrap_or(true);
            if warn_due {
                window.last_warned = Some(now);
                if percentage >= ALERT_PCT {
                    warn!(
                        platform = %platform,
                        used = window.used,
                        limit = budget.limit,
                        pct = format!("{percentage:.1}"),
                        "API quota alert"
                    );
                } else {
                    warn!(
                        platform = %platform,
                        used = window.used,
                        limit = budget.limit,
                        pct = format!("{percentage:.1}"),
                        "API quota warning"
                    );
                }
            }
        }

        let remaining = budget
            .window
            .saturating_sub(now.duration_since(window.started));
        let reset_time =
            Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());

        QuotaDecision {
            allowed,
            status: QuotaStatus {
                platform,
                used: window.used,
                limit: budget.limit,
                percentage,
                reset_time,
            },
            reason: (!allowed).then(|| {
                format!(
                    "quota {:.1}% of {} calls per {}s",
                    percentage,
                    budget.limit,
                    budget.window.as_secs()
                )
            }),
        }
    }

    /// Milliseconds until the current window resets (0 when no budget).
    pub fn reset_in_ms(&self, platform: Platform) -> u64 {
        let Some(budget) = self.budgets.get(&platform).copied() else {
            return 0;
        };
        let windows = self.windows.lock().unwrap();
        let Some(window) = windows.get(&platform) else {
            return 0;
        };
        budget
            .window
            .saturating_sub(window.started.elapsed())
            .as_millis() as u64
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spotify_has_no_budget() {
        let tracker = QuotaTracker::new();
        for _ in 0..10_000 {
            assert!(tracker.check_quota(Platform::Spotify, 1).allowed);
        }
    }

    #[test]
    fn denies_at_95_percent() {
        let tracker = QuotaTracker::with_budget(Platform::Kick, 100, Duration::from_secs(60));
        for _ in 0..94 {
            tracker.track_api_call(Platform::Kick, 1);
        }
        // 95th call projects to exactly 95% — denied
        let decision = tracker.check_quota(Platform::Kick, 1);
        assert!(!decision.allowed);
        assert!(decision.reason.is_some());
    }

    #[test]
    fn admits_below_threshold() {
        let tracker = QuotaTracker::with_budget(Platform::Kick, 100, Duration::from_secs(60));
        for _ in 0..90 {
            tracker.track_api_call(Platform::Kick, 1);
        }
        let decision = tracker.check_quota(Platform::Kick, 1);
        assert!(decision.allowed);
        assert_eq!(decision.status.used, 90);
    }

    #[test]
    fn cost_is_respected() {
        let tracker = QuotaTracker::with_budget(Platform::Youtube, 100, Duration::from_secs(60));
        let status = tracker.track_api_call(Platform::Youtube, 50);
        assert_eq!(status.used, 50);
        assert!(!tracker.check_quota(Platform::Youtube, 50).allowed);
        assert!(tracker.check_quota(Platform::Youtube, 40).allowed);
    }

    #[test]
    fn window_rolls_over() {
        let tracker = QuotaTracker::with_budget(Platform::Kick, 10, Duration::from_millis(0));
        for _ in 0..20 {
            tracker.track_api_call(Platform::Kick, 1);
        }
        // zero-length window resets on every evaluation
        assert!(tracker.check_quota(Platform::Kick, 1).allowed);
    }

    #[test]
    fn check_does_not_consume() {
        let tracker = QuotaTracker::with_budget(Platform::Kick, 100, Duration::from_secs(60));
        for _ in 0..50 {
            tracker.check_quota(Platform::Kick, 1);
        }
        assert_eq!(tracker.track_api_call(Platform::Kick, 1).used, 1);
    }
}
