//! Per-platform circuit breaker — trips after consecutive failures and
//! temporarily blocks a platform that is down or rate-limiting us.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use ember_core::types::Platform;

use crate::health::PlatformHealth;

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-platform breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Tuning {
    /// Contractual defaults per platform.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Twitch => Self {
                failure_threshold: 5,
                success_threshold: 3,
                timeout: Duration::from_millis(30_000),
            },
            Platform::Youtube => Self {
                failure_threshold: 3,
                success_threshold: 3,
                timeout: Duration::from_millis(60_000),
            },
            Platform::Kick => Self {
                failure_threshold: 5,
                success_threshold: 3,
                timeout: Duration::from_millis(45_000),
            },
            Platform::Spotify => Self {
                failure_threshold: 3,
                success_threshold: 3,
                timeout: Duration::from_millis(30_000),
            },
        }
    }
}

/// EWMA smoothing: avg = 0.9·avg + 0.1·sample.
const EWMA_KEEP: f64 = 0.9;

#[derive(Debug)]
struct PlatformSlot {
    state: CircuitState,
    /// Consecutive failures while closed.
    failure_count: u32,
    /// Successes while closed; consecutive successes while half-open.
    success_count: u32,
    opened_at: Option<Instant>,
    /// Orthogonal 429 throttle — independent of circuit state.
    throttled_until: Option<Instant>,
    avg_response_ms: f64,
    requests_today: u64,
    errors_today: u64,
    today: chrono::NaiveDate,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl PlatformSlot {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            throttled_until: None,
            avg_response_ms: 0.0,
            requests_today: 0,
            errors_today: 0,
            today: Utc::now().date_naive(),
            last_success_at: None,
            last_failure_at: None,
        }
    }

    /// Reset the daily counters when the UTC date rolls over.
    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.today {
            self.today = today;
            self.requests_today = 0;
            self.errors_today = 0;
        }
    }
}

/// Why a request was blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    CircuitOpen,
    Throttled { remaining_ms: u64 },
}

/// Thread-safe per-platform circuit breaker.
///
/// Transitions are linearized by one mutex over the whole slot map; the
/// critical sections are a handful of field updates.
pub struct CircuitBreaker {
    slots: Mutex<HashMap<Platform, PlatformSlot>>,
    tuning: HashMap<Platform, Tuning>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        let tuning = Platform::all()
            .into_iter()
            .map(|p| (p, Tuning::for_platform(p)))
            .collect();
        Self {
            slots: Mutex::new(HashMap::new()),
            tuning,
        }
    }

    /// Override tuning for selected platforms (ops escape hatch and tests).
    pub fn with_tuning(overrides: impl IntoIterator<Item = (Platform, Tuning)>) -> Self {
        let mut breaker = Self::new();
        for (platform, tuning) in overrides {
            breaker.tuning.insert(platform, tuning);
        }
        breaker
    }

    fn tuning(&self, platform: Platform) -> Tuning {
        self.tuning
            .get(&platform)
            .copied()
            .unwrap_or_else(|| Tuning::for_platform(platform))
    }

    /// Gate an outbound request. `Err` carries why it was blocked.
    ///
    /// An open circuit whose timeout has elapsed transitions to half-open
    /// here, on the first call that observes the elapsed timer.
    pub fn can_make_request(&self, platform: Platform) -> Result<(), Denial> {
        let tuning = self.tuning(platform);
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(platform).or_insert_with(PlatformSlot::new);
        let now = Instant::now();

        if let Some(until) = slot.throttled_until {
            if until > now {
                let remaining_ms = until.duration_since(now).as_millis() as u64;
                return Err(Denial::Throttled { remaining_ms });
            }
            slot.throttled_until = None;
        }

        match slot.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = slot
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                if elapsed >= tuning.timeout {
                    info!(platform = %platform, "circuit half-open, probing");
                    slot.state = CircuitState::HalfOpen;
                    slot.success_count = 0;
                    Ok(())
                } else {
                    Err(Denial::CircuitOpen)
                }
            }
        }
    }

    /// Record a successful platform call, with an optional latency sample.
    pub fn record_success(&self, platform: Platform, response_time_ms: Option<f64>) {
        let tuning = self.tuning(platform);
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(platform).or_insert_with(PlatformSlot::new);
        slot.roll_day();
        slot.requests_today += 1;
        slot.last_success_at = Some(Utc::now());
        slot.throttled_until = None;
        if let Some(sample) = response_time_ms {
            slot.avg_response_ms = if slot.avg_response_ms == 0.0 {
                sample
            } else {
                EWMA_KEEP * slot.avg_response_ms + (1.0 - EWMA_KEEP) * sample
            };
        }

        match slot.state {
            CircuitState::Closed => {
                slot.success_count += 1;
                slot.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                slot.success_count += 1;
                if slot.success_count >= tuning.success_threshold {
                    info!(platform = %platform, "circuit closed (probe succeeded)");
                    slot.state = CircuitState::Closed;
                    slot.failure_count = 0;
                    slot.success_count = 0;
                    slot.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed platform call.
    pub fn record_failure(&self, platform: Platform) {
        let tuning = self.tuning(platform);
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(platform).or_insert_with(PlatformSlot::new);
        slot.roll_day();
        slot.requests_today += 1;
        slot.errors_today += 1;
        slot.last_failure_at = Some(Utc::now());

        match slot.state {
            CircuitState::Closed => {
                slot.failure_count += 1;
                if slot.failure_count >= tuning.failure_threshold {
                    warn!(
                        platform = %platform,
                        failures = slot.failure_count,
                        timeout_ms = tuning.timeout.as_millis() as u64,
                        "circuit tripped"
                    );
                    slot.state = CircuitState::Open;
                    slot.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(platform = %platform, "half-open probe failed, circuit re-tripped");
                slot.state = CircuitState::Open;
                slot.opened_at = Some(Instant::now());
                slot.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a 429 throttle window. Orthogonal to the circuit state — a
    /// closed circuit can still be throttled.
    pub fn record_throttle(&self, platform: Platform, retry_after: Duration) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(platform).or_insert_with(PlatformSlot::new);
        slot.throttled_until = Some(Instant::now() + retry_after);
        warn!(
            platform = %platform,
            retry_after_ms = retry_after.as_millis() as u64,
            "platform throttled"
        );
    }

    pub fn state(&self, platform: Platform) -> CircuitState {
        let slots = self.slots.lock().unwrap();
        slots
            .get(&platform)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot health for one platform.
    pub fn health(&self, platform: Platform) -> PlatformHealth {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(platform).or_insert_with(PlatformSlot::new);
        slot.roll_day();
        let now = Instant::now();
        let throttled_ms = slot
            .throttled_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now).as_millis() as u64);
        PlatformHealth {
            platform,
            circuit_state: slot.state,
            failure_count: slot.failure_count,
            success_count: slot.success_count,
            is_throttled: throttled_ms.is_some(),
            throttled_for_ms: throttled_ms,
            avg_response_time_ms: slot.avg_response_ms,
            requests_today: slot.requests_today,
            errors_today: slot.errors_today,
            last_success_at: slot.last_success_at,
            last_failure_at: slot.last_failure_at,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::with_tuning([(
            Platform::Twitch,
            Tuning {
                failure_threshold: 5,
                success_threshold: 3,
                timeout,
            },
        )])
    }

    #[test]
    fn fresh_platform_is_closed_and_allowed() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Closed);
        assert!(cb.can_make_request(Platform::Twitch).is_ok());
    }

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record_failure(Platform::Twitch);
        }
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Closed);
        cb.record_failure(Platform::Twitch);
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Open);
        assert_eq!(
            cb.can_make_request(Platform::Twitch),
            Err(Denial::CircuitOpen)
        );
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record_failure(Platform::Twitch);
        }
        cb.record_success(Platform::Twitch, None);
        for _ in 0..4 {
            cb.record_failure(Platform::Twitch);
        }
        // 4 after the reset — still closed
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Closed);
    }

    #[test]
    fn youtube_trips_at_three() {
        let cb = CircuitBreaker::new();
        for _ in 0..3 {
            cb.record_failure(Platform::Youtube);
        }
        assert_eq!(cb.state(Platform::Youtube), CircuitState::Open);
        // other platforms unaffected
        assert_eq!(cb.state(Platform::Kick), CircuitState::Closed);
    }

    #[test]
    fn open_half_open_closed_cycle() {
        let cb = fast_breaker(Duration::from_millis(0));
        for _ in 0..5 {
            cb.record_failure(Platform::Twitch);
        }
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Open);

        // timeout (0ms) elapsed — next gate check flips to half-open
        assert!(cb.can_make_request(Platform::Twitch).is_ok());
        assert_eq!(cb.state(Platform::Twitch), CircuitState::HalfOpen);

        cb.record_success(Platform::Twitch, None);
        cb.record_success(Platform::Twitch, None);
        assert_eq!(cb.state(Platform::Twitch), CircuitState::HalfOpen);
        cb.record_success(Platform::Twitch, None);
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Closed);

        // counts were reset on close
        let health = cb.health(Platform::Twitch);
        assert_eq!(health.failure_count, 0);
        assert_eq!(health.success_count, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = fast_breaker(Duration::from_millis(0));
        for _ in 0..5 {
            cb.record_failure(Platform::Twitch);
        }
        assert!(cb.can_make_request(Platform::Twitch).is_ok()); // half-open
        cb.record_failure(Platform::Twitch);
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Open);
    }

    #[test]
    fn open_before_timeout_stays_blocked() {
        let cb = fast_breaker(Duration::from_secs(3600));
        for _ in 0..5 {
            cb.record_failure(Platform::Twitch);
        }
        assert_eq!(
            cb.can_make_request(Platform::Twitch),
            Err(Denial::CircuitOpen)
        );
        assert_eq!(cb.state(Platform::Twitch), CircuitState::Open);
    }

    #[test]
    fn throttle_is_orthogonal_to_circuit() {
        let cb = CircuitBreaker::new();
        cb.record_throttle(Platform::Kick, Duration::from_secs(60));
        assert_eq!(cb.state(Platform::Kick), CircuitState::Closed);
        assert!(matches!(
            cb.can_make_request(Platform::Kick),
            Err(Denial::Throttled { .. })
        ));

        // a success clears the throttle
        cb.record_success(Platform::Kick, None);
        assert!(cb.can_make_request(Platform::Kick).is_ok());
    }

    #[test]
    fn expired_throttle_clears_on_next_check() {
        let cb = CircuitBreaker::new();
        cb.record_throttle(Platform::Kick, Duration::from_millis(0));
        assert!(cb.can_make_request(Platform::Kick).is_ok());
        assert!(!cb.health(Platform::Kick).is_throttled);
    }

    #[test]
    fn ewma_tracks_latency() {
        let cb = CircuitBreaker::new();
        cb.record_success(Platform::Twitch, Some(100.0));
        assert!((cb.health(Platform::Twitch).avg_response_time_ms - 100.0).abs() < 1e-9);
        cb.record_success(Platform::Twitch, Some(200.0));
        // 0.9*100 + 0.1*200 = 110
        assert!((cb.health(Platform::Twitch).avg_response_time_ms - 110.0).abs() < 1e-9);
    }

    #[test]
    fn daily_counters_accumulate() {
        let cb = CircuitBreaker::new();
        cb.record_success(Platform::Twitch, None);
        cb.record_failure(Platform::Twitch);
        let health = cb.health(Platform::Twitch);
        assert_eq!(health.requests_today, 2);
        assert_eq!(health.errors_today, 1);
    }
}
