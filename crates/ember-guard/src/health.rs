use chrono::{DateTime, Utc};
use serde::Serialize;

use ember_core::types::Platform;

use crate::breaker::CircuitState;

/// Point-in-time health snapshot for one platform, surfaced on the status
/// API. Assembled by `CircuitBreaker::health`; lives only in memory.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformHealth {
    pub platform: Platform,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub is_throttled: bool,
    /// Remaining throttle window, when throttled.
    pub throttled_for_ms: Option<u64>,
    pub avg_response_time_ms: f64,
    pub requests_today: u64,
    pub errors_today: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}
