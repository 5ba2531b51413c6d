pub mod breaker;
pub mod health;
pub mod quota;

pub use breaker::{CircuitBreaker, CircuitState, Tuning};
pub use health::PlatformHealth;
pub use quota::{QuotaDecision, QuotaStatus, QuotaTracker};
