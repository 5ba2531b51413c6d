use std::collections::HashMap;
use std::sync::Arc;

use ember_ai::{FactGenerator, ToxicityClassifier};
use ember_core::types::Platform;
use ember_guard::{CircuitBreaker, QuotaTracker};
use ember_platforms::PlatformAdapter;
use ember_queue::MessageQueue;
use ember_stats::StatsAggregator;
use ember_store::Store;
use ember_tokens::TokenManager;

use crate::events::EventBus;

/// Every port a worker needs, owned once per process and shared.
///
/// These are constructor-injected — process-wide state belongs to the
/// supervisor's owner, never to module globals.
pub struct WorkerContext {
    pub store: Arc<Store>,
    pub stats: Arc<StatsAggregator>,
    pub queue: Arc<MessageQueue>,
    pub breaker: Arc<CircuitBreaker>,
    pub quota: Arc<QuotaTracker>,
    pub bus: Arc<EventBus>,
    pub tokens: Arc<TokenManager>,
    pub facts: Arc<FactGenerator>,
    pub toxicity: Arc<ToxicityClassifier>,
    pub adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl WorkerContext {
    pub fn adapter(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }
}
