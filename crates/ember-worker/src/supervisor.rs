//! Process-wide worker registry. The supervisor is the sole creator and
//! destroyer of workers; start/stop/restart for one tenant serialize on a
//! per-tenant lock so no caller ever observes a half-started worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use ember_core::types::{BotEvent, Platform, TenantId};
use ember_stats::SessionStats;

use crate::context::WorkerContext;
use crate::error::{Result, WorkerError};
use crate::worker::{BotWorker, WorkerState};

/// A worker whose heartbeat is older than this while Running is considered
/// crashed.
const CRASH_HEARTBEAT_GRACE: Duration = Duration::from_secs(90);
/// Crash monitor scan cadence.
const MONITOR_TICK: Duration = Duration::from_secs(30);

/// Control-plane view of one tenant's worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub is_running: bool,
    pub state: WorkerState,
    pub since: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_posted_at: Option<DateTime<Utc>>,
    pub dropped_messages: u64,
    pub stats: SessionStats,
}

pub struct Supervisor {
    ctx: Arc<WorkerContext>,
    workers: DashMap<TenantId, Arc<BotWorker>>,
    locks: DashMap<TenantId, Arc<tokio::sync::Mutex<()>>>,
}

impl Supervisor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            ctx,
            workers: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    fn lock_for(&self, tenant: &TenantId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Start the tenant's worker. Idempotent — an already-running worker is
    /// reported, not restarted.
    pub async fn start(&self, tenant: &TenantId) -> Result<WorkerStatus> {
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;
        self.start_locked(tenant).await
    }

    async fn start_locked(&self, tenant: &TenantId) -> Result<WorkerStatus> {
        if let Some(existing) = self.workers.get(tenant) {
            match existing.state() {
                WorkerState::Running | WorkerState::Starting => {
                    return Ok(self.compose_status(tenant));
                }
                WorkerState::Draining => return Err(WorkerError::AlreadyRunning),
                WorkerState::Stopped => {}
            }
        }

        // A stopped worker is replaced wholesale — fresh buffers, fresh state.
        let worker = Arc::new(BotWorker::new(self.ctx.clone(), tenant.clone()));
        self.workers.insert(tenant.clone(), worker.clone());
        worker.start().await?;
        info!(tenant = %tenant, "worker started");
        Ok(self.compose_status(tenant))
    }

    /// Stop the tenant's worker. Idempotent.
    pub async fn stop(&self, tenant: &TenantId) -> Result<WorkerStatus> {
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;
        self.stop_locked(tenant).await
    }

    async fn stop_locked(&self, tenant: &TenantId) -> Result<WorkerStatus> {
        if let Some(worker) = self.workers.get(tenant).map(|w| w.clone()) {
            worker.stop().await?;
        }
        Ok(self.compose_status(tenant))
    }

    /// Stop then start under one lock — no other caller observes the
    /// intermediate state.
    pub async fn restart(&self, tenant: &TenantId) -> Result<WorkerStatus> {
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;
        self.stop_locked(tenant).await?;
        self.start_locked(tenant).await
    }

    /// Re-read config on a running worker (cadence, keywords).
    pub fn reload(&self, tenant: &TenantId) -> Result<()> {
        let worker = self
            .workers
            .get(tenant)
            .ok_or(WorkerError::NotRunning)?
            .clone();
        if worker.state() != WorkerState::Running {
            return Err(WorkerError::NotRunning);
        }
        worker.reload()
    }

    pub fn status(&self, tenant: &TenantId) -> WorkerStatus {
        self.compose_status(tenant)
    }

    /// Post now on the tenant's worker.
    pub async fn post_manual(
        &self,
        tenant: &TenantId,
        platforms: &[Platform],
        fact: Option<String>,
    ) -> Result<()> {
        let worker = self
            .workers
            .get(tenant)
            .ok_or(WorkerError::NotRunning)?
            .clone();
        worker.post_manual(platforms, fact).await
    }

    /// Announce text on the tenant's worker (giveaway starts, winners).
    pub async fn announce(&self, tenant: &TenantId, text: &str, platforms: &[Platform]) -> Result<()> {
        let worker = self
            .workers
            .get(tenant)
            .ok_or(WorkerError::NotRunning)?
            .clone();
        worker.announce(text, platforms).await
    }

    /// Subscribe to the tenant's event stream (durable backlog + live).
    pub fn subscribe(&self, tenant: &TenantId) -> (Vec<BotEvent>, broadcast::Receiver<BotEvent>) {
        self.ctx.bus.subscribe(tenant)
    }

    /// Acknowledge durable events up to `seq`.
    pub fn ack_events(&self, tenant: &TenantId, seq: u64) {
        self.ctx.bus.ack(tenant, seq);
    }

    fn compose_status(&self, tenant: &TenantId) -> WorkerStatus {
        let snapshot = self.workers.get(tenant).map(|w| w.status());
        let last_posted_at = self
            .ctx
            .store
            .bot_config(tenant)
            .ok()
            .and_then(|c| c.last_posted_at);
        let stats = self.ctx.stats.tenant_stats(tenant).unwrap_or_default();

        match snapshot {
            Some(snapshot) => WorkerStatus {
                is_running: snapshot.state == WorkerState::Running,
                state: snapshot.state,
                since: snapshot.since,
                last_error: snapshot.last_error,
                last_posted_at,
                dropped_messages: snapshot.dropped_messages,
                stats,
            },
            None => WorkerStatus {
                is_running: false,
                state: WorkerState::Stopped,
                since: Utc::now(),
                last_error: None,
                last_posted_at,
                dropped_messages: 0,
                stats,
            },
        }
    }

    /// Background crash detector: a Running worker whose heartbeat went
    /// stale is marked crashed (error recorded, `error` event emitted,
    /// state Stopped). Restart stays an explicit operator action.
    pub fn spawn_crash_monitor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(MONITOR_TICK);
            loop {
                tick.tick().await;
                for entry in self.workers.iter() {
                    let worker = entry.value().clone();
                    if worker.state() != WorkerState::Running {
                        continue;
                    }
                    let status = worker.status();
                    let grace = chrono::Duration::from_std(CRASH_HEARTBEAT_GRACE)
                        .unwrap_or_else(|_| chrono::Duration::seconds(90));
                    let stale = status
                        .last_heartbeat
                        .map(|hb| Utc::now() - hb > grace)
                        .unwrap_or(false);
                    if stale {
                        warn!(tenant = %worker.tenant(), "worker heartbeat stale, marking crashed");
                        worker.mark_crashed("heartbeat lost");
                    }
                }
            }
        })
    }
}
