//! The per-tenant Bot Worker: owns the tenant's platform sessions and runs
//! the concurrent task set — ingestion per platform, one serial pipeline
//! executor, the post scheduler, heartbeat, viewer snapshots, and the
//! outbound drainer. All tasks share one cancellation root.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ember_core::config::{
    DRAIN_DEADLINE_SECS, HEARTBEAT_INTERVAL_SECS, INBOUND_CHANNEL_CAPACITY, OUTBOUND_CLAIM_BATCH,
    VIEWER_SNAPSHOT_INTERVAL_SECS,
};
use ember_core::types::{BotEventKind, ChatAction, Platform, TenantId};
use ember_platforms::{PlatformSession, SessionCredentials, SessionEvent};
use ember_store::BotConfig;

use crate::commands::raid_shoutout;
use crate::context::WorkerContext;
use crate::error::{Result, WorkerError};
use crate::inbound::InboundQueue;
use crate::outbound;
use crate::pipeline::Pipeline;
use crate::schedule::PostSchedule;

/// Drain loop cadence.
const DRAIN_TICK: Duration = Duration::from_secs(2);
/// Pipeline maintenance sweep cadence.
const SWEEP_TICK: Duration = Duration::from_secs(60);

/// Worker lifecycle. `Starting` and `Draining` are externally observable —
/// a restart caller never sees a half-built worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Draining,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: WorkerState,
    pub since: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub dropped_messages: u64,
}

struct StatusInner {
    state: WorkerState,
    since: DateTime<Utc>,
    last_error: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
}

/// One connected chat platform inside a running worker.
struct PlatformRuntime {
    session: Arc<dyn PlatformSession>,
    channel: String,
    stats_session_id: String,
}

/// An action on its way out, tagged with its destination.
struct OutboundRequest {
    platform: Platform,
    channel: String,
    action: ChatAction,
}

pub struct BotWorker {
    tenant: TenantId,
    ctx: Arc<WorkerContext>,
    status: Arc<Mutex<StatusInner>>,
    cancel: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    runtimes: Arc<RwLock<HashMap<Platform, Arc<PlatformRuntime>>>>,
    inbound: Arc<InboundQueue>,
    outbound_tx: Mutex<Option<mpsc::Sender<OutboundRequest>>>,
    config_tx: watch::Sender<BotConfig>,
}

impl BotWorker {
    pub fn new(ctx: Arc<WorkerContext>, tenant: TenantId) -> Self {
        let (config_tx, _) = watch::channel(BotConfig::defaults(tenant.clone()));
        Self {
            tenant,
            ctx,
            status: Arc::new(Mutex::new(StatusInner {
                state: WorkerState::Stopped,
                since: Utc::now(),
                last_error: None,
                last_heartbeat: None,
            })),
            cancel: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            inbound: Arc::new(InboundQueue::new(INBOUND_CHANNEL_CAPACITY)),
            outbound_tx: Mutex::new(None),
            config_tx,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn state(&self) -> WorkerState {
        self.status.lock().unwrap().state
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.status.lock().unwrap();
        StatusSnapshot {
            state: inner.state,
            since: inner.since,
            last_error: inner.last_error.clone(),
            last_heartbeat: inner.last_heartbeat,
            dropped_messages: self.inbound.dropped(),
        }
    }

    fn transition(&self, state: WorkerState) {
        {
            let mut inner = self.status.lock().unwrap();
            inner.state = state;
            inner.since = Utc::now();
        }
        self.ctx.bus.emit(
            &self.tenant,
            BotEventKind::StatusChanged,
            serde_json::json!({ "state": state }),
        );
    }

    fn record_error(&self, message: &str) {
        self.status.lock().unwrap().last_error = Some(message.to_string());
        self.ctx.bus.emit(
            &self.tenant,
            BotEventKind::Error,
            serde_json::json!({ "message": message }),
        );
    }

    /// Connect every active platform and launch the task set.
    pub async fn start(&self) -> Result<()> {
        if self.state() != WorkerState::Stopped {
            return Err(WorkerError::AlreadyRunning);
        }
        self.transition(WorkerState::Starting);

        match self.start_inner().await {
            Ok(()) => {
                self.transition(WorkerState::Running);
                info!(tenant = %self.tenant, "bot worker running");
                Ok(())
            }
            Err(e) => {
                // Failure during Starting lands back in Stopped with the error.
                self.record_error(&e.to_string());
                if let Some(cancel) = self.cancel.lock().unwrap().take() {
                    cancel.cancel();
                }
                *self.outbound_tx.lock().unwrap() = None;
                self.teardown_sessions().await;
                self.transition(WorkerState::Stopped);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        if !self.ctx.store.tenant_is_live(&self.tenant)? {
            return Err(WorkerError::TenantUnavailable);
        }
        let config = self.ctx.store.bot_config(&self.tenant)?;
        let _ = self.config_tx.send(config.clone());

        let display_name = self
            .ctx
            .store
            .get_tenant(&self.tenant)?
            .map(|t| t.display_name)
            .unwrap_or_else(|| self.tenant.to_string());

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundRequest>(256);
        *self.outbound_tx.lock().unwrap() = Some(outbound_tx.clone());
        let mut handles = Vec::new();

        // Connect chat platforms.
        let mut connected = 0usize;
        for platform in config.active_platforms.iter().copied().filter(Platform::is_chat) {
            match self
                .connect_platform(platform, outbound_tx.clone(), cancel.clone())
                .await
            {
                Ok(handle) => {
                    handles.push(handle);
                    connected += 1;
                }
                Err(e) => {
                    warn!(tenant = %self.tenant, platform = %platform, error = %e, "platform connect failed");
                    self.record_error(&format!("{}: {}", platform, e));
                }
            }
        }
        if connected == 0 {
            return Err(WorkerError::NoPlatforms);
        }

        // Spotify is optional and chat-less; it only feeds `!song`.
        let spotify = self.connect_spotify().await;

        let mut pipeline = Pipeline::new(self.ctx.clone(), self.tenant.clone(), display_name);
        pipeline.set_spotify(spotify);

        handles.push(self.spawn_executor(pipeline, outbound_tx.clone(), cancel.clone()));
        handles.push(self.spawn_outbound_dispatcher(outbound_rx, cancel.clone()));
        handles.push(self.spawn_scheduler(outbound_tx.clone(), cancel.clone()));
        handles.push(self.spawn_heartbeat(cancel.clone()));
        handles.push(self.spawn_snapshots(cancel.clone()));
        handles.push(self.spawn_drainer(cancel.clone()));

        *self.handles.lock().unwrap() = handles;
        Ok(())
    }

    /// Open one platform session + its stats session, and spawn the
    /// ingestion forwarder.
    async fn connect_platform(
        &self,
        platform: Platform,
        outbound_tx: mpsc::Sender<OutboundRequest>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let adapter = self
            .ctx
            .adapter(platform)
            .ok_or(WorkerError::PlatformUnavailable(platform))?;
        let connection = self
            .ctx
            .store
            .connection(&self.tenant, platform)?
            .filter(|c| c.connected)
            .ok_or(WorkerError::PlatformUnavailable(platform))?;
        let access_token = self.ctx.tokens.access_token(&self.tenant, platform).await?;

        let creds = SessionCredentials {
            access_token,
            username: connection.platform_username.clone(),
            user_id: connection.platform_user_id.clone(),
            channel: connection.platform_username.clone(),
            connection_data: connection.connection_data.clone(),
        };
        let mut session = adapter.connect(creds).await?;
        let events = session
            .take_events()
            .ok_or_else(|| WorkerError::Internal("session events already taken".to_string()))?;
        let session: Arc<dyn PlatformSession> = Arc::from(session);

        let stats_session = self.ctx.stats.create_session(&self.tenant, platform)?;
        let runtime = Arc::new(PlatformRuntime {
            session,
            channel: connection.platform_username.to_lowercase(),
            stats_session_id: stats_session.id,
        });
        self.runtimes
            .write()
            .unwrap()
            .insert(platform, runtime.clone());

        Ok(self.spawn_ingestion(platform, events, runtime, outbound_tx, cancel))
    }

    async fn connect_spotify(&self) -> Option<Arc<dyn PlatformSession>> {
        let adapter = self.ctx.adapter(Platform::Spotify)?;
        let connection = self
            .ctx
            .store
            .connection(&self.tenant, Platform::Spotify)
            .ok()
            .flatten()
            .filter(|c| c.connected)?;
        let access_token = self
            .ctx
            .tokens
            .access_token(&self.tenant, Platform::Spotify)
            .await
            .ok()?;
        let creds = SessionCredentials {
            access_token,
            username: connection.platform_username.clone(),
            user_id: connection.platform_user_id.clone(),
            channel: String::new(),
            connection_data: connection.connection_data.clone(),
        };
        match adapter.connect(creds).await {
            Ok(session) => Some(Arc::from(session)),
            Err(e) => {
                debug!(tenant = %self.tenant, error = %e, "spotify connect failed, !song disabled");
                None
            }
        }
    }

    /// Forward one platform's session events into the shared inbound buffer.
    fn spawn_ingestion(
        &self,
        platform: Platform,
        mut events: mpsc::Receiver<SessionEvent>,
        runtime: Arc<PlatformRuntime>,
        outbound_tx: mpsc::Sender<OutboundRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    _ = cancel.cancelled() => break,
                };
                match event {
                    Some(SessionEvent::Chat(chat)) => inbound.push(chat),
                    Some(SessionEvent::Raid(raid)) => {
                        info!(tenant = %tenant, raider = %raid.username, viewers = raid.viewers, "incoming raid");
                        if let Some(action) = raid_shoutout(&ctx, &tenant, &raid.username) {
                            let _ = outbound_tx.try_send(OutboundRequest {
                                platform,
                                channel: runtime.channel.clone(),
                                action,
                            });
                        }
                    }
                    Some(SessionEvent::Closed { reason }) => {
                        warn!(tenant = %tenant, platform = %platform, %reason, "platform session closed");
                        ctx.bus.emit(
                            &tenant,
                            BotEventKind::Error,
                            serde_json::json!({
                                "platform": platform,
                                "message": format!("session closed: {}", reason),
                            }),
                        );
                        break;
                    }
                    None => break,
                }
            }
        })
    }

    /// The serial pipeline executor — the only task that touches pipeline
    /// state, which is what guarantees per-tenant FIFO processing.
    fn spawn_executor(
        &self,
        mut pipeline: Pipeline,
        outbound_tx: mpsc::Sender<OutboundRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let inbound = self.inbound.clone();
        let runtimes = self.runtimes.clone();
        let config_rx = self.config_tx.subscribe();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_TICK);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let event = tokio::select! {
                    event = inbound.pop() => event,
                    _ = sweep.tick() => {
                        pipeline.sweep();
                        continue;
                    }
                    _ = cancel.cancelled() => break,
                };

                let platform = event.platform;
                let channel = runtimes
                    .read()
                    .unwrap()
                    .get(&platform)
                    .map(|r| r.channel.clone())
                    .unwrap_or_else(|| event.channel.clone());

                let output = pipeline.process(&event).await;
                for action in output.actions {
                    // Never block the executor on outbound pressure; the
                    // durable queue is the overflow path.
                    if let Err(mpsc::error::TrySendError::Full(req)) =
                        outbound_tx.try_send(OutboundRequest {
                            platform,
                            channel: channel.clone(),
                            action,
                        })
                    {
                        outbound::enqueue_action(
                            &ctx,
                            &tenant,
                            req.platform,
                            &req.channel,
                            &req.action,
                            0,
                        );
                    }
                }

                if output.fact_requested {
                    spawn_fact_post(
                        ctx.clone(),
                        tenant.clone(),
                        config_rx.borrow().clone(),
                        platform,
                        channel,
                    );
                }
            }
            debug!(tenant = %tenant, "pipeline executor stopped");
        })
    }

    /// Single consumer of the outbound request channel — preserves the
    /// order actions were produced in while keeping the executor free of
    /// network waits.
    fn spawn_outbound_dispatcher(
        &self,
        mut outbound_rx: mpsc::Receiver<OutboundRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let runtimes = self.runtimes.clone();
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    request = outbound_rx.recv() => request,
                    _ = cancel.cancelled() => break,
                };
                let Some(request) = request else { break };
                let session = runtimes
                    .read()
                    .unwrap()
                    .get(&request.platform)
                    .map(|r| r.session.clone());
                let Some(session) = session else { continue };
                outbound::dispatch(
                    &ctx,
                    &tenant,
                    request.platform,
                    session.as_ref(),
                    &request.channel,
                    &request.action,
                )
                .await;
            }
        })
    }

    /// Fixed/random interval posting. Reload pushes a new config through
    /// the watch channel and the cadence re-arms immediately.
    fn spawn_scheduler(
        &self,
        outbound_tx: mpsc::Sender<OutboundRequest>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let runtimes = self.runtimes.clone();
        let mut config_rx = self.config_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let schedule = PostSchedule::from_config(&config_rx.borrow_and_update());
                let delay = schedule.next_delay(&mut rand::thread_rng());

                match delay {
                    None => {
                        // Manual mode: sleep until config changes or shutdown.
                        tokio::select! {
                            _ = config_rx.changed() => continue,
                            _ = cancel.cancelled() => break,
                        }
                    }
                    Some(delay) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = config_rx.changed() => continue,
                            _ = cancel.cancelled() => break,
                        }
                    }
                }

                let config = config_rx.borrow().clone();
                let fact = match ctx
                    .facts
                    .generate(&config.ai_model, &config.ai_prompt_template, config.ai_temperature)
                    .await
                {
                    Ok(fact) => fact,
                    Err(e) => {
                        warn!(tenant = %tenant, error = %e, "scheduled fact generation failed");
                        continue;
                    }
                };

                let targets: Vec<(Platform, String)> = runtimes
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(p, r)| (*p, r.channel.clone()))
                    .collect();
                for (platform, channel) in targets {
                    let _ = outbound_tx
                        .send(OutboundRequest {
                            platform,
                            channel,
                            action: ChatAction::Say { text: fact.clone() },
                        })
                        .await;
                }
                let _ = ctx.store.set_last_posted(&tenant, Utc::now());
            }
        })
    }

    /// 30-second liveness beacon; also drives the shared cache sweeps.
    fn spawn_heartbeat(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            let mut beat: u64 = 0;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        status.lock().unwrap().last_heartbeat = Some(Utc::now());
                        beat += 1;
                        if beat % 2 == 0 {
                            ctx.toxicity.sweep();
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// 5-minute viewer snapshots per connected platform.
    fn spawn_snapshots(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let runtimes = self.runtimes.clone();
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(VIEWER_SNAPSHOT_INTERVAL_SECS));
            // the first tick fires immediately; skip it so snapshots align
            // to the cadence after connect
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let targets: Vec<(Platform, Arc<PlatformRuntime>)> = runtimes
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(p, r)| (*p, r.clone()))
                    .collect();
                for (platform, runtime) in targets {
                    match runtime.session.stream_info(&runtime.channel).await {
                        Ok(info) if info.live => {
                            if let Err(e) = ctx
                                .stats
                                .track_viewer_count(&runtime.stats_session_id, info.viewer_count)
                            {
                                warn!(tenant = %tenant, platform = %platform, error = %e, "snapshot write failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!(tenant = %tenant, platform = %platform, error = %e, "stream info unavailable");
                        }
                    }
                }
            }
        })
    }

    /// Redrive queued outbound messages for this worker's platforms.
    fn spawn_drainer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let tenant = self.tenant.clone();
        let ctx = self.ctx.clone();
        let runtimes = self.runtimes.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_TICK);
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let targets: Vec<(Platform, Arc<PlatformRuntime>)> = runtimes
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(p, r)| (*p, r.clone()))
                    .collect();
                for (platform, runtime) in targets {
                    outbound::drain(
                        &ctx,
                        &tenant,
                        platform,
                        runtime.session.as_ref(),
                        OUTBOUND_CLAIM_BATCH,
                    )
                    .await;
                }
            }
        })
    }

    /// Graceful drain: cancel the root, give tasks the drain deadline, then
    /// abandon stragglers. Sessions close best-effort and stats sessions end.
    pub async fn stop(&self) -> Result<()> {
        match self.state() {
            WorkerState::Stopped => return Ok(()),
            WorkerState::Draining => return Ok(()),
            _ => {}
        }
        self.transition(WorkerState::Draining);

        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        *self.outbound_tx.lock().unwrap() = None;

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(DRAIN_DEADLINE_SECS);
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!(tenant = %self.tenant, "task missed drain deadline, abandoned");
            }
        }

        self.teardown_sessions().await;
        self.transition(WorkerState::Stopped);
        info!(tenant = %self.tenant, "bot worker stopped");
        Ok(())
    }

    async fn teardown_sessions(&self) {
        let runtimes: Vec<Arc<PlatformRuntime>> =
            self.runtimes.write().unwrap().drain().map(|(_, r)| r).collect();
        for runtime in runtimes {
            runtime.session.close().await;
            let _ = self.ctx.stats.end_session(&runtime.stats_session_id);
        }
    }

    /// Re-read config while running. Applies to the scheduler cadence
    /// immediately; keywords and moderation settings are read per message
    /// anyway. Platform set changes need a restart.
    pub fn reload(&self) -> Result<()> {
        let config = self.ctx.store.bot_config(&self.tenant)?;
        let _ = self.config_tx.send(config);
        info!(tenant = %self.tenant, "worker config reloaded");
        Ok(())
    }

    /// Post now, to the given platforms (or all connected when empty).
    /// Generates a fact when none is supplied.
    pub async fn post_manual(
        &self,
        platforms: &[Platform],
        fact: Option<String>,
    ) -> Result<()> {
        if self.state() != WorkerState::Running {
            return Err(WorkerError::NotRunning);
        }
        let text = match fact {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                let config = self.ctx.store.bot_config(&self.tenant)?;
                self.ctx
                    .facts
                    .generate(&config.ai_model, &config.ai_prompt_template, config.ai_temperature)
                    .await?
            }
        };
        self.announce(&text, platforms).await?;
        self.ctx.store.set_last_posted(&self.tenant, Utc::now())?;
        Ok(())
    }

    /// Post an announcement (manual posts, giveaway starts and winners).
    pub async fn announce(&self, text: &str, platforms: &[Platform]) -> Result<()> {
        if self.state() != WorkerState::Running {
            return Err(WorkerError::NotRunning);
        }
        let tx = self
            .outbound_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(WorkerError::NotRunning)?;

        let targets: Vec<(Platform, String)> = self
            .runtimes
            .read()
            .unwrap()
            .iter()
            .filter(|(p, _)| platforms.is_empty() || platforms.contains(p))
            .map(|(p, r)| (*p, r.channel.clone()))
            .collect();
        if targets.is_empty() {
            return Err(WorkerError::NoPlatforms);
        }
        for (platform, channel) in targets {
            let _ = tx
                .send(OutboundRequest {
                    platform,
                    channel,
                    action: ChatAction::Say {
                        text: text.to_string(),
                    },
                })
                .await;
        }
        Ok(())
    }

    /// Mark the worker crashed: record the error, emit it, land in Stopped.
    /// Used by the supervisor's crash monitor — there is no auto-restart.
    pub fn mark_crashed(&self, message: &str) {
        error!(tenant = %self.tenant, message, "worker crashed");
        self.record_error(message);
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.transition(WorkerState::Stopped);
    }
}

/// Generate a fact off the executor's back and queue it for delivery —
/// the pipeline never waits on the LLM.
fn spawn_fact_post(
    ctx: Arc<WorkerContext>,
    tenant: TenantId,
    config: BotConfig,
    platform: Platform,
    channel: String,
) {
    tokio::spawn(async move {
        match ctx
            .facts
            .generate(&config.ai_model, &config.ai_prompt_template, config.ai_temperature)
            .await
        {
            Ok(fact) => {
                outbound::enqueue_action(
                    &ctx,
                    &tenant,
                    platform,
                    &channel,
                    &ChatAction::Say { text: fact },
                    0,
                );
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "keyword fact generation failed");
            }
        }
    });
}
