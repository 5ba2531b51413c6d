use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ember_ai::{build_provider, FactGenerator, ToxicityClassifier};
use ember_core::config::EmberConfig;
use ember_core::crypto::TokenCipher;
use ember_core::types::Platform;
use ember_guard::{CircuitBreaker, QuotaTracker};
use ember_platforms::{KickAdapter, PlatformAdapter, SpotifyAdapter, TwitchAdapter, YoutubeAdapter};
use ember_queue::MessageQueue;
use ember_stats::StatsAggregator;
use ember_store::Store;
use ember_tokens::{GuardHooks, TokenManager, TokenStore};
use ember_worker::{EventBus, Supervisor, WorkerContext};

mod app;
mod auth;
mod http;

/// Token expiry scan cadence.
const EXPIRY_SCAN_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_gateway=info,ember_worker=info,tower_http=warn".into()),
        )
        .init();

    // ConfigInvalid is fatal — there is no safe way to run without secrets.
    let config = EmberConfig::load(None)?;

    let db_path = config.database.path.clone();
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(Store::open(&db_path)?);
    let token_store = Arc::new(TokenStore::open(&db_path)?);
    let queue = Arc::new(MessageQueue::open(&db_path)?);
    let stats = Arc::new(StatsAggregator::open(&db_path)?);

    let breaker = Arc::new(CircuitBreaker::new());
    let quota = Arc::new(QuotaTracker::new());
    if config.redis_url.is_some() {
        info!("REDIS_URL is set but quota counters are process-local in this build");
    }

    let cipher = Arc::new(TokenCipher::from_secret(&config.security.session_secret));

    // The breaker consumes the token manager's 429 signal and the token
    // manager records refresh outcomes — closures break what would
    // otherwise be a dependency cycle.
    let hooks = {
        let success = breaker.clone();
        let failure = breaker.clone();
        let throttle = breaker.clone();
        GuardHooks {
            record_success: Box::new(move |platform, latency| {
                success.record_success(platform, latency)
            }),
            record_failure: Box::new(move |platform| failure.record_failure(platform)),
            record_throttle: Box::new(move |platform, window| {
                throttle.record_throttle(platform, window)
            }),
        }
    };
    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        token_store.clone(),
        cipher.clone(),
        config.platforms.clone(),
        hooks,
    ));

    let mut adapters: HashMap<Platform, Arc<dyn PlatformAdapter>> = HashMap::new();
    if let Some(app) = config.platforms.twitch.as_ref() {
        adapters.insert(
            Platform::Twitch,
            Arc::new(TwitchAdapter::new(app.client_id.clone())),
        );
    }
    if config.platforms.youtube.is_some() {
        adapters.insert(Platform::Youtube, Arc::new(YoutubeAdapter::new()));
    }
    if config.platforms.kick.is_some() {
        adapters.insert(Platform::Kick, Arc::new(KickAdapter::new()));
    }
    if config.platforms.spotify.is_some() {
        adapters.insert(Platform::Spotify, Arc::new(SpotifyAdapter::new()));
    }

    let toxicity = Arc::new(ToxicityClassifier::new(if config.ai.local_only {
        None
    } else {
        config.ai.openai_api_key.clone()
    }));
    let facts = Arc::new(FactGenerator::new(build_provider(&config.ai)));

    let ctx = Arc::new(WorkerContext {
        store: store.clone(),
        stats,
        queue,
        breaker,
        quota,
        bus: Arc::new(EventBus::new(store.clone())),
        tokens: tokens.clone(),
        facts,
        toxicity,
        adapters,
    });
    let supervisor = Arc::new(Supervisor::new(ctx));
    supervisor.clone().spawn_crash_monitor();

    // Periodic token maintenance: expiry alerts + handshake pruning.
    {
        let tokens = tokens.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(EXPIRY_SCAN_SECS));
            loop {
                tick.tick().await;
                if let Err(e) = tokens.expiry_scan() {
                    warn!(error = %e, "token expiry scan failed");
                }
            }
        });
    }

    // Bring back every tenant whose bot was active.
    for tenant in store.active_tenant_ids().unwrap_or_default() {
        if let Err(e) = supervisor.start(&tenant).await {
            warn!(tenant = %tenant, error = %e, "could not resume worker on boot");
        }
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, supervisor, tokens, token_store));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Ember gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
