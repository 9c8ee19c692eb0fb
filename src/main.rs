use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use pagepulse::api::{self, StatsState, TrackState};
use pagepulse::config::{Config, DatabaseBackend};
use pagepulse::ratelimit::{FixedWindowLimiter, SystemClock};
use pagepulse::store::{
    AggregateStore, CachedStore, PostgresAggregateStore, SqliteAggregateStore,
};
use pagepulse::tracking::device::init_device_salt;
use pagepulse::tracking::{TrackingCaps, TrackingEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let backend: Arc<dyn AggregateStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteAggregateStore::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(PostgresAggregateStore::new(&config.database.url).await?)
        }
    };

    info!("Initializing database...");
    backend.init().await?;
    info!("Database initialized successfully");

    let store: Arc<dyn AggregateStore> = Arc::new(CachedStore::new(
        backend,
        config.directory_cache.max_entries,
        config.directory_cache.ttl_secs,
    ));

    init_device_salt(config.tracking.device_hash_salt.as_deref());

    let caps = TrackingCaps {
        map_keys: config.tracking.map_key_cap,
        campaign_keys: config.tracking.campaign_key_cap,
        unique_hashes: config.tracking.unique_hash_cap,
    };
    let engine = Arc::new(TrackingEngine::new(Arc::clone(&store), caps));
    info!(
        "Tracking caps: {} map keys, {} campaign keys, {} unique hashes",
        caps.map_keys, caps.campaign_keys, caps.unique_hashes
    );

    let limiter = Arc::new(FixedWindowLimiter::new(
        config.rate_limit.events,
        config.rate_limit.window_secs,
        config.rate_limit.max_tracked_ips,
        Arc::new(SystemClock),
    ));

    // Periodic TTL sweep of expired rate-limit windows
    let sweep_limiter = Arc::clone(&limiter);
    let sweep_interval = config.rate_limit.window_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            sweep_limiter.sweep();
        }
    });

    let track_router = api::create_track_router(Arc::new(TrackState {
        store: Arc::clone(&store),
        engine,
        limiter,
        ip_config: config.ip.clone(),
    }));
    let api_router = api::create_api_router(Arc::new(StatsState {
        store: Arc::clone(&store),
    }));

    let track_addr = format!("{}:{}", config.track_server.host, config.track_server.port);
    let track_listener = tokio::net::TcpListener::bind(&track_addr).await?;
    info!("🚀 Track server listening on http://{}", track_addr);
    info!("   - Beacon endpoint at http://{}/t", track_addr);

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);
    info!("   - Stats endpoints at http://{}/api/stats/...", api_addr);

    tokio::try_join!(
        axum::serve(
            track_listener,
            track_router.into_make_service_with_connect_info::<SocketAddr>(),
        ),
        axum::serve(
            api_listener,
            api_router.into_make_service_with_connect_info::<SocketAddr>(),
        ),
    )?;

    Ok(())
}
