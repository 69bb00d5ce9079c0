use poskeeper::api;
use poskeeper::cache::ConfigCache;
use poskeeper::config::Config;
use poskeeper::db::init_db;
use poskeeper::domain::{Clock, SystemClock};
use poskeeper::engine::CalcEngine;
use poskeeper::ingest::IngestionCoordinator;
use poskeeper::transport::{
    spawn_calc_workers, spawn_ingest_loop, CalcRequestBus, JsonlTradeLog,
};
use poskeeper::Repository;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config_cache = Arc::new(ConfigCache::new(
        repo.clone(),
        Duration::from_secs(config.config_refresh_secs),
    ));

    // Calc-request bus: one worker per partition keeps per-position order.
    let (bus, receivers) =
        CalcRequestBus::new(config.calc_partitions, config.calc_queue_capacity);
    let engine = Arc::new(CalcEngine::new(repo.clone(), clock.clone()));
    let _workers = spawn_calc_workers(
        receivers,
        engine,
        Duration::from_secs(config.calc_deadline_secs),
    );

    // Trade ingest loop tailing the external trade log.
    let coordinator = Arc::new(IngestionCoordinator::new(
        repo.clone(),
        config_cache.clone(),
        Arc::new(bus),
        clock.clone(),
    ));
    let trade_log = Box::new(JsonlTradeLog::new(&config.trade_log_path));
    let _ingest = spawn_ingest_loop(
        trade_log,
        coordinator,
        config.ingest_batch_size,
        Duration::from_millis(config.ingest_poll_ms),
    );

    // Query surface
    let app = api::create_router(api::AppState {
        repo,
        config_cache,
        clock,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
