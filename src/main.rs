use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use market_indexer::api::health::HealthState;
use market_indexer::api::latency::LatencyStats;
use market_indexer::api::{router, ApiState};
use market_indexer::chain::RpcChainClient;
use market_indexer::config::Config;
use market_indexer::db::{self, CursorStore};
use market_indexer::error::Result;
use market_indexer::indexer::{EventIndexer, IndexerSettings};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let chain = Arc::new(RpcChainClient::new(
        &cfg.rpc_url,
        Duration::from_secs(cfg.rpc_timeout_secs),
    )?);
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Database setup ---
    let pool = open_store(&cfg).await;

    // --- Event indexer ---
    match indexing_inputs(pool.as_ref(), cfg.factory_address.as_deref()) {
        Ok((pool, factory)) => {
            let indexer = Arc::new(EventIndexer::new(
                Arc::clone(&chain),
                CursorStore::new(pool.clone()),
                IndexerSettings {
                    factory_address: factory.to_string(),
                    confirmation_lag: cfg.confirmation_lag,
                    batch_size: cfg.batch_size,
                },
                Arc::clone(&health),
                Arc::clone(&latency),
            ));
            match indexer.bootstrap(cfg.start_block).await {
                Ok(_) => {
                    health.set_indexing_enabled(true);
                    let interval = Duration::from_secs(cfg.poll_interval_secs);
                    tokio::spawn(async move { indexer.run(interval).await });
                }
                Err(e) => warn!("Indexer bootstrap failed, indexing disabled: {e}"),
            }
        }
        Err(reason) => warn!("{reason}, indexing disabled"),
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        pool,
        chain,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// A missing or broken store downgrades the service to API-only instead of failing it.
async fn open_store(cfg: &Config) -> Option<SqlitePool> {
    let path = cfg.db_path.as_deref()?;
    match db::connect(path).await {
        Ok(pool) => {
            info!("Database ready at {path}");
            Some(pool)
        }
        Err(e) => {
            warn!("Database unavailable at {path}: {e}");
            None
        }
    }
}

/// Indexing needs both a store and a factory address. Without either the API still serves.
fn indexing_inputs<P, F>(
    pool: Option<P>,
    factory: Option<F>,
) -> std::result::Result<(P, F), &'static str> {
    match (pool, factory) {
        (Some(pool), Some(factory)) => Ok((pool, factory)),
        (_, None) => Err("FACTORY_ADDRESS not set"),
        (None, Some(_)) => Err("No store available"),
    }
}
