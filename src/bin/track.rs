//! Tracks submitted trades until each reaches a terminal state, then prints the
//! merged activity feed.
//!
//! Usage:
//!   track                                               resume tracking stored submissions
//!   track <tx_hash> <market_id> <BUY|SELL> <YES|NO> <amount>   add a submission first
//!
//! Environment: API_URL (default http://localhost:3000), PENDING_STORE_PATH, WALLET, LOG_LEVEL.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use market_indexer::client::{
    unify, ApiClient, PendingPoller, PendingStore, PendingTradeRecord, RefreshTarget,
};
use market_indexer::config::{
    CLIENT_POLL_INTERVAL_SECS, DEFAULT_RPC_TIMEOUT_SECS, REFRESH_CHANNEL_CAPACITY,
};
use market_indexer::error::{AppError, Result};
use market_indexer::types::{normalize_address, normalize_tx_hash, Action, Side};

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&log_level))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> Result<()> {
    let base_url =
        std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let wallet = match std::env::var("WALLET") {
        Ok(raw) => Some(
            normalize_address(&raw)
                .ok_or_else(|| AppError::Config(format!("WALLET is not an address: {raw}")))?,
        ),
        Err(_) => None,
    };

    let store = Arc::new(match std::env::var("PENDING_STORE_PATH") {
        Ok(path) if !path.is_empty() => PendingStore::open(path).await?,
        _ => PendingStore::in_memory(),
    });

    if !args.is_empty() {
        let record = parse_submission(&args)?;
        info!(tx_hash = ?record.tx_hash, market_id = %record.market_id, "Tracking submission");
        store.upsert(record).await?;
    }

    let timeout = Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS);
    let client = Arc::new(ApiClient::new(&base_url, timeout)?);
    let (refresh_tx, mut refresh_rx) = mpsc::channel(REFRESH_CHANNEL_CAPACITY);

    let refresher = {
        let client = Arc::clone(&client);
        let wallet = wallet.clone();
        tokio::spawn(async move {
            while let Some(target) = refresh_rx.recv().await {
                match (target, &wallet) {
                    (RefreshTarget::WalletPositions, Some(wallet)) => {
                        match client.positions(wallet).await {
                            Ok(positions) => {
                                for p in positions {
                                    info!(
                                        market = %p.market_address,
                                        side = %p.side,
                                        shares = %p.shares,
                                        "Position",
                                    );
                                }
                            }
                            Err(e) => warn!("Positions refresh failed: {e}"),
                        }
                    }
                    (target, _) => info!(?target, "Refresh requested"),
                }
            }
        })
    };

    let poller = PendingPoller::new(
        Arc::clone(&client),
        Arc::clone(&store),
        refresh_tx,
        Duration::from_secs(CLIENT_POLL_INTERVAL_SECS),
    );
    poller.run().await;
    drop(poller);
    let _ = refresher.await;

    let history = match &wallet {
        Some(wallet) => client.history(wallet, None).await?,
        None => Vec::new(),
    };
    for item in unify(&store.snapshot(), &history) {
        println!(
            "{:<68} {:<10} {:>6} {:<5} {:<4} {}",
            item.key,
            item.status,
            item.market_id.as_deref().unwrap_or("-"),
            item.action.map(|a| a.to_string()).unwrap_or_else(|| "CLAIM".to_string()),
            item.side.map(|s| s.to_string()).unwrap_or_default(),
            item.amount,
        );
    }
    Ok(())
}

fn parse_submission(args: &[String]) -> Result<PendingTradeRecord> {
    let [tx_hash, market_id, action, side, amount] = args else {
        return Err(AppError::InvalidInput(
            "expected <tx_hash> <market_id> <BUY|SELL> <YES|NO> <amount>".to_string(),
        ));
    };
    let tx_hash = normalize_tx_hash(tx_hash)
        .ok_or_else(|| AppError::InvalidInput(format!("malformed tx hash: {tx_hash}")))?;
    let action = Action::parse(&action.to_uppercase())
        .ok_or_else(|| AppError::InvalidInput(format!("action must be BUY or SELL: {action}")))?;
    let side = Side::parse(&side.to_uppercase())
        .ok_or_else(|| AppError::InvalidInput(format!("side must be YES or NO: {side}")))?;

    let record =
        PendingTradeRecord::new(tx_hash.clone(), market_id.as_str(), action, side, amount.as_str());
    Ok(record.submitted(&tx_hash))
}
