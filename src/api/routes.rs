use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use bigdecimal::{BigDecimal, Zero};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, SyncLatency};
use crate::chain::ChainClient;
use crate::config::HISTORY_DEFAULT_LIMIT;
use crate::db::models::TradeRow;
use crate::db::queries;
use crate::error::AppError;
use crate::resolver::resolve_trade_status;
use crate::types::{
    normalize_address, Action, HistoryEntry, PositionEntry, Side, TradeStatusResponse,
};

const HISTORY_MAX_LIMIT: i64 = 1_000;

pub struct ApiState<C> {
    /// None when the service runs without an index.
    pub pool: Option<SqlitePool>,
    pub chain: Arc<C>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

impl<C> Clone for ApiState<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            chain: Arc::clone(&self.chain),
            health: Arc::clone(&self.health),
            latency: Arc::clone(&self.latency),
        }
    }
}

impl<C> ApiState<C> {
    fn pool(&self) -> Result<&SqlitePool, AppError> {
        self.pool
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("indexing is disabled".to_string()))
    }
}

pub fn router<C: ChainClient>(state: ApiState<C>) -> Router {
    Router::new()
        .route("/trades/status/:tx_hash", get(get_trade_status::<C>))
        .route("/trades/history", get(get_history::<C>))
        .route("/trades/positions", get(get_positions::<C>))
        .route("/health", get(get_health::<C>))
        .route("/stats/sync", get(get_sync_stats::<C>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub wallet: String,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PositionsQuery {
    pub wallet: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_trade_status<C: ChainClient>(
    State(state): State<ApiState<C>>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TradeStatusResponse>, AppError> {
    let status = resolve_trade_status(state.pool.as_ref(), state.chain.as_ref(), &tx_hash).await?;
    Ok(Json(status))
}

async fn get_history<C: ChainClient>(
    State(state): State<ApiState<C>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let pool = state.pool()?;
    let wallet = parse_wallet(&params.wallet)?;
    let limit = params.limit.unwrap_or(HISTORY_DEFAULT_LIMIT).clamp(1, HISTORY_MAX_LIMIT);

    let rows = queries::wallet_history(pool, &wallet, limit).await?;
    let entries = rows
        .into_iter()
        .map(HistoryEntry::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(entries))
}

async fn get_positions<C: ChainClient>(
    State(state): State<ApiState<C>>,
    Query(params): Query<PositionsQuery>,
) -> Result<Json<Vec<PositionEntry>>, AppError> {
    let pool = state.pool()?;
    let wallet = parse_wallet(&params.wallet)?;

    let trades = queries::wallet_trades(pool, &wallet).await?;
    let mut positions = net_positions(&trades)?;

    let mut market_ids: HashMap<String, Option<String>> = HashMap::new();
    for position in &mut positions {
        if !market_ids.contains_key(&position.market_address) {
            let market = queries::market_by_address(pool, &position.market_address).await?;
            market_ids.insert(position.market_address.clone(), market.map(|m| m.market_id));
        }
        position.market_id = market_ids.get(&position.market_address).cloned().flatten();
    }
    Ok(Json(positions))
}

async fn get_health<C: ChainClient>(State(state): State<ApiState<C>>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_sync_stats<C: ChainClient>(State(state): State<ApiState<C>>) -> Json<SyncLatency> {
    Json(state.latency.snapshot())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_wallet(raw: &str) -> Result<String, AppError> {
    normalize_address(raw)
        .ok_or_else(|| AppError::InvalidInput(format!("malformed wallet address: {raw}")))
}

/// Bought minus sold per (market, side). Flat positions are left out.
fn net_positions(trades: &[TradeRow]) -> Result<Vec<PositionEntry>, AppError> {
    let mut totals: BTreeMap<(String, &'static str), (Side, BigDecimal)> = BTreeMap::new();

    for trade in trades {
        let side = Side::parse(&trade.side)
            .ok_or_else(|| AppError::Decode(format!("unknown side {}", trade.side)))?;
        let action = Action::parse(&trade.action)
            .ok_or_else(|| AppError::Decode(format!("unknown action {}", trade.action)))?;
        let amount = BigDecimal::from_str(&trade.amount)
            .map_err(|e| AppError::Decode(format!("amount {}: {e}", trade.amount)))?;

        let entry = totals
            .entry((trade.market_address.clone(), side.as_str()))
            .or_insert_with(|| (side, BigDecimal::zero()));
        match action {
            Action::Buy => entry.1 += amount,
            Action::Sell => entry.1 -= amount,
        }
    }

    Ok(totals
        .into_iter()
        .filter(|(_, (_, shares))| !shares.is_zero())
        .map(|((market_address, _), (side, shares))| PositionEntry {
            market_address,
            market_id: None,
            side,
            shares: shares.to_string(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
