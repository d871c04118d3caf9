//! Point query: what state is this transaction in?
//!
//! A durable index row is authoritative and answers `INDEXED`. Otherwise the live
//! receipt decides between `PENDING`, `CONFIRMED` and `FAILED`. Without a store the
//! durable lookup is skipped, so the answer can lag behind but never run ahead.

use sqlx::SqlitePool;
use tracing::debug;

use crate::chain::ChainClient;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::types::{normalize_tx_hash, TradeStatus, TradeStatusResponse};

pub async fn resolve_trade_status<C: ChainClient>(
    pool: Option<&SqlitePool>,
    chain: &C,
    tx_hash: &str,
) -> Result<TradeStatusResponse> {
    let tx_hash = normalize_tx_hash(tx_hash)
        .ok_or_else(|| AppError::InvalidInput(format!("malformed tx hash: {tx_hash}")))?;

    if let Some(pool) = pool {
        if let Some(block) = queries::included_block(pool, &tx_hash).await? {
            return Ok(TradeStatusResponse {
                tx_hash,
                state: TradeStatus::Indexed,
                included_block: Some(block),
                confirmations: None,
            });
        }
    }

    let Some(receipt) = chain.transaction_receipt(&tx_hash).await? else {
        debug!(%tx_hash, "No receipt yet");
        return Ok(TradeStatusResponse {
            tx_hash,
            state: TradeStatus::Pending,
            included_block: None,
            confirmations: None,
        });
    };

    let latest = chain.block_number().await?;
    let state = if receipt.succeeded() {
        TradeStatus::Confirmed
    } else {
        TradeStatus::Failed
    };

    Ok(TradeStatusResponse {
        tx_hash,
        state,
        included_block: Some(receipt.block_number),
        confirmations: Some(latest.saturating_sub(receipt.block_number)),
    })
}
