//! Read-side queries over the index. Never written through.

use sqlx::SqlitePool;

use crate::db::models::{HistoryRow, MarketRow, TradeRow};
use crate::error::Result;

/// Block of the durable trade or claim row for `tx_hash`, if one exists.
pub async fn included_block(pool: &SqlitePool, tx_hash: &str) -> Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT block_number FROM indexed_trade WHERE tx_hash = ?1
         UNION ALL
         SELECT block_number FROM indexed_claim WHERE tx_hash = ?1
         LIMIT 1",
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(b,)| b.max(0) as u64))
}

/// Every market contract the indexer has discovered.
pub async fn market_addresses(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT market_address FROM indexed_market ORDER BY create_block")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

pub async fn market_by_address(
    pool: &SqlitePool,
    market_address: &str,
) -> Result<Option<MarketRow>> {
    let row = sqlx::query_as::<_, MarketRow>(
        "SELECT market_id, question, market_address, close_time, status,
                resolved_outcome, create_tx_hash, create_block
         FROM indexed_market WHERE market_address = ?",
    )
    .bind(market_address)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Trades and claims for a wallet, newest block first.
pub async fn wallet_history(
    pool: &SqlitePool,
    wallet: &str,
    limit: i64,
) -> Result<Vec<HistoryRow>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT 'TRADE' AS kind, t.tx_hash, t.log_index, t.market_address, m.market_id,
                t.action, t.side, t.amount, t.block_number, t.indexed_at
         FROM indexed_trade t
         LEFT JOIN indexed_market m ON m.market_address = t.market_address
         WHERE t.wallet_address = ?1
         UNION ALL
         SELECT 'CLAIM' AS kind, c.tx_hash, c.log_index, c.market_address, m.market_id,
                NULL AS action, NULL AS side, c.amount, c.block_number, c.indexed_at
         FROM indexed_claim c
         LEFT JOIN indexed_market m ON m.market_address = c.market_address
         WHERE c.wallet_address = ?1
         ORDER BY block_number DESC, log_index DESC
         LIMIT ?2",
    )
    .bind(wallet)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All trades for a wallet, oldest first. Input to position aggregation.
pub async fn wallet_trades(pool: &SqlitePool, wallet: &str) -> Result<Vec<TradeRow>> {
    let rows = sqlx::query_as::<_, TradeRow>(
        "SELECT tx_hash, log_index, market_address, wallet_address, action, side,
                amount, block_number, indexed_at
         FROM indexed_trade
         WHERE wallet_address = ?
         ORDER BY block_number, log_index",
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
