//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries.

use crate::error::{AppError, Result};
use crate::types::{Action, HistoryEntry, HistoryKind, Side, TradeStatus};

#[derive(Debug, sqlx::FromRow)]
pub struct MarketRow {
    pub market_id: String,
    pub question: String,
    pub market_address: String,
    pub close_time: i64,
    pub status: String,
    pub resolved_outcome: Option<String>,
    pub create_tx_hash: String,
    pub create_block: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TradeRow {
    pub tx_hash: String,
    pub log_index: i64,
    pub market_address: String,
    pub wallet_address: String,
    pub action: String,
    pub side: String,
    pub amount: String,
    pub block_number: i64,
    pub indexed_at: i64,
}

/// One row of a wallet's history: a trade or a claim, joined to its market.
#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    /// "TRADE" or "CLAIM".
    pub kind: String,
    pub tx_hash: String,
    pub log_index: i64,
    pub market_address: String,
    pub market_id: Option<String>,
    pub action: Option<String>,
    pub side: Option<String>,
    pub amount: String,
    pub block_number: i64,
    pub indexed_at: i64,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let kind = match row.kind.as_str() {
            "TRADE" => HistoryKind::Trade,
            "CLAIM" => HistoryKind::Claim,
            other => return Err(AppError::Decode(format!("unknown history kind {other}"))),
        };
        let action = row
            .action
            .as_deref()
            .map(|a| {
                Action::parse(a).ok_or_else(|| AppError::Decode(format!("unknown action {a}")))
            })
            .transpose()?;
        let side = row
            .side
            .as_deref()
            .map(|s| Side::parse(s).ok_or_else(|| AppError::Decode(format!("unknown side {s}"))))
            .transpose()?;

        Ok(HistoryEntry {
            tx_hash: row.tx_hash,
            log_index: row.log_index.max(0) as u64,
            kind,
            market_address: row.market_address,
            market_id: row.market_id,
            action,
            side,
            amount: row.amount,
            block_number: row.block_number.max(0) as u64,
            indexed_at: row.indexed_at,
            state: TradeStatus::Indexed,
        })
    }
}
