//! One feed out of two sources: locally pending submissions and server history.
//!
//! Rows are keyed by transaction hash. For each hash the reported status is the
//! maximum over every source under `TradeStatus::rank`, so a stale source can never
//! pull a row backwards. Submissions that have not been broadcast yet have no hash
//! and are keyed by their client order id instead.

use std::collections::HashMap;

use serde::Serialize;

use crate::client::pending::PendingTradeRecord;
use crate::types::{Action, HistoryEntry, HistoryKind, Side, TradeStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    /// Lowercase tx hash, or `order:<client_order_id>` before broadcast.
    pub key: String,
    pub tx_hash: Option<String>,
    pub client_order_id: Option<String>,
    pub kind: HistoryKind,
    pub market_id: Option<String>,
    pub market_address: Option<String>,
    pub action: Option<Action>,
    pub side: Option<Side>,
    pub amount: String,
    pub status: TradeStatus,
    pub block_number: Option<u64>,
    /// Ms since epoch. Pending creation time when known, else the indexing time.
    pub recency_ms: i64,
}

pub fn unify(pending: &[PendingTradeRecord], history: &[HistoryEntry]) -> Vec<ActivityItem> {
    let mut rows: HashMap<String, ActivityItem> = HashMap::new();

    for entry in history {
        let key = entry.tx_hash.to_lowercase();
        match rows.get_mut(&key) {
            // Several logs in one transaction collapse into one row.
            Some(row) => row.status = row.status.max(entry.state),
            None => {
                rows.insert(
                    key.clone(),
                    ActivityItem {
                        key,
                        tx_hash: Some(entry.tx_hash.to_lowercase()),
                        client_order_id: None,
                        kind: entry.kind,
                        market_id: entry.market_id.clone(),
                        market_address: Some(entry.market_address.clone()),
                        action: entry.action,
                        side: entry.side,
                        amount: entry.amount.clone(),
                        status: entry.state,
                        block_number: Some(entry.block_number),
                        recency_ms: entry.indexed_at,
                    },
                );
            }
        }
    }

    for record in pending {
        let tx_hash = record.tx_hash.as_deref().map(str::to_lowercase);
        let key = match &tx_hash {
            Some(hash) => hash.clone(),
            None => format!("order:{}", record.client_order_id),
        };
        let status = record.trade_status();

        match rows.get_mut(&key) {
            Some(row) => {
                row.status = row.status.max(status);
                row.client_order_id = Some(record.client_order_id.clone());
                row.market_id.get_or_insert_with(|| record.market_id.clone());
                row.recency_ms = record.created_at_ms;
            }
            None => {
                rows.insert(
                    key.clone(),
                    ActivityItem {
                        key,
                        tx_hash,
                        client_order_id: Some(record.client_order_id.clone()),
                        kind: HistoryKind::Trade,
                        market_id: Some(record.market_id.clone()),
                        market_address: None,
                        action: Some(record.action),
                        side: Some(record.side),
                        amount: record.amount.clone(),
                        status,
                        block_number: None,
                        recency_ms: record.created_at_ms,
                    },
                );
            }
        }
    }

    let mut items: Vec<ActivityItem> = rows.into_values().collect();
    items.sort_by(|a, b| b.recency_ms.cmp(&a.recency_ms).then_with(|| a.key.cmp(&b.key)));
    items
}
