//! Locally tracked trade submissions.
//!
//! State lives in a `watch` channel holding an immutable snapshot. Every change
//! replaces the whole snapshot, so readers never observe a half-applied update.
//! When a path is configured the snapshot is mirrored to a JSON file after each change.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::db::now_ms;
use crate::error::Result;
use crate::types::{Action, Side, TradeStatus};

/// Client-side lifecycle of a submission. Finer grained than `TradeStatus`: the
/// first states exist before the transaction reaches the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Draft,
    AwaitingSignature,
    Submitted,
    Pending,
    Confirmed,
    Indexed,
    Failed,
    Rejected,
    Expired,
}

impl PendingStatus {
    pub fn trade_status(self) -> TradeStatus {
        match self {
            PendingStatus::Draft
            | PendingStatus::AwaitingSignature
            | PendingStatus::Submitted
            | PendingStatus::Pending => TradeStatus::Pending,
            PendingStatus::Confirmed => TradeStatus::Confirmed,
            PendingStatus::Indexed => TradeStatus::Indexed,
            PendingStatus::Failed | PendingStatus::Rejected | PendingStatus::Expired => {
                TradeStatus::Failed
            }
        }
    }

    /// States the poller asks the resolver about.
    pub fn is_polled(self) -> bool {
        matches!(
            self,
            PendingStatus::Submitted | PendingStatus::Pending | PendingStatus::Confirmed
        )
    }

    pub fn is_terminal(self) -> bool {
        self.trade_status().is_terminal()
    }
}

impl From<TradeStatus> for PendingStatus {
    fn from(status: TradeStatus) -> Self {
        match status {
            TradeStatus::Pending => PendingStatus::Pending,
            TradeStatus::Confirmed => PendingStatus::Confirmed,
            TradeStatus::Indexed => PendingStatus::Indexed,
            TradeStatus::Failed => PendingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTradeRecord {
    pub client_order_id: String,
    /// Set once the transaction has been broadcast. Lowercase.
    #[serde(default)]
    pub tx_hash: Option<String>,
    pub market_id: String,
    pub action: Action,
    pub side: Side,
    pub amount: String,
    pub status: PendingStatus,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl PendingTradeRecord {
    pub fn new(
        client_order_id: impl Into<String>,
        market_id: impl Into<String>,
        action: Action,
        side: Side,
        amount: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            client_order_id: client_order_id.into(),
            tx_hash: None,
            market_id: market_id.into(),
            action,
            side,
            amount: amount.into(),
            status: PendingStatus::Draft,
            retry_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Record the broadcast hash and move to `Submitted`.
    pub fn submitted(mut self, tx_hash: &str) -> Self {
        self.tx_hash = Some(tx_hash.to_lowercase());
        self.status = PendingStatus::Submitted;
        self.updated_at_ms = now_ms();
        self
    }

    pub fn trade_status(&self) -> TradeStatus {
        self.status.trade_status()
    }
}

pub type Snapshot = Arc<Vec<PendingTradeRecord>>;

pub struct PendingStore {
    state: watch::Sender<Snapshot>,
    path: Option<PathBuf>,
    /// Held across write and rename so file updates never interleave.
    file: Mutex<()>,
}

impl PendingStore {
    pub fn in_memory() -> Self {
        let (state, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            state,
            path: None,
            file: Mutex::new(()),
        }
    }

    /// Load from `path` if it exists, otherwise start empty. Changes are written back.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<PendingTradeRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "Pending store loaded");
        let (state, _) = watch::channel(Arc::new(records));
        Ok(Self {
            state,
            path: Some(path),
            file: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    /// Insert, or replace the record with the same `client_order_id`.
    pub async fn upsert(&self, record: PendingTradeRecord) -> Result<()> {
        self.modify(|records| {
            match records.iter_mut().find(|r| r.client_order_id == record.client_order_id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            true
        })
        .await?;
        Ok(())
    }

    pub async fn remove(&self, client_order_id: &str) -> Result<bool> {
        self.modify(|records| {
            let before = records.len();
            records.retain(|r| r.client_order_id != client_order_id);
            records.len() != before
        })
        .await
    }

    /// Apply `f` to a copy of the current state. If it reports a change the copy
    /// replaces the state in one step and is persisted.
    ///
    /// The in-memory change stands even when persisting fails; the error only
    /// reports that the file is behind.
    pub async fn modify<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<PendingTradeRecord>) -> bool,
    {
        let changed = self.state.send_if_modified(|state| {
            let mut next: Vec<PendingTradeRecord> = (**state).clone();
            if f(&mut next) {
                *state = Arc::new(next);
                true
            } else {
                false
            }
        });
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _file = self.file.lock().await;
        // Taken under the lock, so the last writer always holds the newest state.
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec_pretty(&*snapshot)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> PendingTradeRecord {
        PendingTradeRecord::new(id, "1", Action::Buy, Side::Yes, "100")
    }

    #[test]
    fn pending_status_maps_onto_trade_status() {
        use PendingStatus::*;
        for s in [Draft, AwaitingSignature, Submitted, Pending] {
            assert_eq!(s.trade_status(), TradeStatus::Pending);
            assert!(!s.is_terminal());
        }
        assert_eq!(Confirmed.trade_status(), TradeStatus::Confirmed);
        assert_eq!(Indexed.trade_status(), TradeStatus::Indexed);
        for s in [Failed, Rejected, Expired] {
            assert_eq!(s.trade_status(), TradeStatus::Failed);
            assert!(s.is_terminal());
        }
        assert!(!Draft.is_polled());
        assert!(Confirmed.is_polled());
        assert!(!Indexed.is_polled());
    }

    #[tokio::test]
    async fn upsert_replaces_whole_snapshot() {
        let store = PendingStore::in_memory();
        let rx = store.subscribe();
        let before = store.snapshot();

        store.upsert(record("a")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        store.upsert(record("a").submitted("0xABC")).await.unwrap();

        let after = store.snapshot();
        assert!(before.is_empty());
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(after[0].status, PendingStatus::Submitted);
    }

    #[tokio::test]
    async fn unchanged_modify_does_not_notify() {
        let store = PendingStore::in_memory();
        let mut rx = store.subscribe();
        let _ = rx.borrow_and_update();
        assert!(!store.modify(|_| false).await.unwrap());
        assert!(!rx.has_changed().unwrap());
        assert!(!store.remove("missing").await.unwrap());
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let path = std::env::temp_dir().join(format!("pending-{}.json", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let store = PendingStore::open(&path).await.unwrap();
        store.upsert(record("a").submitted("0x01")).await.unwrap();
        store.upsert(record("b")).await.unwrap();
        drop(store);

        let reopened = PendingStore::open(&path).await.unwrap();
        let ids: Vec<_> = reopened.snapshot().iter().map(|r| r.client_order_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_persist_keeps_the_change_in_memory() {
        let path = std::env::temp_dir()
            .join(format!("missing-dir-{}", std::process::id()))
            .join("pending.json");
        let store = PendingStore::open(&path).await.unwrap();

        assert!(store.upsert(record("a")).await.is_err());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_all_persist() {
        let path = std::env::temp_dir().join(format!("pending-race-{}.json", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;
        let store = Arc::new(PendingStore::open(&path).await.unwrap());

        let tasks: Vec<_> = (0..200)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.upsert(record(&format!("order-{i}"))).await })
            })
            .collect();
        for task in futures_util::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }
        assert_eq!(store.snapshot().len(), 200);

        let reopened = PendingStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().len(), 200);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
