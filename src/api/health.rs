//! Shared indexer health for the /health endpoint.
//! Written by the indexer task, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::db::now_ms;

/// Consecutive failed passes before health reports `degraded`.
const DEGRADED_AFTER_FAILURES: u64 = 3;

#[derive(Default)]
pub struct HealthState {
    /// False when the service runs API-only (no store or no factory configured).
    indexing_enabled: AtomicBool,
    /// True while a sync pass is in flight.
    syncing: AtomicBool,
    last_indexed_block: AtomicU64,
    /// Latest head observed by the indexer (0 = none yet).
    chain_head: AtomicU64,
    /// Millisecond timestamp of the last successful pass (0 = none).
    last_success_at_ms: AtomicU64,
    consecutive_failures: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub indexing_enabled: bool,
    pub syncing: bool,
    pub last_indexed_block: u64,
    pub chain_head: u64,
    /// Blocks between the head and the cursor, confirmation lag included.
    pub blocks_behind: u64,
    pub last_success_at_ms: u64,
    pub consecutive_failures: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_indexing_enabled(&self, v: bool) {
        self.indexing_enabled.store(v, Ordering::Relaxed);
    }

    pub fn set_syncing(&self, v: bool) {
        self.syncing.store(v, Ordering::Relaxed);
    }

    pub fn set_chain_head(&self, head: u64) {
        self.chain_head.store(head, Ordering::Relaxed);
    }

    pub fn set_last_indexed_block(&self, block: u64) {
        self.last_indexed_block.fetch_max(block, Ordering::Relaxed);
    }

    pub fn record_success(&self, cursor: u64) {
        self.set_last_indexed_block(cursor);
        self.last_success_at_ms.store(now_ms().max(0) as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let indexing_enabled = self.indexing_enabled.load(Ordering::Relaxed);
        let last_indexed_block = self.last_indexed_block.load(Ordering::Relaxed);
        let chain_head = self.chain_head.load(Ordering::Relaxed);
        let consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);

        let status = if !indexing_enabled {
            "disabled"
        } else if consecutive_failures >= DEGRADED_AFTER_FAILURES {
            "degraded"
        } else {
            "ok"
        };

        HealthSnapshot {
            status,
            indexing_enabled,
            syncing: self.syncing.load(Ordering::Relaxed),
            last_indexed_block,
            chain_head,
            blocks_behind: chain_head.saturating_sub(last_indexed_block),
            last_success_at_ms: self.last_success_at_ms.load(Ordering::Relaxed),
            consecutive_failures,
        }
    }
}
