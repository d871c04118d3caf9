//! Drives locally tracked submissions to a terminal state by polling the status endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::api::StatusSource;
use crate::client::pending::{PendingStatus, PendingStore};
use crate::db::now_ms;
use crate::error::Result;
use crate::types::TradeStatus;

/// Views a consumer should reload after a trade lands in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    MarketDetail(String),
    MarketList,
    WalletHistory,
    WalletPositions,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub queried: usize,
    pub advanced: usize,
    pub failed: usize,
    pub indexed: usize,
    /// Pollable records still short of a terminal state.
    pub remaining: usize,
}

pub struct PendingPoller<S> {
    source: Arc<S>,
    store: Arc<PendingStore>,
    refresh: mpsc::Sender<RefreshTarget>,
    interval: Duration,
}

impl<S: StatusSource> PendingPoller<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<PendingStore>,
        refresh: mpsc::Sender<RefreshTarget>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            refresh,
            interval,
        }
    }

    /// Poll on every tick until nothing pollable is left.
    /// Cancel by dropping the task; an in-flight answer is then discarded.
    pub async fn run(&self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(summary) if summary.remaining == 0 => {
                    info!(indexed = summary.indexed, "No pending trades left to track");
                    return;
                }
                Ok(summary) => debug!(
                    queried = summary.queried,
                    advanced = summary.advanced,
                    failed = summary.failed,
                    remaining = summary.remaining,
                    "Poll tick",
                ),
                Err(e) => warn!("Pending store update failed: {e}"),
            }
        }
    }

    /// Query every pollable record concurrently, then apply all answers as one
    /// state replacement. Records only ever move forward in rank.
    ///
    /// A persist failure is returned after the refreshes for this tick are sent.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let snapshot = self.store.snapshot();
        let targets: Vec<(String, String)> = snapshot
            .iter()
            .filter(|r| r.status.is_polled())
            .filter_map(|r| r.tx_hash.clone().map(|hash| (r.client_order_id.clone(), hash)))
            .collect();

        let mut summary = PollSummary { queried: targets.len(), ..Default::default() };
        if targets.is_empty() {
            return Ok(summary);
        }

        let queries = targets.iter().map(|(_, hash)| self.source.trade_status(hash));
        let answers = join_all(queries).await;
        let results: HashMap<String, Option<TradeStatus>> = targets
            .into_iter()
            .zip(answers)
            .map(|((id, hash), answer)| match answer {
                Ok(status) => (id, Some(status.state)),
                Err(e) => {
                    debug!(tx_hash = %hash, "Status query failed: {e}");
                    (id, None)
                }
            })
            .collect();

        let now = now_ms();
        let mut indexed_markets = Vec::new();

        // Apply against the state as it is now, not the snapshot the queries came from.
        // The change lands in memory even if persisting fails, so refreshes go out first.
        let applied = self
            .store
            .modify(|records| {
                let mut changed = false;
                for record in records.iter_mut() {
                    let Some(answer) = results.get(&record.client_order_id) else {
                        continue;
                    };
                    if !record.status.is_polled() {
                        continue;
                    }
                    match answer {
                        Some(state) if state.rank() > record.trade_status().rank() => {
                            record.status = PendingStatus::from(*state);
                            record.updated_at_ms = now;
                            summary.advanced += 1;
                            if *state == TradeStatus::Indexed {
                                indexed_markets.push(record.market_id.clone());
                            }
                            changed = true;
                        }
                        Some(_) => {}
                        None => {
                            record.retry_count += 1;
                            record.updated_at_ms = now;
                            summary.failed += 1;
                            changed = true;
                        }
                    }
                }
                changed
            })
            .await;

        summary.indexed = indexed_markets.len();
        if !indexed_markets.is_empty() {
            indexed_markets.sort();
            indexed_markets.dedup();
            for market_id in indexed_markets {
                self.notify(RefreshTarget::MarketDetail(market_id));
            }
            self.notify(RefreshTarget::MarketList);
            self.notify(RefreshTarget::WalletHistory);
            self.notify(RefreshTarget::WalletPositions);
        }
        applied?;

        summary.remaining = self
            .store
            .snapshot()
            .iter()
            .filter(|r| r.tx_hash.is_some() && r.status.is_polled())
            .count();
        Ok(summary)
    }

    fn notify(&self, target: RefreshTarget) {
        match self.refresh.try_send(target) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(target)) => {
                warn!(?target, "Refresh channel full, dropping refresh");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
