use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::chain::{ChainClient, Log};
use crate::config::LOG_ADDRESS_CHUNK;
use crate::db::{queries, Checkpoint, CommitSummary, CursorStore, Effect};
use crate::error::Result;
use crate::indexer::events::{parse_log, ChainEvent};
use crate::types::{IndexedClaim, IndexedMarket, IndexedTrade, MarketStatus, Side};

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// Market factory contract, lowercase.
    pub factory_address: String,
    pub confirmation_lag: u64,
    /// Blocks per window. At least 1.
    pub batch_size: u64,
}

/// Single-flight policy: a pass requested while `Running` is skipped, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another pass was in flight.
    Skipped,
    /// Nothing final enough to index beyond the cursor.
    UpToDate { cursor: u64, target: u64 },
    /// Cursor moved from `from` to `to` after `windows` committed windows.
    Advanced {
        from: u64,
        to: u64,
        windows: u64,
        summary: CommitSummary,
    },
}

/// Resets the state to `Idle` on every exit path of a pass.
struct RunGuard<'a> {
    state: &'a Mutex<IndexerState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = IndexerState::Idle;
    }
}

/// Scans confirmation-lagged block ranges and mirrors market, trade and claim
/// events into the index.
pub struct EventIndexer<C> {
    chain: Arc<C>,
    store: CursorStore,
    settings: IndexerSettings,
    state: Mutex<IndexerState>,
    /// Market contracts whose creation has been committed.
    markets: DashSet<String>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl<C: ChainClient> EventIndexer<C> {
    pub fn new(
        chain: Arc<C>,
        store: CursorStore,
        settings: IndexerSettings,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            chain,
            store,
            settings,
            state: Mutex::new(IndexerState::Idle),
            markets: DashSet::new(),
            health,
            latency,
        }
    }

    pub fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the cursor on first run and load known markets.
    ///
    /// The cursor is the last block already covered, so `start_block = n` seeds `n - 1`
    /// and block `n` is scanned first. Block 0 is never scanned: genesis emits no logs,
    /// and `start_block` 0 and 1 both seed cursor 0.
    ///
    /// With no `start_block` the seed is `head - lag`, so a fresh deployment does not
    /// replay chain history. An existing cursor is always kept.
    pub async fn bootstrap(&self, start_block: Option<u64>) -> Result<u64> {
        let cursor = match self.store.try_load().await? {
            Some(cursor) => cursor,
            None => {
                let seed = match start_block {
                    Some(start) => start.saturating_sub(1),
                    None => {
                        let head = self.chain.block_number().await?;
                        head.saturating_sub(self.settings.confirmation_lag)
                    }
                };
                self.store.initialize(seed).await?
            }
        };

        for address in queries::market_addresses(self.store.pool()).await? {
            self.markets.insert(address);
        }

        self.health.set_last_indexed_block(cursor);
        info!(
            cursor,
            markets = self.markets.len(),
            factory = %self.settings.factory_address,
            "Indexer ready at block {cursor}",
        );
        Ok(cursor)
    }

    /// Tick forever. Each tick runs on its own task so a slow pass never delays the
    /// timer; ticks landing on a running pass are skipped by `sync_once`.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let indexer = Arc::clone(&self);
            tokio::spawn(async move { indexer.tick().await });
        }
    }

    async fn tick(&self) {
        match self.sync_once().await {
            Ok(SyncOutcome::Skipped) => debug!("Indexer busy, tick skipped"),
            Ok(SyncOutcome::UpToDate { cursor, target }) => {
                debug!(cursor, target, "Indexer up to date")
            }
            Ok(SyncOutcome::Advanced { from, to, windows, summary }) => info!(
                from,
                to,
                windows,
                markets = summary.markets,
                trades = summary.trades,
                claims = summary.claims,
                transitions = summary.transitions,
                rejected = summary.rejected_transitions,
                "Indexed blocks {}..={to}",
                from + 1,
            ),
            Err(e) => {
                self.health.record_failure();
                error!("Indexer sync failed, cursor unchanged: {e}");
            }
        }
    }

    /// One pass over `(cursor, head - lag]`.
    ///
    /// Every window commits atomically; the cursor moves to the target only after all
    /// windows have committed. Any error aborts the pass with the cursor untouched, and
    /// the next pass re-scans the range (every write is idempotent).
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            return Ok(SyncOutcome::Skipped);
        };
        self.health.set_syncing(true);
        let started = Instant::now();
        let result = self.sync_pass().await;
        self.health.set_syncing(false);
        self.latency.record(started.elapsed());
        result
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == IndexerState::Running {
            return None;
        }
        *state = IndexerState::Running;
        Some(RunGuard { state: &self.state })
    }

    async fn sync_pass(&self) -> Result<SyncOutcome> {
        let cursor = self.store.load().await?;
        let head = self.chain.block_number().await?;
        self.health.set_chain_head(head);

        let target = head.saturating_sub(self.settings.confirmation_lag);
        if target <= cursor {
            self.health.record_success(cursor);
            return Ok(SyncOutcome::UpToDate { cursor, target });
        }

        let mut summary = CommitSummary::default();
        let mut windows = 0u64;
        let mut from = cursor + 1;

        while from <= target {
            let to = from.saturating_add(self.settings.batch_size - 1).min(target);
            let (effects, created) = self.collect_window(from, to).await?;

            // The window is durable but the pass is not: keep the cursor where it was.
            summary += self.store.commit(cursor, &effects).await?;
            for address in created {
                self.markets.insert(address);
            }

            debug!(from, to, effects = effects.len(), "Window committed");
            windows += 1;
            from = to + 1;
        }

        self.store.commit(target, &[]).await?;
        self.health.record_success(target);

        Ok(SyncOutcome::Advanced { from: cursor, to: target, windows, summary })
    }

    /// Fetch and decode one window. Returns its effects in chain order plus the
    /// market addresses it creates.
    async fn collect_window(&self, from: u64, to: u64) -> Result<(Vec<Effect>, Vec<String>)> {
        let factory = self.settings.factory_address.clone();
        let factory_logs = self.chain.get_logs(std::slice::from_ref(&factory), from, to).await?;

        let created: Vec<String> = factory_logs
            .iter()
            .filter(|log| !log.removed)
            .filter_map(|log| match parse_log(log) {
                Some(ChainEvent::MarketCreated { market_address, .. }) => Some(market_address),
                _ => None,
            })
            .filter(|address| !self.markets.contains(address))
            .collect();

        // Known markets plus the ones created in this very window.
        let mut addresses: Vec<String> = self.markets.iter().map(|a| a.key().clone()).collect();
        addresses.extend(created.iter().cloned());
        addresses.sort();
        addresses.dedup();

        let mut logs = factory_logs;
        for chunk in addresses.chunks(LOG_ADDRESS_CHUNK) {
            logs.extend(self.chain.get_logs(chunk, from, to).await?);
        }

        logs.retain(|log| !log.removed);
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        let mut seen = HashSet::new();
        logs.retain(|log| seen.insert((log.transaction_hash.clone(), log.log_index)));

        let effects = logs.iter().filter_map(|log| self.effect_for(log)).collect();
        Ok((effects, created))
    }

    fn effect_for(&self, log: &Log) -> Option<Effect> {
        let emitter = log.address();
        let Some(event) = parse_log(log) else {
            debug!(
                address = %emitter,
                tx_hash = %log.transaction_hash,
                log_index = log.log_index,
                "Skipping unrecognized log",
            );
            return None;
        };
        let from_factory = emitter == self.settings.factory_address;

        let effect = match event {
            ChainEvent::MarketCreated {
                market_id,
                market_address,
                question,
                close_time,
            } if from_factory => Effect::CreateMarket(IndexedMarket {
                market_id,
                question,
                market_address,
                close_time,
                status: MarketStatus::Open,
                resolved_outcome: None,
                create_tx_hash: log.transaction_hash.clone(),
                create_block: log.block_number,
            }),
            // Market events only count when emitted by a market, not the factory.
            _ if from_factory => return None,
            ChainEvent::MarketCreated { .. } => return None,
            ChainEvent::Trade {
                action,
                side,
                wallet,
                amount,
            } => Effect::RecordTrade(IndexedTrade {
                tx_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
                market_address: emitter,
                wallet_address: wallet,
                action,
                side,
                amount,
                block_number: log.block_number,
            }),
            ChainEvent::Claimed { wallet, amount } => Effect::RecordClaim(IndexedClaim {
                tx_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
                market_address: emitter,
                wallet_address: wallet,
                amount,
                block_number: log.block_number,
            }),
            ChainEvent::Closed => lifecycle(emitter, log, MarketStatus::Closed, None),
            ChainEvent::Resolved { outcome } => {
                lifecycle(emitter, log, MarketStatus::Resolved, Some(outcome))
            }
            ChainEvent::Cancelled => lifecycle(emitter, log, MarketStatus::Cancelled, None),
        };
        Some(effect)
    }
}

fn lifecycle(
    market_address: String,
    log: &Log,
    next: MarketStatus,
    outcome: Option<Side>,
) -> Effect {
    Effect::Lifecycle {
        market_address,
        next,
        outcome,
        block_number: log.block_number,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{logs, MockChain};
    use crate::db::test_pool;
    use tokio::sync::Notify;

    async fn setup(
        head: u64,
        lag: u64,
        batch_size: u64,
    ) -> (Arc<MockChain>, EventIndexer<MockChain>) {
        let chain = MockChain::new(head);
        let indexer = EventIndexer::new(
            Arc::clone(&chain),
            CursorStore::new(test_pool().await),
            IndexerSettings {
                factory_address: logs::FACTORY.to_string(),
                confirmation_lag: lag,
                batch_size,
            },
            Arc::new(HealthState::new()),
            Arc::new(LatencyStats::new()),
        );
        (chain, indexer)
    }

    async fn count(indexer: &EventIndexer<MockChain>, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(indexer.store.pool())
            .await
            .unwrap();
        n
    }

    async fn cursor(indexer: &EventIndexer<MockChain>) -> u64 {
        indexer.store.load().await.unwrap()
    }

    #[tokio::test]
    async fn bootstrap_seeds_head_minus_lag() {
        let (_chain, indexer) = setup(1_000, 12, 100).await;
        assert_eq!(indexer.bootstrap(None).await.unwrap(), 988);
    }

    #[tokio::test]
    async fn bootstrap_keeps_existing_cursor() {
        let (chain, indexer) = setup(1_000, 12, 100).await;
        indexer.bootstrap(Some(500)).await.unwrap();
        chain.set_head(5_000);
        assert_eq!(indexer.bootstrap(None).await.unwrap(), 499);
    }

    #[tokio::test]
    async fn start_block_is_the_first_block_scanned() {
        let (_chain, indexer) = setup(50, 0, 100).await;
        indexer.bootstrap(Some(10)).await.unwrap();
        assert!(matches!(
            indexer.sync_once().await.unwrap(),
            SyncOutcome::Advanced { from: 9, to: 50, .. }
        ));

        // Genesis has no logs; scanning from 0 and from 1 is the same pass.
        for start in [0, 1] {
            let (chain, indexer) = setup(50, 0, 100).await;
            assert_eq!(indexer.bootstrap(Some(start)).await.unwrap(), 0);
            indexer.sync_once().await.unwrap();
            assert_eq!(chain.log_queries().first().map(|(from, _)| *from), Some(1));
        }
    }

    #[tokio::test]
    async fn respects_confirmation_lag() {
        let (chain, indexer) = setup(100, 5, 1_000).await;
        let market = logs::market_address(1);
        chain.push_log(logs::market_created(1, &market, "Q", 0, 10, "0x01"));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 10, 95, "0x95", 0));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 10, 96, "0x96", 0));
        indexer.bootstrap(Some(1)).await.unwrap();

        let outcome = indexer.sync_once().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Advanced { from: 0, to: 95, .. }));
        assert_eq!(cursor(&indexer).await, 95);
        assert!(chain.log_queries().iter().all(|(_, to)| *to <= 95));

        let block_96: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM indexed_trade WHERE tx_hash = '0x96'")
                .fetch_one(indexer.store.pool())
                .await
                .unwrap();
        assert_eq!(block_96.0, 0);
        assert_eq!(count(&indexer, "indexed_trade").await, 1);

        // Nothing new is final: no-op.
        let outcome = indexer.sync_once().await.unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate { cursor: 95, target: 95 });
    }

    #[tokio::test]
    async fn scans_in_batch_windows() {
        let (chain, indexer) = setup(25, 0, 10).await;
        indexer.bootstrap(Some(1)).await.unwrap();

        let outcome = indexer.sync_once().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Advanced { windows: 3, .. }));
        // No markets known yet: one factory query per window.
        assert_eq!(chain.log_queries(), vec![(1, 10), (11, 20), (21, 25)]);
    }

    #[tokio::test]
    async fn market_created_and_traded_in_same_window() {
        let (chain, indexer) = setup(50, 0, 100).await;
        let market = logs::market_address(3);
        chain.push_log(logs::market_created(3, &market, "Same window?", 0, 20, "0x20"));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 1, 77, 21, "0x21", 0));
        chain.push_log(logs::claimed(&market, &logs::wallet(1), 70, 30, "0x30", 1));
        indexer.bootstrap(Some(1)).await.unwrap();

        let outcome = indexer.sync_once().await.unwrap();
        match outcome {
            SyncOutcome::Advanced { summary, .. } => {
                assert_eq!((summary.markets, summary.trades, summary.claims), (1, 1, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
        let market_row = queries::market_by_address(indexer.store.pool(), &market)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(market_row.market_id, "3");
        assert_eq!(market_row.status, "OPEN");
    }

    #[tokio::test]
    async fn replaying_a_range_does_not_duplicate_rows() {
        let (chain, indexer) = setup(60, 0, 20).await;
        let market = logs::market_address(1);
        chain.push_log(logs::market_created(1, &market, "Q", 0, 5, "0x05"));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 10, 15, "0xaa", 0));
        chain.push_log(logs::trade(&market, false, &logs::wallet(1), 0, 4, 15, "0xaa", 1));
        chain.push_log(logs::claimed(&market, &logs::wallet(2), 3, 45, "0xbb", 0));
        indexer.bootstrap(Some(1)).await.unwrap();
        indexer.sync_once().await.unwrap();
        assert_eq!(count(&indexer, "indexed_trade").await, 2);
        assert_eq!(count(&indexer, "indexed_claim").await, 1);

        // Simulate a crash between row writes and the cursor update.
        sqlx::query("UPDATE indexer_cursor SET last_block = 0")
            .execute(indexer.store.pool())
            .await
            .unwrap();

        let outcome = indexer.sync_once().await.unwrap();
        match outcome {
            SyncOutcome::Advanced { to, summary, .. } => {
                assert_eq!(to, 60);
                assert_eq!(summary, CommitSummary::default());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(count(&indexer, "indexed_trade").await, 2);
        assert_eq!(count(&indexer, "indexed_claim").await, 1);
        assert_eq!(count(&indexer, "indexed_market").await, 1);
    }

    #[tokio::test]
    async fn failed_pass_leaves_cursor_untouched() {
        let (chain, indexer) = setup(40, 0, 10).await;
        let market = logs::market_address(1);
        chain.push_log(logs::market_created(1, &market, "Q", 0, 2, "0x02"));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 10, 5, "0x05", 0));
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 10, 35, "0x35", 0));
        indexer.bootstrap(Some(1)).await.unwrap();

        chain.fail_logs_at(Some(25));
        assert!(indexer.sync_once().await.is_err());
        assert_eq!(cursor(&indexer).await, 0);
        assert_eq!(indexer.state(), IndexerState::Idle);
        // Window 1..=10 committed before the failure.
        assert_eq!(count(&indexer, "indexed_trade").await, 1);

        chain.fail_logs_at(None);
        indexer.sync_once().await.unwrap();
        assert_eq!(cursor(&indexer).await, 40);
        assert_eq!(count(&indexer, "indexed_trade").await, 2);
    }

    #[tokio::test]
    async fn cursor_is_monotonic_across_passes() {
        let (chain, indexer) = setup(30, 5, 7).await;
        indexer.bootstrap(Some(1)).await.unwrap();

        let mut last = cursor(&indexer).await;
        for head in [30, 28, 45, 45, 20, 90] {
            chain.set_head(head);
            let _ = indexer.sync_once().await.unwrap();
            let now = cursor(&indexer).await;
            assert!(now >= last, "cursor regressed from {last} to {now}");
            assert!(now <= head.saturating_sub(5).max(last));
            last = now;
        }
        assert_eq!(last, 85);
    }

    #[tokio::test]
    async fn unknown_and_removed_logs_are_skipped() {
        let (chain, indexer) = setup(20, 0, 100).await;
        let market = logs::market_address(1);
        chain.push_log(logs::market_created(1, &market, "Q", 0, 2, "0x02"));
        chain.push_log(logs::unknown(&market, 3, "0x03", 0));
        chain.push_log(logs::unknown(logs::FACTORY, 3, "0x03", 1));
        let mut removed = logs::trade(&market, true, &logs::wallet(1), 0, 1, 4, "0x04", 0);
        removed.removed = true;
        chain.push_log(removed);
        chain.push_log(logs::trade(&market, true, &logs::wallet(1), 0, 1, 5, "0x05", 0));
        indexer.bootstrap(Some(1)).await.unwrap();

        indexer.sync_once().await.unwrap();
        assert_eq!(cursor(&indexer).await, 20);
        assert_eq!(count(&indexer, "indexed_trade").await, 1);
    }

    #[tokio::test]
    async fn market_events_from_factory_are_ignored() {
        let (chain, indexer) = setup(20, 0, 100).await;
        let market = logs::market_address(1);
        chain.push_log(logs::market_created(1, &market, "Q", 0, 2, "0x02"));
        // A trade-shaped log from the factory, and a creation-shaped log from a market.
        chain.push_log(logs::trade(logs::FACTORY, true, &logs::wallet(1), 0, 1, 3, "0x03", 0));
        let mut spoofed = logs::market_created(2, &logs::market_address(2), "Spoof", 0, 4, "0x04");
        spoofed.inner.address = market.parse().unwrap();
        chain.push_log(spoofed);
        indexer.bootstrap(Some(1)).await.unwrap();

        indexer.sync_once().await.unwrap();
        assert_eq!(count(&indexer, "indexed_trade").await, 0);
        assert_eq!(count(&indexer, "indexed_market").await, 1);
    }

    #[tokio::test]
    async fn lifecycle_applies_across_windows_and_rejects_out_of_order() {
        let (chain, indexer) = setup(100, 0, 10).await;
        let a = logs::market_address(1);
        let b = logs::market_address(2);
        chain.push_log(logs::market_created(1, &a, "A", 0, 1, "0x01"));
        chain.push_log(logs::market_created(2, &b, "B", 0, 1, "0x11"));
        chain.push_log(logs::closed(&a, 15, "0x15", 0));
        chain.push_log(logs::resolved(&a, 1, 55, "0x55", 0));
        // B resolves without ever closing.
        chain.push_log(logs::resolved(&b, 0, 60, "0x60", 0));
        indexer.bootstrap(Some(1)).await.unwrap();

        match indexer.sync_once().await.unwrap() {
            SyncOutcome::Advanced { summary, .. } => {
                assert_eq!(summary.transitions, 2);
                assert_eq!(summary.rejected_transitions, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        let a_row = queries::market_by_address(indexer.store.pool(), &a).await.unwrap().unwrap();
        assert_eq!(
            (a_row.status.as_str(), a_row.resolved_outcome.as_deref()),
            ("RESOLVED", Some("NO"))
        );
        let b_row = queries::market_by_address(indexer.store.pool(), &b).await.unwrap().unwrap();
        assert_eq!(b_row.status, "OPEN");
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped_not_queued() {
        let (chain, indexer) = setup(50, 0, 100).await;
        indexer.bootstrap(Some(1)).await.unwrap();
        let indexer = Arc::new(indexer);

        let gate = Arc::new(Notify::new());
        chain.set_gate(Arc::clone(&gate));

        let first = tokio::spawn({
            let indexer = Arc::clone(&indexer);
            async move { indexer.sync_once().await }
        });
        while indexer.state() != IndexerState::Running {
            tokio::task::yield_now().await;
        }

        assert_eq!(indexer.sync_once().await.unwrap(), SyncOutcome::Skipped);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SyncOutcome::Advanced { to: 50, .. }));
        assert_eq!(indexer.state(), IndexerState::Idle);
    }
}
