//! Durable checkpoint of the last fully-indexed block, and atomic application
//! of the row effects derived from a block window.

use std::future::Future;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::config::CURSOR_ID;
use crate::db::now_ms;
use crate::error::{AppError, Result};
use crate::types::{IndexedClaim, IndexedMarket, IndexedTrade, MarketStatus, Side, Transition};

/// A position in an ordered stream plus the effects that bring a mirror up to it.
///
/// `commit` applies every effect and the position in one transaction. The stored
/// position never moves backwards: committing an older position leaves it unchanged.
pub trait Checkpoint {
    type Position;
    type Effect;
    type Summary;

    fn load(&self) -> impl Future<Output = Result<Self::Position>> + Send;

    fn commit(
        &self,
        position: Self::Position,
        effects: &[Self::Effect],
    ) -> impl Future<Output = Result<Self::Summary>> + Send;
}

/// A single idempotent write derived from one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CreateMarket(IndexedMarket),
    Lifecycle {
        market_address: String,
        next: MarketStatus,
        outcome: Option<Side>,
        block_number: u64,
    },
    RecordTrade(IndexedTrade),
    RecordClaim(IndexedClaim),
}

/// Rows actually written by one commit. Replayed effects count as zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub markets: u64,
    pub trades: u64,
    pub claims: u64,
    pub transitions: u64,
    pub rejected_transitions: u64,
}

impl std::ops::AddAssign for CommitSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.markets += rhs.markets;
        self.trades += rhs.trades;
        self.claims += rhs.claims;
        self.transitions += rhs.transitions;
        self.rejected_transitions += rhs.rejected_transitions;
    }
}

/// The `indexer_cursor` singleton row plus the indexed_* tables it guards.
/// Only the indexer task writes through this type.
#[derive(Clone)]
pub struct CursorStore {
    pool: SqlitePool,
}

impl CursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Seed the cursor row if it does not exist yet and return the stored value.
    /// An existing row always wins over `seed`.
    pub async fn initialize(&self, seed: u64) -> Result<u64> {
        sqlx::query(
            "INSERT INTO indexer_cursor (id, last_block, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(CURSOR_ID)
        .bind(to_i64(seed)?)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        self.load().await
    }

    /// None until `initialize` has run.
    pub async fn try_load(&self) -> Result<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM indexer_cursor WHERE id = ?")
                .bind(CURSOR_ID)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(b,)| b.max(0) as u64))
    }
}

impl Checkpoint for CursorStore {
    type Position = u64;
    type Effect = Effect;
    type Summary = CommitSummary;

    async fn load(&self) -> Result<u64> {
        self.try_load()
            .await?
            .ok_or_else(|| AppError::Unavailable("indexer cursor not initialized".to_string()))
    }

    async fn commit(&self, position: u64, effects: &[Effect]) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        let indexed_at = now_ms();
        let mut tx = self.pool.begin().await?;

        for effect in effects {
            apply_effect(&mut *tx, effect, indexed_at, &mut summary).await?;
        }

        let updated = sqlx::query(
            "UPDATE indexer_cursor SET last_block = MAX(last_block, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(to_i64(position)?)
        .bind(indexed_at)
        .bind(CURSOR_ID)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            // Dropping tx rolls back the effects.
            return Err(AppError::Unavailable("indexer cursor not initialized".to_string()));
        }

        tx.commit().await?;
        Ok(summary)
    }
}

async fn apply_effect(
    conn: &mut SqliteConnection,
    effect: &Effect,
    indexed_at: i64,
    summary: &mut CommitSummary,
) -> Result<()> {
    match effect {
        Effect::CreateMarket(m) => {
            // DO NOTHING: a replayed creation must not reset lifecycle state.
            let res = sqlx::query(
                "INSERT INTO indexed_market (
                    market_id, question, market_address, close_time, status,
                    resolved_outcome, create_tx_hash, create_block, indexed_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&m.market_id)
            .bind(&m.question)
            .bind(&m.market_address)
            .bind(m.close_time)
            .bind(m.status.as_str())
            .bind(m.resolved_outcome.map(|s| s.as_str()))
            .bind(&m.create_tx_hash)
            .bind(to_i64(m.create_block)?)
            .bind(indexed_at)
            .execute(&mut *conn)
            .await?;
            summary.markets += res.rows_affected();
        }
        Effect::Lifecycle { market_address, next, outcome, block_number } => {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM indexed_market WHERE market_address = ?")
                    .bind(market_address)
                    .fetch_optional(&mut *conn)
                    .await?;
            let Some(current) = current.and_then(|(s,)| MarketStatus::parse(&s)) else {
                warn!(
                    market = %market_address,
                    next = %next,
                    block_number,
                    "Lifecycle event for unknown market, skipped",
                );
                summary.rejected_transitions += 1;
                return Ok(());
            };

            match current.transition(*next) {
                Transition::Applied => {
                    sqlx::query(
                        "UPDATE indexed_market
                         SET status = ?, resolved_outcome = COALESCE(?, resolved_outcome)
                         WHERE market_address = ?",
                    )
                    .bind(next.as_str())
                    .bind(outcome.map(|s| s.as_str()))
                    .bind(market_address)
                    .execute(&mut *conn)
                    .await?;
                    summary.transitions += 1;
                }
                Transition::AlreadyApplied => {
                    debug!(
                        market = %market_address,
                        status = %current,
                        "Lifecycle event already applied",
                    );
                }
                Transition::Rejected => {
                    warn!(
                        market = %market_address,
                        from = %current,
                        to = %next,
                        block_number,
                        "Out-of-order lifecycle event rejected: {current} -> {next}",
                    );
                    summary.rejected_transitions += 1;
                }
            }
        }
        Effect::RecordTrade(t) => {
            let res = sqlx::query(
                "INSERT INTO indexed_trade (
                    tx_hash, log_index, market_address, wallet_address,
                    action, side, amount, block_number, indexed_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(tx_hash, log_index) DO NOTHING",
            )
            .bind(&t.tx_hash)
            .bind(to_i64(t.log_index)?)
            .bind(&t.market_address)
            .bind(&t.wallet_address)
            .bind(t.action.as_str())
            .bind(t.side.as_str())
            .bind(&t.amount)
            .bind(to_i64(t.block_number)?)
            .bind(indexed_at)
            .execute(&mut *conn)
            .await?;
            summary.trades += res.rows_affected();
        }
        Effect::RecordClaim(c) => {
            let res = sqlx::query(
                "INSERT INTO indexed_claim (
                    tx_hash, log_index, market_address, wallet_address,
                    amount, block_number, indexed_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(tx_hash, log_index) DO NOTHING",
            )
            .bind(&c.tx_hash)
            .bind(to_i64(c.log_index)?)
            .bind(&c.market_address)
            .bind(&c.wallet_address)
            .bind(&c.amount)
            .bind(to_i64(c.block_number)?)
            .bind(indexed_at)
            .execute(&mut *conn)
            .await?;
            summary.claims += res.rows_affected();
        }
    }
    Ok(())
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v)
        .map_err(|_| AppError::Decode(format!("value {v} exceeds SQLite INTEGER range")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
