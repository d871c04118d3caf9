//! In-memory chain used by tests: scripted head, logs and receipts, with failure injection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::chain::{ChainClient, Log, Receipt};
use crate::error::{AppError, Result};

#[derive(Default)]
struct Inner {
    head: u64,
    logs: Vec<Log>,
    receipts: HashMap<String, Receipt>,
    /// get_logs fails for any range containing this block.
    fail_logs_at: Option<u64>,
    fail_receipts: bool,
    /// (from, to) of every get_logs call.
    log_queries: Vec<(u64, u64)>,
}

#[derive(Default)]
pub struct MockChain {
    inner: Mutex<Inner>,
    /// When set, block_number() waits for a notification before answering.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.set_head(head);
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.inner.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: Log) {
        self.inner.lock().unwrap().logs.push(log);
    }

    pub fn set_receipt(&self, tx_hash: &str, receipt: Receipt) {
        self.inner
            .lock()
            .unwrap()
            .receipts
            .insert(tx_hash.to_lowercase(), receipt);
    }

    pub fn fail_logs_at(&self, block: Option<u64>) {
        self.inner.lock().unwrap().fail_logs_at = block;
    }

    pub fn fail_receipts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_receipts = fail;
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.inner.lock().unwrap().log_queries.clone()
    }

    pub fn set_gate(&self, gate: Arc<Notify>) {
        *self.gate.lock().unwrap() = Some(gate);
    }
}

impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.inner.lock().unwrap().head)
    }

    async fn get_logs(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        let mut inner = self.inner.lock().unwrap();
        inner.log_queries.push((from_block, to_block));
        if let Some(bad) = inner.fail_logs_at {
            if (from_block..=to_block).contains(&bad) {
                return Err(AppError::Rpc(format!("injected failure at block {bad}")));
            }
        }
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
            .filter(|l| addresses.contains(&l.address()))
            .cloned()
            .collect())
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_receipts {
            return Err(AppError::Rpc("injected receipt failure".to_string()));
        }
        Ok(inner.receipts.get(&tx_hash.to_lowercase()).copied())
    }
}

// ---------------------------------------------------------------------------
// Log builders
// ---------------------------------------------------------------------------

pub mod logs {
    use alloy::primitives::{Address, Bytes, LogData, B256, U256};
    use alloy::sol_types::SolEvent;

    use crate::chain::Log;
    use crate::indexer::events::{
        Claimed, MarketCancelled, MarketClosed, MarketCreated, MarketResolved, SharesBought,
        SharesSold,
    };

    pub const FACTORY: &str = "0xfac0000000000000000000000000000000000001";

    pub fn market_address(n: u8) -> String {
        format!("0x{}{:02x}", "ab".repeat(19), n)
    }

    pub fn wallet(n: u8) -> String {
        format!("0x{}{:02x}", "cd".repeat(19), n)
    }

    fn address(raw: &str) -> Address {
        raw.parse().expect("test address")
    }

    fn raw(address_hex: &str, data: LogData, block: u64, tx: &str, idx: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: address(address_hex),
                data,
            },
            block_number: block,
            transaction_hash: tx.to_lowercase(),
            log_index: idx,
            removed: false,
        }
    }

    /// ABI-encode `event` as emitted by `emitter`.
    pub fn from_event<E: SolEvent>(
        emitter: &str,
        event: &E,
        block: u64,
        tx: &str,
        idx: u64,
    ) -> Log {
        raw(emitter, event.encode_log_data(), block, tx, idx)
    }

    pub fn market_created(
        market_id: u64,
        market: &str,
        question: &str,
        close_time: u64,
        block: u64,
        tx: &str,
    ) -> Log {
        let event = MarketCreated {
            marketId: U256::from(market_id),
            market: address(market),
            question: question.to_string(),
            closeTime: U256::from(close_time),
        };
        from_event(FACTORY, &event, block, tx, 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn trade(
        market: &str,
        buy: bool,
        trader: &str,
        side: u8,
        amount: u64,
        block: u64,
        tx: &str,
        idx: u64,
    ) -> Log {
        let (trader, amount) = (address(trader), U256::from(amount));
        if buy {
            from_event(market, &SharesBought { trader, side, amount }, block, tx, idx)
        } else {
            from_event(market, &SharesSold { trader, side, amount }, block, tx, idx)
        }
    }

    pub fn claimed(market: &str, user: &str, amount: u64, block: u64, tx: &str, idx: u64) -> Log {
        let event = Claimed {
            user: address(user),
            amount: U256::from(amount),
        };
        from_event(market, &event, block, tx, idx)
    }

    pub fn closed(market: &str, block: u64, tx: &str, idx: u64) -> Log {
        from_event(market, &MarketClosed {}, block, tx, idx)
    }

    pub fn resolved(market: &str, outcome: u8, block: u64, tx: &str, idx: u64) -> Log {
        from_event(market, &MarketResolved { outcome }, block, tx, idx)
    }

    pub fn cancelled(market: &str, block: u64, tx: &str, idx: u64) -> Log {
        from_event(market, &MarketCancelled {}, block, tx, idx)
    }

    /// A log from a known address with an unrecognized signature.
    pub fn unknown(emitter: &str, block: u64, tx: &str, idx: u64) -> Log {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], Bytes::new());
        raw(emitter, data, block, tx, idx)
    }
}
