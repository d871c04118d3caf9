//! Read-only chain access used by the indexer and the trade status resolver.

pub mod rpc;

#[cfg(test)]
pub mod mock;

use std::future::Future;

use alloy::primitives::{hex, Address};

use crate::error::Result;

pub use rpc::RpcChainClient;

/// An event log with its position in the chain resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Emitting contract, topics and ABI data.
    pub inner: alloy::primitives::Log,
    pub block_number: u64,
    /// Lowercase.
    pub transaction_hash: String,
    pub log_index: u64,
    /// Set by providers for logs dropped by a reorg.
    pub removed: bool,
}

impl Log {
    /// Emitting contract, lowercase.
    pub fn address(&self) -> String {
        format_address(self.inner.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// 1 = success, 0 = reverted.
    pub status: u64,
    pub block_number: u64,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// Lowercase `0x` form used for every address the service stores or compares.
pub fn format_address(address: Address) -> String {
    hex::encode_prefixed(address)
}

/// The subset of JSON-RPC the service depends on.
///
/// Methods return `Send` futures so indexer passes can run on spawned tasks.
pub trait ChainClient: Send + Sync + 'static {
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Logs emitted by any of `addresses` in the inclusive range `[from_block, to_block]`.
    fn get_logs(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>>> + Send;

    /// None while the transaction is unmined (or unknown).
    fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<Option<Receipt>>> + Send;
}
