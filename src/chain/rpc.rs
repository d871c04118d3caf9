use std::sync::Arc;
use std::time::Duration;

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{hex, Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{Filter, Log as RpcLog};
use alloy::transports::http::Http;
use tracing::debug;

use crate::chain::{ChainClient, Log, Receipt};
use crate::error::{AppError, Result};

type BoxedProvider = Arc<dyn Provider<Ethereum> + Send + Sync>;

/// JSON-RPC client over HTTP, backed by an alloy provider.
pub struct RpcChainClient {
    provider: BoxedProvider,
}

impl RpcChainClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url: reqwest::Url = url
            .parse()
            .map_err(|e| AppError::Config(format!("invalid RPC_URL {url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let client = RpcClient::new(Http::with_client(http, url), false);
        let provider = ProviderBuilder::new().connect_client(client);

        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| AppError::Rpc(format!("eth_blockNumber failed: {e}")))
    }

    async fn get_logs(
        &self,
        addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let parsed = addresses
            .iter()
            .map(|a| {
                a.parse::<Address>()
                    .map_err(|e| AppError::InvalidInput(format!("bad address {a}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = Filter::new()
            .address(parsed)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| AppError::Rpc(format!("eth_getLogs failed: {e}")))?;

        debug!(
            from_block,
            to_block,
            addresses = addresses.len(),
            logs = logs.len(),
            "eth_getLogs"
        );
        logs.into_iter().map(convert_log).collect()
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("malformed tx hash {tx_hash}: {e}")))?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| AppError::Rpc(format!("eth_getTransactionReceipt failed: {e}")))?;

        // A receipt without a block is not mined yet.
        Ok(receipt.and_then(|r| {
            r.block_number().map(|block_number| Receipt {
                status: u64::from(r.status()),
                block_number,
            })
        }))
    }
}

/// Ranged `eth_getLogs` results always carry their position; anything else is malformed.
fn convert_log(log: RpcLog) -> Result<Log> {
    let missing = |field: &str| AppError::Decode(format!("log without {field}"));
    Ok(Log {
        block_number: log.block_number.ok_or_else(|| missing("blockNumber"))?,
        transaction_hash: hex::encode_prefixed(
            log.transaction_hash.ok_or_else(|| missing("transactionHash"))?,
        ),
        log_index: log.log_index.ok_or_else(|| missing("logIndex"))?,
        removed: log.removed,
        inner: log.inner,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
