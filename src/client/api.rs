//! HTTP client for the indexer service.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::types::{HistoryEntry, PositionEntry, TradeStatusResponse};

/// Where the poller gets trade status from. The service in production, a script in tests.
pub trait StatusSource: Send + Sync + 'static {
    fn trade_status(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = Result<TradeStatusResponse>> + Send;
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn history(&self, wallet: &str, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        let mut query = vec![("wallet", wallet.to_lowercase())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let rows = self
            .http
            .get(format!("{}/trades/history", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    pub async fn positions(&self, wallet: &str) -> Result<Vec<PositionEntry>> {
        let rows = self
            .http
            .get(format!("{}/trades/positions", self.base_url))
            .query(&[("wallet", wallet.to_lowercase())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }
}

impl StatusSource for ApiClient {
    async fn trade_status(&self, tx_hash: &str) -> Result<TradeStatusResponse> {
        let status = self
            .http
            .get(format!("{}/trades/status/{}", self.base_url, tx_hash))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }
}
