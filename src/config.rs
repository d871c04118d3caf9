use crate::error::{AppError, Result};

pub const RPC_URL: &str = "http://localhost:8545";

/// Primary key of the single indexer_cursor row.
pub const CURSOR_ID: &str = "default";

/// Number of most-recent blocks withheld from indexing.
pub const DEFAULT_CONFIRMATION_LAG: u64 = 5;

/// Blocks per eth_getLogs window. Keeps queries under provider range limits.
pub const DEFAULT_BATCH_SIZE: u64 = 2_000;

/// Indexer tick interval (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Per-call JSON-RPC timeout (seconds).
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 20;

/// Maximum market addresses per eth_getLogs call.
pub const LOG_ADDRESS_CHUNK: usize = 100;

/// Client-side pending tx poll interval (seconds).
pub const CLIENT_POLL_INTERVAL_SECS: u64 = 4;

/// Channel capacity for dependent-view refresh notifications.
pub const REFRESH_CHANNEL_CAPACITY: usize = 64;

/// Default row limit for GET /trades/history.
pub const HISTORY_DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// SQLite file backing the index (DB_PATH). Unset disables indexing.
    pub db_path: Option<String>,
    /// Market factory contract (FACTORY_ADDRESS). Unset disables indexing.
    pub factory_address: Option<String>,
    /// First block to seed the cursor with (START_BLOCK). Defaults to head - lag.
    pub start_block: Option<u64>,
    pub confirmation_lag: u64,
    pub batch_size: u64,
    pub poll_interval_secs: u64,
    pub rpc_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let batch_size = parse_u64("BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(AppError::Config("BATCH_SIZE must be at least 1".to_string()));
        }

        Ok(Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or_else(|_| RPC_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            db_path: non_empty_var("DB_PATH"),
            factory_address: non_empty_var("FACTORY_ADDRESS").map(|a| a.to_lowercase()),
            start_block: match non_empty_var("START_BLOCK") {
                Some(v) => Some(v.parse::<u64>().map_err(|_| {
                    AppError::Config("START_BLOCK must be a block number".to_string())
                })?),
                None => None,
            },
            confirmation_lag: parse_u64("CONFIRMATION_LAG", DEFAULT_CONFIRMATION_LAG)?,
            batch_size,
            poll_interval_secs: parse_u64("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            rpc_timeout_secs: parse_u64("RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS)?,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match non_empty_var(key) {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer"))),
        None => Ok(default),
    }
}
