use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Action::Buy),
            "SELL" => Some(Action::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome side. On-chain encoding: 0 = YES, 1 = NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn from_index(i: u64) -> Option<Self> {
        match i {
            0 => Some(Side::Yes),
            1 => Some(Side::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "YES" => Some(Side::Yes),
            "NO" => Some(Side::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Trade status
// ---------------------------------------------------------------------------

/// Derived status of a submitted transaction. Never stored.
///
/// Ordered by `rank()`: both terminal states outrank both non-terminal ones, and
/// `Indexed` outranks `Failed` because a durable row is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Indexed,
    Failed,
}

impl TradeStatus {
    pub fn rank(&self) -> u8 {
        match self {
            TradeStatus::Pending => 0,
            TradeStatus::Confirmed => 1,
            TradeStatus::Failed => 2,
            TradeStatus::Indexed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Indexed | TradeStatus::Failed)
    }

    /// The more advanced of two observations for the same transaction.
    pub fn max(self, other: TradeStatus) -> TradeStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Confirmed => "CONFIRMED",
            TradeStatus::Indexed => "INDEXED",
            TradeStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Market lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Open,
    Closed,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Resolved => "RESOLVED",
            MarketStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(MarketStatus::Open),
            "CLOSED" => Some(MarketStatus::Closed),
            "RESOLVED" => Some(MarketStatus::Resolved),
            "CANCELLED" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }

    /// Guarded lifecycle: OPEN → CLOSED → RESOLVED, OPEN → CANCELLED.
    ///
    /// Returns `Applied` for a legal forward step, `AlreadyApplied` when the market
    /// already sits in `next` (replayed log), `Rejected` otherwise.
    pub fn transition(self, next: MarketStatus) -> Transition {
        use MarketStatus::*;
        match (self, next) {
            (Open, Closed) | (Closed, Resolved) | (Open, Cancelled) => Transition::Applied,
            (a, b) if a == b => Transition::AlreadyApplied,
            _ => Transition::Rejected,
        }
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyApplied,
    Rejected,
}

// ---------------------------------------------------------------------------
// Indexed rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedMarket {
    pub market_id: String,
    pub question: String,
    pub market_address: String,
    pub close_time: i64,
    pub status: MarketStatus,
    pub resolved_outcome: Option<Side>,
    pub create_tx_hash: String,
    pub create_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedTrade {
    pub tx_hash: String,
    pub log_index: u64,
    pub market_address: String,
    pub wallet_address: String,
    pub action: Action,
    pub side: Side,
    /// Raw uint256 share amount, decimal.
    pub amount: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedClaim {
    pub tx_hash: String,
    pub log_index: u64,
    pub market_address: String,
    pub wallet_address: String,
    pub amount: String,
    pub block_number: u64,
}

// ---------------------------------------------------------------------------
// Wire shapes shared by the HTTP API and its client
// ---------------------------------------------------------------------------

/// Body of `GET /trades/status/:tx_hash`. Absent fields are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStatusResponse {
    pub tx_hash: String,
    pub state: TradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryKind {
    Trade,
    Claim,
}

/// One server-confirmed row of a wallet's history. Always `INDEXED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub tx_hash: String,
    pub log_index: u64,
    pub kind: HistoryKind,
    pub market_address: String,
    #[serde(default)]
    pub market_id: Option<String>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub side: Option<Side>,
    pub amount: String,
    pub block_number: u64,
    /// Ms since epoch when the row was first indexed.
    pub indexed_at: i64,
    pub state: TradeStatus,
}

/// Net shares held in one market outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub market_address: String,
    #[serde(default)]
    pub market_id: Option<String>,
    pub side: Side,
    /// Bought minus sold, decimal. May be negative if history is partial.
    pub shares: String,
}

/// Lowercase `0x`-prefixed 32-byte hash, or None if malformed.
pub fn normalize_tx_hash(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    let hex_part = lower.strip_prefix("0x")?;
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(lower)
}

/// Lowercase `0x`-prefixed 20-byte address, or None if malformed.
pub fn normalize_address(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    let hex_part = lower.strip_prefix("0x")?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(lower)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
