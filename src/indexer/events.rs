//! Known contract events and their decoding.

use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::chain::{format_address, Log};
use crate::types::{Action, Side};

sol! {
    /// Emitted by the factory for every market it deploys.
    #[derive(Debug)]
    event MarketCreated(
        uint256 indexed marketId,
        address indexed market,
        string question,
        uint256 closeTime
    );

    #[derive(Debug)]
    event SharesBought(address indexed trader, uint8 side, uint256 amount);

    #[derive(Debug)]
    event SharesSold(address indexed trader, uint8 side, uint256 amount);

    #[derive(Debug)]
    event MarketClosed();

    /// `outcome` uses the side encoding: 0 = YES, 1 = NO.
    #[derive(Debug)]
    event MarketResolved(uint8 outcome);

    #[derive(Debug)]
    event MarketCancelled();

    #[derive(Debug)]
    event Claimed(address indexed user, uint256 amount);
}

/// A decoded log, still tied to its emitting contract via the source `Log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    MarketCreated {
        market_id: String,
        market_address: String,
        question: String,
        close_time: i64,
    },
    Trade {
        action: Action,
        side: Side,
        wallet: String,
        amount: String,
    },
    Closed,
    Resolved {
        outcome: Side,
    },
    Cancelled,
    Claimed {
        wallet: String,
        amount: String,
    },
}

/// Decode a log against the known signatures.
///
/// None means "irrelevant": unknown topic0, or a payload that does not match the
/// signature's layout. Callers skip such logs.
pub fn parse_log(log: &Log) -> Option<ChainEvent> {
    let topic0 = *log.inner.topics().first()?;

    match topic0 {
        sig if sig == MarketCreated::SIGNATURE_HASH => {
            let event = MarketCreated::decode_log(&log.inner).ok()?;
            Some(ChainEvent::MarketCreated {
                market_id: event.marketId.to_string(),
                market_address: format_address(event.market),
                question: event.question.clone(),
                close_time: i64::try_from(event.closeTime).ok()?,
            })
        }
        sig if sig == SharesBought::SIGNATURE_HASH => {
            let event = SharesBought::decode_log(&log.inner).ok()?;
            trade(Action::Buy, event.side, format_address(event.trader), event.amount.to_string())
        }
        sig if sig == SharesSold::SIGNATURE_HASH => {
            let event = SharesSold::decode_log(&log.inner).ok()?;
            trade(Action::Sell, event.side, format_address(event.trader), event.amount.to_string())
        }
        sig if sig == MarketClosed::SIGNATURE_HASH => {
            MarketClosed::decode_log(&log.inner).ok()?;
            Some(ChainEvent::Closed)
        }
        sig if sig == MarketResolved::SIGNATURE_HASH => {
            let event = MarketResolved::decode_log(&log.inner).ok()?;
            let outcome = Side::from_index(u64::from(event.outcome))?;
            Some(ChainEvent::Resolved { outcome })
        }
        sig if sig == MarketCancelled::SIGNATURE_HASH => {
            MarketCancelled::decode_log(&log.inner).ok()?;
            Some(ChainEvent::Cancelled)
        }
        sig if sig == Claimed::SIGNATURE_HASH => {
            let event = Claimed::decode_log(&log.inner).ok()?;
            Some(ChainEvent::Claimed {
                wallet: format_address(event.user),
                amount: event.amount.to_string(),
            })
        }
        _ => None,
    }
}

fn trade(action: Action, side: u8, wallet: String, amount: String) -> Option<ChainEvent> {
    let side = Side::from_index(u64::from(side))?;
    Some(ChainEvent::Trade {
        action,
        side,
        wallet,
        amount,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
