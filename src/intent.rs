//! Requests consumed from upstream collaborators and results handed back.
//!
//! Authenticity (signatures, nonces, oracle capability) is settled before a
//! request reaches the engine; these are plain, already-trusted values.

use serde::{Deserialize, Serialize};

use crate::curve::fees::FeeSplit;
use crate::curve::math::Reserves;
use crate::curve::migration::CurveStatus;

pub type TokenId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub token_id: TokenId,
    pub direction: Direction,
    /// Gross base paid in for a buy, tokens handed back for a sell.
    pub amount: u128,
    #[serde(default)]
    pub min_out: u128,
    pub trader: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorPush {
    pub token_id: TokenId,
    pub new_factor_bps: u32,
    pub as_of: u64,
    pub caller_is_oracle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTrigger {
    pub token_id: TokenId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUpdate {
    pub token_id: TokenId,
    pub fee_bps: u32,
    pub founder_share_of_fee_bps: u32,
}

/// Outcome of a committed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub direction: Direction,
    pub amount_in: u128,
    /// Tokens to the trader on a buy, net base to the trader on a sell.
    pub amount_out: u128,
    pub fees: FeeSplit,
    pub factor_bps: u32,
    pub reserves_after: Reserves,
    pub real_base_after: u128,
    pub paid_out_base_after: u128,
    pub total_issued_after: u128,
    pub new_status: CurveStatus,
    pub migration_triggered: bool,
    pub seq: u64,
}

/// What a trade would do right now, without committing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePreview {
    pub direction: Direction,
    pub amount_in: u128,
    pub amount_out: u128,
    pub fees: FeeSplit,
    pub reserves_after: Reserves,
    pub price_after: u128,
}
