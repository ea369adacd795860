//! Read-only views derived from reserve state: migration progress and market cap.

use serde::{Deserialize, Serialize};

use super::math::{narrow, U256, PRICE_SCALE};
use crate::error::CurveResult;

/// `min(100, floor(real_base * 100 / threshold))`.
pub fn progress_pct(real_base: u128, migration_threshold: u128) -> u8 {
    if migration_threshold == 0 {
        return 100;
    }
    let pct = U256::from(real_base) * U256::from(100u8) / U256::from(migration_threshold);
    if pct >= U256::from(100u8) {
        100
    } else {
        pct.low_u64() as u8
    }
}

/// `floor(total_issued * price / PRICE_SCALE)` at the current quote price.
pub fn market_cap(total_issued: u128, price: u128) -> CurveResult<u128> {
    let cap = U256::from(total_issued) * U256::from(price) / U256::from(PRICE_SCALE);
    narrow(cap)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub progress_pct: u8,
    pub real_base: u128,
    pub migration_threshold: u128,
    pub remaining_to_threshold: u128,
    pub price: u128,
    pub market_cap: u128,
}

impl ProgressView {
    pub fn compute(
        real_base: u128,
        migration_threshold: u128,
        total_issued: u128,
        price: u128,
    ) -> CurveResult<Self> {
        Ok(Self {
            progress_pct: progress_pct(real_base, migration_threshold),
            real_base,
            migration_threshold,
            remaining_to_threshold: migration_threshold.saturating_sub(real_base),
            price,
            market_cap: market_cap(total_issued, price)?,
        })
    }
}
