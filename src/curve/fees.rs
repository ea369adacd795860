//! Fee splitting: gross amount -> (net, founder share, treasury share).
//!
//! The founder's cut is a fraction of the *collected fee*, not of the gross
//! amount. All three outputs are floored integers and always sum back to the
//! gross amount.

use serde::{Deserialize, Serialize};

use crate::error::{CurveError, CurveResult};

pub const BPS_DENOMINATOR: u32 = 10_000;

/// Validated fee configuration. Construct through [`FeeConfig::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    fee_bps: u32,
    founder_share_bps: u32,
}

impl FeeConfig {
    pub fn new(fee_bps: u32, founder_share_bps: u32) -> CurveResult<Self> {
        if fee_bps >= BPS_DENOMINATOR || founder_share_bps > BPS_DENOMINATOR {
            return Err(CurveError::InvalidFeeConfig { fee_bps, founder_share_bps });
        }
        Ok(Self { fee_bps, founder_share_bps })
    }

    pub fn fee_bps(&self) -> u32 {
        self.fee_bps
    }

    pub fn founder_share_bps(&self) -> u32 {
        self.founder_share_bps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub net: u128,
    pub founder_fee: u128,
    pub treasury_fee: u128,
}

impl FeeSplit {
    pub fn fee(&self) -> u128 {
        self.founder_fee + self.treasury_fee
    }
}

/// floor(amount * bps / 10_000) without a wide intermediate.
///
/// With amount = q * 10_000 + r this is q * bps + floor(r * bps / 10_000);
/// for bps <= 10_000 neither term can exceed `amount`.
pub fn bps_of(amount: u128, bps: u32) -> u128 {
    let d = BPS_DENOMINATOR as u128;
    let b = bps.min(BPS_DENOMINATOR) as u128;
    (amount / d) * b + (amount % d) * b / d
}

pub fn split(gross: u128, cfg: &FeeConfig) -> FeeSplit {
    let fee = bps_of(gross, cfg.fee_bps);
    let founder_fee = bps_of(fee, cfg.founder_share_bps);
    FeeSplit {
        net: gross - fee,
        founder_fee,
        treasury_fee: fee - founder_fee,
    }
}
