//! Constant-product curve math over virtual reserves.
//!
//! The dynamic factor scales the invariant product, never the reserves:
//!
//! ```text
//! k            = virtual_base * virtual_token              (256-bit)
//! effective_k  = floor(k * factor_bps / 10_000)
//! buy:  vb' = vb + net_in,   vt' = ceil(effective_k / vb'),  out = vt - vt'
//! sell: vt' = vt + tok_in,   vb' = ceil(effective_k / vt'),  out = vb - vb'
//! ```
//!
//! The post-trade reserve is rounded up, so the amount leaving the curve is
//! floored and `vb' * vt' >= effective_k` after every trade.

use serde::{Deserialize, Serialize};
use uint::construct_uint;

use super::fees::BPS_DENOMINATOR;
use crate::error::{CurveError, CurveResult};

construct_uint! {
    /// 256-bit intermediate for reserve products.
    pub struct U256(4);
}

/// Fixed-point scale of quoted prices (base units per token unit, x 1e18).
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserves {
    pub virtual_base: u128,
    pub virtual_token: u128,
}

/// Lowest values a trade may leave the reserves at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveFloor {
    pub min_virtual_base: u128,
    pub min_virtual_token: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyQuote {
    pub tokens_out: u128,
    pub new_reserves: Reserves,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellQuote {
    /// Base leaving the curve before fees.
    pub gross_base_out: u128,
    pub new_reserves: Reserves,
}

pub fn narrow(value: U256) -> CurveResult<u128> {
    if value > U256::from(u128::MAX) {
        return Err(CurveError::MathOverflow);
    }
    Ok(value.low_u128())
}

fn div_ceil(num: U256, den: U256) -> U256 {
    let (q, r) = num.div_mod(den);
    if r.is_zero() {
        q
    } else {
        q + U256::one()
    }
}

pub fn invariant(reserves: &Reserves) -> U256 {
    // u128 * u128 always fits in 256 bits.
    U256::from(reserves.virtual_base) * U256::from(reserves.virtual_token)
}

pub fn effective_k(k: U256, factor_bps: u32) -> CurveResult<U256> {
    let scaled = k
        .checked_mul(U256::from(factor_bps))
        .ok_or(CurveError::MathOverflow)?;
    Ok(scaled / U256::from(BPS_DENOMINATOR))
}

pub fn quote_buy(
    reserves: &Reserves,
    net_base_in: u128,
    factor_bps: u32,
    floor: &ReserveFloor,
) -> CurveResult<BuyQuote> {
    if net_base_in == 0 {
        return Err(CurveError::ZeroAmount);
    }
    let eff_k = effective_k(invariant(reserves), factor_bps)?;
    let new_base = reserves
        .virtual_base
        .checked_add(net_base_in)
        .ok_or(CurveError::MathOverflow)?;
    let new_token = narrow(div_ceil(eff_k, U256::from(new_base)))?;

    if new_token > reserves.virtual_token {
        return Err(CurveError::CurveUnderflow("token reserve would grow on buy"));
    }
    if new_token < floor.min_virtual_token {
        return Err(CurveError::CurveExhausted("token reserve floor"));
    }
    let tokens_out = reserves.virtual_token - new_token;
    if tokens_out == 0 {
        return Err(CurveError::ZeroAmount);
    }

    Ok(BuyQuote {
        tokens_out,
        new_reserves: Reserves {
            virtual_base: new_base,
            virtual_token: new_token,
        },
    })
}

pub fn quote_sell(
    reserves: &Reserves,
    tokens_in: u128,
    factor_bps: u32,
    floor: &ReserveFloor,
) -> CurveResult<SellQuote> {
    if tokens_in == 0 {
        return Err(CurveError::ZeroAmount);
    }
    let eff_k = effective_k(invariant(reserves), factor_bps)?;
    let new_token = reserves
        .virtual_token
        .checked_add(tokens_in)
        .ok_or(CurveError::MathOverflow)?;
    let new_base = narrow(div_ceil(eff_k, U256::from(new_token)))?;

    if new_base > reserves.virtual_base {
        return Err(CurveError::CurveUnderflow("base reserve would grow on sell"));
    }
    if new_base < floor.min_virtual_base {
        return Err(CurveError::CurveExhausted("base reserve floor"));
    }
    let gross_base_out = reserves.virtual_base - new_base;
    if gross_base_out == 0 {
        return Err(CurveError::ZeroAmount);
    }

    Ok(SellQuote {
        gross_base_out,
        new_reserves: Reserves {
            virtual_base: new_base,
            virtual_token: new_token,
        },
    })
}

pub fn check_min_out(computed: u128, min_out: u128) -> CurveResult<()> {
    if computed < min_out {
        return Err(CurveError::SlippageExceeded { computed, min_out });
    }
    Ok(())
}

/// Current marginal price, `vb / vt` scaled by the factor and [`PRICE_SCALE`].
pub fn spot_price(reserves: &Reserves, factor_bps: u32) -> CurveResult<u128> {
    let num = U256::from(reserves.virtual_base)
        .checked_mul(U256::from(factor_bps))
        .and_then(|v| v.checked_mul(U256::from(PRICE_SCALE)))
        .ok_or(CurveError::MathOverflow)?;
    let den = U256::from(reserves.virtual_token) * U256::from(BPS_DENOMINATOR);
    if den.is_zero() {
        return Err(CurveError::CurveExhausted("token reserve is zero"));
    }
    narrow(num / den)
}
