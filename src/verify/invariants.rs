//! Cross-field checks on curve records, run after commits and by the fuzzer.

use crate::curve::fees::FeeSplit;
use crate::curve::math::{self, Reserves};
use crate::curve::migration::CurveStatus;
use crate::curve::state::CurveState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub msg: String,
}

fn violation(msg: impl Into<String>) -> InvariantViolation {
    InvariantViolation { msg: msg.into() }
}

pub fn assert_curve_invariants(state: &CurveState) -> Result<(), InvariantViolation> {
    let cfg = state.config();
    let r = state.reserves();
    if r.virtual_base < cfg.min_virtual_base || r.virtual_token < cfg.min_virtual_token {
        return Err(violation("reserve below floor"));
    }
    if state.total_issued() > cfg.max_supply {
        return Err(violation("issued supply exceeds max supply"));
    }
    if state.paid_out_base() > state.real_base() {
        return Err(violation("paid out more base than was deposited"));
    }
    let (min_bps, max_bps) = (cfg.min_factor_bps, cfg.max_factor_bps);
    if state.factor_bps() < min_bps || state.factor_bps() > max_bps {
        return Err(violation("factor outside bounds"));
    }
    if state.status() == CurveStatus::Active && state.real_base() >= cfg.migration_threshold {
        return Err(violation("active curve at or past migration threshold"));
    }
    if state.fees().fee_bps() != cfg.fee_bps
        || state.fees().founder_share_bps() != cfg.founder_share_of_fee_bps
    {
        return Err(violation("fee register out of sync with config"));
    }
    Ok(())
}

/// Checks that hold between any record and its successor.
pub fn assert_transition(before: &CurveState, after: &CurveState) -> Result<(), InvariantViolation> {
    assert_curve_invariants(after)?;
    if before.token_id() != after.token_id() {
        return Err(violation("token id changed"));
    }
    if after.seq() != before.seq() + 1 {
        return Err(violation("sequence must advance by exactly one"));
    }
    if after.real_base() < before.real_base() {
        return Err(violation("real base decreased"));
    }
    if after.paid_out_base() < before.paid_out_base() {
        return Err(violation("paid out base decreased"));
    }
    if status_rank(after.status()) < status_rank(before.status()) {
        return Err(violation("status moved backwards"));
    }
    if before.config().max_supply != after.config().max_supply
        || before.config().migration_threshold != after.config().migration_threshold
    {
        return Err(violation("immutable config changed"));
    }
    if before.reserves() != after.reserves() {
        assert_trade_product(&before.reserves(), &after.reserves(), before.factor_bps())?;
    }
    Ok(())
}

/// A committed trade never leaves the product below the factor-scaled invariant.
pub fn assert_trade_product(
    before: &Reserves,
    after: &Reserves,
    factor_bps: u32,
) -> Result<(), InvariantViolation> {
    let eff_k = math::effective_k(math::invariant(before), factor_bps)
        .map_err(|e| violation(e.to_string()))?;
    if math::invariant(after) < eff_k {
        return Err(violation("reserve product fell below effective invariant"));
    }
    Ok(())
}

pub fn assert_fee_conservation(gross: u128, split: &FeeSplit) -> Result<(), InvariantViolation> {
    let total = split
        .net
        .checked_add(split.founder_fee)
        .and_then(|v| v.checked_add(split.treasury_fee));
    if total != Some(gross) {
        return Err(violation("fee split does not sum to gross"));
    }
    Ok(())
}

fn status_rank(status: CurveStatus) -> u8 {
    match status {
        CurveStatus::Active => 0,
        CurveStatus::Migrating => 1,
        CurveStatus::Migrated => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CurveConfig, TokenMetadata};
    use crate::curve::fees::{self, FeeConfig};

    fn curve() -> CurveState {
        CurveState::new("inv", CurveConfig::unit(TokenMetadata::default())).unwrap()
    }

    #[test]
    fn test_fresh_curve_holds() {
        assert!(assert_curve_invariants(&curve()).is_ok());
    }

    #[test]
    fn test_trade_transition_holds() {
        let mut c = curve();
        let before = c.clone();
        c.buy(1_000, 0).unwrap();
        assert!(assert_transition(&before, &c).is_ok());
        let before = c.clone();
        c.sell(500, 0).unwrap();
        assert!(assert_transition(&before, &c).is_ok());
    }

    #[test]
    fn test_detects_oversold_payout() {
        let mut c = curve();
        c.paid_out_base = 1;
        assert_eq!(
            assert_curve_invariants(&c).unwrap_err().msg,
            "paid out more base than was deposited"
        );
    }

    #[test]
    fn test_detects_backwards_status() {
        let mut c = curve();
        c.buy(6_000, 0).unwrap();
        let before = c.clone();
        let mut after = c.clone();
        after.status = CurveStatus::Active;
        after.real_base = 0;
        after.seq += 1;
        assert!(assert_transition(&before, &after).is_err());
    }

    #[test]
    fn test_skipped_sequence_rejected() {
        let before = curve();
        let mut after = before.clone();
        after.seq += 2;
        assert!(assert_transition(&before, &after).is_err());
    }

    #[test]
    fn test_product_drop_detected() {
        let before = Reserves { virtual_base: 100, virtual_token: 100 };
        let after = Reserves { virtual_base: 110, virtual_token: 90 };
        assert!(assert_trade_product(&before, &after, 10_000).is_err());
        let after = Reserves { virtual_base: 110, virtual_token: 91 };
        assert!(assert_trade_product(&before, &after, 10_000).is_ok());
    }

    #[test]
    fn test_fee_conservation() {
        let cfg = FeeConfig::new(80, 1_250).unwrap();
        let split = fees::split(1_000, &cfg);
        assert!(assert_fee_conservation(1_000, &split).is_ok());
        assert!(assert_fee_conservation(1_001, &split).is_err());
    }
}
