//! The per-token mutable aggregate.
//!
//! Every mutating method computes the complete post-state first and only
//! writes it back once all checks have passed, so a returned error leaves the
//! curve untouched.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::factor::DynamicFactorRegister;
use super::fees::{self, FeeConfig};
use super::math::{self, ReserveFloor, Reserves};
use super::migration::{self, CurveStatus, LifecycleEvent, MigrationHandoff};
use super::progress::{self, ProgressView};
use crate::config::CurveConfig;
use crate::error::{CurveError, CurveResult};
use crate::intent::{Direction, TokenId, TradePreview, TradeReceipt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveState {
    pub(crate) token_id: TokenId,
    pub(crate) config: CurveConfig,
    pub(crate) reserves: Reserves,
    /// Cumulative net base deposited by buys. Never decreases.
    pub(crate) real_base: u128,
    /// Cumulative gross base paid out to sellers.
    pub(crate) paid_out_base: u128,
    pub(crate) total_issued: u128,
    pub(crate) factor: DynamicFactorRegister,
    pub(crate) fees: FeeConfig,
    pub(crate) status: CurveStatus,
    pub(crate) founder_fees: u128,
    pub(crate) treasury_fees: u128,
    pub(crate) trades: u64,
    /// Count of committed mutations of any kind.
    pub(crate) seq: u64,
}

/// Flat, read-only view of a curve at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveSnapshot {
    pub token_id: TokenId,
    pub status: CurveStatus,
    pub virtual_base: u128,
    pub virtual_token: u128,
    pub real_base: u128,
    pub paid_out_base: u128,
    pub liquid_base: u128,
    pub total_issued: u128,
    pub max_supply: u128,
    pub factor_bps: u32,
    pub min_factor_bps: u32,
    pub max_factor_bps: u32,
    pub last_factor_update_at: u64,
    pub fee_bps: u32,
    pub founder_share_of_fee_bps: u32,
    pub founder_fees: u128,
    pub treasury_fees: u128,
    pub trades: u64,
    pub seq: u64,
    pub progress: ProgressView,
    pub state_hash: String,
}

/// A fully computed trade that has not been written back yet.
struct PendingTrade {
    preview: TradePreview,
    real_base: u128,
    paid_out_base: u128,
    total_issued: u128,
    founder_fees: u128,
    treasury_fees: u128,
}

impl CurveState {
    pub fn new(token_id: impl Into<TokenId>, config: CurveConfig) -> CurveResult<Self> {
        config.validate()?;
        let fees = config.fee_config()?;
        let factor = DynamicFactorRegister::new(
            config.initial_factor_bps,
            config.min_factor_bps,
            config.max_factor_bps,
        )?;
        Ok(Self {
            token_id: token_id.into(),
            reserves: Reserves {
                virtual_base: config.virtual_base,
                virtual_token: config.virtual_token,
            },
            config,
            real_base: 0,
            paid_out_base: 0,
            total_issued: 0,
            factor,
            fees,
            status: CurveStatus::Active,
            founder_fees: 0,
            treasury_fees: 0,
            trades: 0,
            seq: 0,
        })
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn config(&self) -> &CurveConfig {
        &self.config
    }

    pub fn status(&self) -> CurveStatus {
        self.status
    }

    pub fn reserves(&self) -> Reserves {
        self.reserves
    }

    pub fn real_base(&self) -> u128 {
        self.real_base
    }

    pub fn paid_out_base(&self) -> u128 {
        self.paid_out_base
    }

    pub fn total_issued(&self) -> u128 {
        self.total_issued
    }

    pub fn factor_bps(&self) -> u32 {
        self.factor.factor_bps()
    }

    pub fn last_factor_update_at(&self) -> u64 {
        self.factor.last_update_at()
    }

    pub fn fees(&self) -> FeeConfig {
        self.fees
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn liquid_base(&self) -> u128 {
        self.real_base.saturating_sub(self.paid_out_base)
    }

    fn floor(&self) -> ReserveFloor {
        ReserveFloor {
            min_virtual_base: self.config.min_virtual_base,
            min_virtual_token: self.config.min_virtual_token,
        }
    }

    // ---------------------------------------------------------------------
    // Pricing (no mutation)
    // ---------------------------------------------------------------------

    pub fn price(&self) -> CurveResult<u128> {
        math::spot_price(&self.reserves, self.factor.factor_bps())
    }

    pub fn progress(&self) -> CurveResult<ProgressView> {
        ProgressView::compute(
            self.real_base,
            self.config.migration_threshold,
            self.total_issued,
            self.price()?,
        )
    }

    pub fn progress_pct(&self) -> u8 {
        progress::progress_pct(self.real_base, self.config.migration_threshold)
    }

    pub fn market_cap(&self) -> CurveResult<u128> {
        progress::market_cap(self.total_issued, self.price()?)
    }

    fn plan_buy(&self, gross: u128) -> CurveResult<PendingTrade> {
        self.config.check_trade_amount(gross)?;
        let split = fees::split(gross, &self.fees);
        let factor_bps = self.factor.factor_bps();
        let quote = math::quote_buy(&self.reserves, split.net, factor_bps, &self.floor())?;

        let total_issued = self
            .total_issued
            .checked_add(quote.tokens_out)
            .ok_or(CurveError::MathOverflow)?;
        if total_issued > self.config.max_supply {
            return Err(CurveError::CurveExhausted("max supply"));
        }
        let real_base = self.real_base.checked_add(split.net).ok_or(CurveError::MathOverflow)?;

        Ok(PendingTrade {
            preview: TradePreview {
                direction: Direction::Buy,
                amount_in: gross,
                amount_out: quote.tokens_out,
                fees: split,
                reserves_after: quote.new_reserves,
                price_after: math::spot_price(&quote.new_reserves, factor_bps)?,
            },
            real_base,
            paid_out_base: self.paid_out_base,
            total_issued,
            founder_fees: self.founder_fees.checked_add(split.founder_fee).ok_or(CurveError::MathOverflow)?,
            treasury_fees: self.treasury_fees.checked_add(split.treasury_fee).ok_or(CurveError::MathOverflow)?,
        })
    }

    fn plan_sell(&self, tokens_in: u128) -> CurveResult<PendingTrade> {
        if tokens_in == 0 {
            return Err(CurveError::ZeroAmount);
        }
        if tokens_in > self.total_issued {
            return Err(CurveError::CurveUnderflow("sell exceeds issued supply"));
        }
        let factor_bps = self.factor.factor_bps();
        let quote = math::quote_sell(&self.reserves, tokens_in, factor_bps, &self.floor())?;
        if quote.gross_base_out > self.liquid_base() {
            return Err(CurveError::CurveExhausted("payout exceeds liquid base"));
        }
        let split = fees::split(quote.gross_base_out, &self.fees);

        Ok(PendingTrade {
            preview: TradePreview {
                direction: Direction::Sell,
                amount_in: tokens_in,
                amount_out: split.net,
                fees: split,
                reserves_after: quote.new_reserves,
                price_after: math::spot_price(&quote.new_reserves, factor_bps)?,
            },
            real_base: self.real_base,
            paid_out_base: self.paid_out_base + quote.gross_base_out,
            total_issued: self.total_issued - tokens_in,
            founder_fees: self.founder_fees.checked_add(split.founder_fee).ok_or(CurveError::MathOverflow)?,
            treasury_fees: self.treasury_fees.checked_add(split.treasury_fee).ok_or(CurveError::MathOverflow)?,
        })
    }

    pub fn preview(&self, direction: Direction, amount: u128) -> CurveResult<TradePreview> {
        let plan = match direction {
            Direction::Buy => self.plan_buy(amount)?,
            Direction::Sell => self.plan_sell(amount)?,
        };
        Ok(plan.preview)
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    pub fn buy(&mut self, gross: u128, min_out: u128) -> CurveResult<TradeReceipt> {
        self.trade(Direction::Buy, gross, min_out)
    }

    pub fn sell(&mut self, tokens_in: u128, min_out: u128) -> CurveResult<TradeReceipt> {
        self.trade(Direction::Sell, tokens_in, min_out)
    }

    pub fn trade(&mut self, direction: Direction, amount: u128, min_out: u128) -> CurveResult<TradeReceipt> {
        migration::ensure_tradable(self.status)?;
        let plan = match direction {
            Direction::Buy => self.plan_buy(amount)?,
            Direction::Sell => self.plan_sell(amount)?,
        };
        math::check_min_out(plan.preview.amount_out, min_out)?;

        self.reserves = plan.preview.reserves_after;
        self.real_base = plan.real_base;
        self.paid_out_base = plan.paid_out_base;
        self.total_issued = plan.total_issued;
        self.founder_fees = plan.founder_fees;
        self.treasury_fees = plan.treasury_fees;
        self.trades += 1;
        self.seq += 1;

        let next = migration::after_commit(self.status, self.real_base, self.config.migration_threshold);
        if let Some(status) = next {
            self.status = status;
        }

        Ok(TradeReceipt {
            direction,
            amount_in: amount,
            amount_out: plan.preview.amount_out,
            fees: plan.preview.fees,
            factor_bps: self.factor.factor_bps(),
            reserves_after: self.reserves,
            real_base_after: self.real_base,
            paid_out_base_after: self.paid_out_base,
            total_issued_after: self.total_issued,
            new_status: self.status,
            migration_triggered: next.is_some(),
            seq: self.seq,
        })
    }

    /// Returns the factor that was replaced.
    pub fn apply_factor(&mut self, new_factor_bps: u32, as_of: u64) -> CurveResult<u32> {
        migration::ensure_tradable(self.status)?;
        let prev = self.factor.apply(new_factor_bps, as_of)?;
        self.seq += 1;
        Ok(prev)
    }

    pub fn update_fees(&mut self, fee_bps: u32, founder_share_of_fee_bps: u32) -> CurveResult<FeeConfig> {
        migration::ensure_tradable(self.status)?;
        let next = FeeConfig::new(fee_bps, founder_share_of_fee_bps)?;
        let prev = self.fees;
        self.fees = next;
        self.config.fee_bps = fee_bps;
        self.config.founder_share_of_fee_bps = founder_share_of_fee_bps;
        self.seq += 1;
        Ok(prev)
    }

    /// `Migrating -> Migrated`, returning the hand-off payload.
    pub fn migrate(&mut self) -> CurveResult<MigrationHandoff> {
        let next = migration::apply_event(self.status, LifecycleEvent::Handoff)?;
        let handoff = self.handoff()?;
        self.status = next;
        self.seq += 1;
        Ok(handoff)
    }

    pub fn handoff(&self) -> CurveResult<MigrationHandoff> {
        Ok(MigrationHandoff {
            token_id: self.token_id.clone(),
            metadata: self.config.metadata.clone(),
            real_base: self.real_base,
            paid_out_base: self.paid_out_base,
            liquid_base: self.liquid_base(),
            total_issued: self.total_issued,
            max_supply: self.config.max_supply,
            unissued_supply: self.config.max_supply - self.total_issued,
            virtual_base: self.reserves.virtual_base,
            virtual_token: self.reserves.virtual_token,
            factor_bps: self.factor.factor_bps(),
            final_price: self.price()?,
            fee_bps: self.fees.fee_bps(),
            founder_share_of_fee_bps: self.fees.founder_share_bps(),
        })
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Deterministic digest of the full record, for audit and replay checks.
    pub fn state_hash(&self) -> CurveResult<String> {
        let bytes = serde_json::to_vec(self).map_err(|e| CurveError::Encoding(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn snapshot(&self) -> CurveResult<CurveSnapshot> {
        let (min_factor_bps, max_factor_bps) = self.factor.bounds();
        Ok(CurveSnapshot {
            token_id: self.token_id.clone(),
            status: self.status,
            virtual_base: self.reserves.virtual_base,
            virtual_token: self.reserves.virtual_token,
            real_base: self.real_base,
            paid_out_base: self.paid_out_base,
            liquid_base: self.liquid_base(),
            total_issued: self.total_issued,
            max_supply: self.config.max_supply,
            factor_bps: self.factor.factor_bps(),
            min_factor_bps,
            max_factor_bps,
            last_factor_update_at: self.factor.last_update_at(),
            fee_bps: self.fees.fee_bps(),
            founder_share_of_fee_bps: self.fees.founder_share_bps(),
            founder_fees: self.founder_fees,
            treasury_fees: self.treasury_fees,
            trades: self.trades,
            seq: self.seq,
            progress: self.progress()?,
            state_hash: self.state_hash()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenMetadata;

    fn meta() -> TokenMetadata {
        TokenMetadata {
            name: "Unit".to_string(),
            symbol: "UNT".to_string(),
            creator: "creator".to_string(),
            founder: "founder".to_string(),
            treasury: "treasury".to_string(),
            ..Default::default()
        }
    }

    fn unit_curve() -> CurveState {
        CurveState::new("unit", CurveConfig::unit(meta())).unwrap()
    }

    #[test]
    fn test_reference_buy_commit() {
        let mut c = unit_curve();
        let r = c.buy(1_000, 0).unwrap();
        assert_eq!(r.fees.founder_fee, 1);
        assert_eq!(r.fees.treasury_fee, 7);
        assert_eq!(r.fees.net, 992);
        assert_eq!(r.amount_out, 9_024);
        assert_eq!(c.reserves().virtual_base, 10_992);
        assert_eq!(c.reserves().virtual_token, 90_976);
        assert_eq!(c.real_base(), 992);
        assert_eq!(c.total_issued(), 9_024);
        assert_eq!(c.progress_pct(), 19);
        assert_eq!(r.new_status, CurveStatus::Active);
        assert!(!r.migration_triggered);
    }

    #[test]
    fn test_slippage_leaves_state_unchanged() {
        let mut c = unit_curve();
        let before = c.clone();
        let err = c.buy(1_000, 9_025).unwrap_err();
        assert_eq!(err, CurveError::SlippageExceeded { computed: 9_024, min_out: 9_025 });
        assert_eq!(c, before);
    }

    #[test]
    fn test_factor_out_of_bounds_leaves_state_unchanged() {
        let mut c = unit_curve();
        c.buy(1_000, 0).unwrap();
        let before = c.clone();
        assert!(matches!(c.apply_factor(8_000, 1), Err(CurveError::FactorOutOfBounds { .. })));
        assert_eq!(c, before);
    }

    #[test]
    fn test_sell_keeps_real_base_and_tracks_payout() {
        let mut c = unit_curve();
        let bought = c.buy(1_000, 0).unwrap().amount_out;
        let r = c.sell(bought / 2, 0).unwrap();
        assert_eq!(c.real_base(), 992);
        assert_eq!(c.paid_out_base(), r.fees.net + r.fees.fee());
        assert_eq!(c.total_issued(), bought - bought / 2);
        assert!(c.paid_out_base() <= c.real_base());
    }

    #[test]
    fn test_sell_payout_bounded_by_liquid_base() {
        let mut c = unit_curve();
        let bought = c.buy(1_000, 0).unwrap().amount_out;
        c.apply_factor(9_000, 1).unwrap();
        let before = c.clone();
        // A lowered factor prices the full position above what was deposited.
        assert_eq!(
            c.sell(bought, 0),
            Err(CurveError::CurveExhausted("payout exceeds liquid base"))
        );
        assert_eq!(c, before);
        assert_eq!(c.real_base(), 992);
        assert_eq!(c.paid_out_base(), 0);
    }

    #[test]
    fn test_cannot_sell_more_than_issued() {
        let mut c = unit_curve();
        c.buy(1_000, 0).unwrap();
        assert!(matches!(c.sell(9_025, 0), Err(CurveError::CurveUnderflow(_))));
    }

    #[test]
    fn test_threshold_crossing_closes_curve() {
        let mut c = unit_curve();
        let r = c.buy(6_000, 0).unwrap();
        assert!(r.migration_triggered);
        assert_eq!(c.status(), CurveStatus::Migrating);
        assert_eq!(c.buy(10, 0), Err(CurveError::CurveClosed));
        assert_eq!(c.sell(1, 0), Err(CurveError::CurveClosed));
        assert_eq!(c.apply_factor(10_000, 1), Err(CurveError::CurveClosed));
    }

    #[test]
    fn test_migrate_once() {
        let mut c = unit_curve();
        assert_eq!(c.migrate(), Err(CurveError::NotReadyToMigrate));
        c.buy(6_000, 0).unwrap();
        let handoff = c.migrate().unwrap();
        assert_eq!(handoff.real_base, c.real_base());
        assert_eq!(handoff.total_issued, c.total_issued());
        assert_eq!(handoff.unissued_supply, c.config().max_supply - c.total_issued());
        assert_eq!(c.status(), CurveStatus::Migrated);
        let frozen = c.clone();
        assert_eq!(c.migrate(), Err(CurveError::AlreadyMigrated));
        assert_eq!(c, frozen);
        // Reads stay available.
        assert_eq!(c.progress().unwrap().progress_pct, 100);
    }

    #[test]
    fn test_preview_matches_commit() {
        let mut c = unit_curve();
        let p = c.preview(Direction::Buy, 2_500).unwrap();
        let r = c.buy(2_500, 0).unwrap();
        assert_eq!(p.amount_out, r.amount_out);
        assert_eq!(p.reserves_after, r.reserves_after);
        assert_eq!(p.price_after, c.price().unwrap());
    }

    #[test]
    fn test_fee_update_validated() {
        let mut c = unit_curve();
        assert!(matches!(c.update_fees(10_000, 0), Err(CurveError::InvalidFeeConfig { .. })));
        c.update_fees(100, 5_000).unwrap();
        let r = c.buy(1_000, 0).unwrap();
        assert_eq!(r.fees.fee(), 10);
        assert_eq!(r.fees.founder_fee, 5);
    }

    #[test]
    fn test_state_hash_tracks_changes() {
        let mut a = unit_curve();
        let b = unit_curve();
        assert_eq!(a.state_hash().unwrap(), b.state_hash().unwrap());
        a.buy(10, 0).unwrap();
        assert_ne!(a.state_hash().unwrap(), b.state_hash().unwrap());
    }

    #[test]
    fn test_buy_supply_cap() {
        let mut cfg = CurveConfig::unit(meta());
        cfg.max_supply = 5_000;
        let mut c = CurveState::new("capped", cfg).unwrap();
        assert_eq!(c.buy(1_000, 0), Err(CurveError::CurveExhausted("max supply")));
        assert_eq!(c.total_issued(), 0);
    }
}
