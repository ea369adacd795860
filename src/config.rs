use serde::{Deserialize, Serialize};

use crate::curve::fees::{FeeConfig, BPS_DENOMINATOR};
use crate::error::{CurveError, CurveResult};

/// Descriptive token fields carried alongside the curve for the hand-off
/// payload and for operators. None of them affect pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub creator: String,
    pub founder: String,
    pub treasury: String,
}

/// Per-token curve configuration fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub metadata: TokenMetadata,
    pub virtual_base: u128,
    pub virtual_token: u128,
    pub max_supply: u128,
    pub fee_bps: u32,
    pub founder_share_of_fee_bps: u32,
    pub initial_factor_bps: u32,
    pub min_factor_bps: u32,
    pub max_factor_bps: u32,
    pub migration_threshold: u128,
    /// Reserves may never be pushed below these floors by a trade.
    pub min_virtual_base: u128,
    pub min_virtual_token: u128,
    pub min_trade_amount: u128,
    pub max_trade_amount: u128,
}

const E18: u128 = 1_000_000_000_000_000_000;

impl CurveConfig {
    /// Launch parameters used for new tokens unless the operator overrides them.
    pub fn standard(metadata: TokenMetadata) -> Self {
        Self {
            metadata,
            virtual_base: 30 * E18,
            virtual_token: 1_073_000_000 * E18,
            max_supply: 1_000_000_000 * E18,
            fee_bps: 80,
            founder_share_of_fee_bps: 1_250,
            initial_factor_bps: BPS_DENOMINATOR,
            min_factor_bps: 9_000,
            max_factor_bps: 11_000,
            migration_threshold: 69 * E18,
            min_virtual_base: 1,
            min_virtual_token: 1,
            min_trade_amount: 1_000_000_000_000_000,
            max_trade_amount: 1_000_000 * E18,
        }
    }

    /// Small unit-scale curve, handy for operators poking at a dev instance.
    pub fn unit(metadata: TokenMetadata) -> Self {
        Self {
            metadata,
            virtual_base: 10_000,
            virtual_token: 100_000,
            max_supply: 100_000,
            fee_bps: 80,
            founder_share_of_fee_bps: 1_250,
            initial_factor_bps: BPS_DENOMINATOR,
            min_factor_bps: 9_000,
            max_factor_bps: 11_000,
            migration_threshold: 5_000,
            min_virtual_base: 1,
            min_virtual_token: 1,
            min_trade_amount: 1,
            max_trade_amount: u128::MAX,
        }
    }

    pub fn fee_config(&self) -> CurveResult<FeeConfig> {
        FeeConfig::new(self.fee_bps, self.founder_share_of_fee_bps)
    }

    /// Registration-time checks. Nothing here is re-checked per trade.
    pub fn validate(&self) -> CurveResult<()> {
        self.fee_config()?;
        if self.min_factor_bps == 0 || self.min_factor_bps > self.max_factor_bps {
            return Err(CurveError::InvalidCurveConfig("factor bounds"));
        }
        if self.initial_factor_bps < self.min_factor_bps
            || self.initial_factor_bps > self.max_factor_bps
        {
            return Err(CurveError::InvalidCurveConfig("initial factor outside bounds"));
        }
        if self.min_virtual_base == 0 || self.min_virtual_token == 0 {
            return Err(CurveError::InvalidCurveConfig("reserve floors must be non-zero"));
        }
        if self.virtual_base < self.min_virtual_base || self.virtual_token < self.min_virtual_token {
            return Err(CurveError::InvalidCurveConfig("seed reserves below floor"));
        }
        if self.max_supply == 0 {
            return Err(CurveError::InvalidCurveConfig("max supply is zero"));
        }
        if self.migration_threshold == 0 {
            return Err(CurveError::InvalidCurveConfig("migration threshold is zero"));
        }
        if self.min_trade_amount > self.max_trade_amount {
            return Err(CurveError::InvalidCurveConfig("trade limits inverted"));
        }
        Ok(())
    }

    pub fn check_trade_amount(&self, amount: u128) -> CurveResult<()> {
        if amount == 0 {
            return Err(CurveError::ZeroAmount);
        }
        if amount < self.min_trade_amount || amount > self.max_trade_amount {
            return Err(CurveError::AmountOutOfRange {
                amount,
                min: self.min_trade_amount,
                max: self.max_trade_amount,
            });
        }
        Ok(())
    }
}

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub audit_path: String,
    /// `sync_data` after every audit append.
    pub audit_fsync: bool,
    pub sqlite_path: String,
    /// Persist a snapshot row every N committed operations per token.
    pub persist_every: u64,
    /// Re-run the invariant checks after every commit.
    pub check_invariants: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            audit_path: std::env::var("AUDIT_PATH").unwrap_or_else(|_| "./curve_audit.log".to_string()),
            audit_fsync: std::env::var("AUDIT_FSYNC").map(|v| v == "1" || v == "true").unwrap_or(false),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./curve.sqlite".to_string()),
            persist_every: std::env::var("PERSIST_EVERY").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            check_invariants: std::env::var("CHECK_INVARIANTS")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(cfg!(debug_assertions)),
        }
    }
}
