//! Typed engine failures.
//!
//! Every variant is produced before any state mutation, so a returned error
//! always means the curve is exactly as it was before the call.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("trade amount is zero")]
    ZeroAmount,

    #[error("slippage exceeded: computed {computed} < min_out {min_out}")]
    SlippageExceeded { computed: u128, min_out: u128 },

    #[error("curve underflow: {0}")]
    CurveUnderflow(&'static str),

    #[error("curve exhausted: {0}")]
    CurveExhausted(&'static str),

    #[error("factor {factor_bps} bps outside [{min_bps}, {max_bps}]")]
    FactorOutOfBounds { factor_bps: u32, min_bps: u32, max_bps: u32 },

    #[error("stale factor update: as_of {as_of} <= last {last}")]
    StaleUpdate { as_of: u64, last: u64 },

    #[error("invalid fee config: fee {fee_bps} bps, founder share {founder_share_bps} bps")]
    InvalidFeeConfig { fee_bps: u32, founder_share_bps: u32 },

    #[error("invalid curve config: {0}")]
    InvalidCurveConfig(&'static str),

    #[error("curve already migrated")]
    AlreadyMigrated,

    #[error("curve not ready to migrate")]
    NotReadyToMigrate,

    #[error("curve closed to trading")]
    CurveClosed,

    #[error("amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange { amount: u128, min: u128, max: u128 },

    #[error("math overflow")]
    MathOverflow,

    #[error("unknown token {0}")]
    UnknownToken(String),

    #[error("token {0} already registered")]
    AlreadyRegistered(String),

    #[error("caller lacks the oracle capability")]
    Unauthorized,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("audit log write failed: {0}")]
    AuditWrite(String),

    #[error("record encoding failed: {0}")]
    Encoding(String),
}

impl CurveError {
    /// Stable snake_case code used in logs, audit rejections and service replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "zero_amount",
            Self::SlippageExceeded { .. } => "slippage_exceeded",
            Self::CurveUnderflow(_) => "curve_underflow",
            Self::CurveExhausted(_) => "curve_exhausted",
            Self::FactorOutOfBounds { .. } => "factor_out_of_bounds",
            Self::StaleUpdate { .. } => "stale_update",
            Self::InvalidFeeConfig { .. } => "invalid_fee_config",
            Self::InvalidCurveConfig(_) => "invalid_curve_config",
            Self::AlreadyMigrated => "already_migrated",
            Self::NotReadyToMigrate => "not_ready_to_migrate",
            Self::CurveClosed => "curve_closed",
            Self::AmountOutOfRange { .. } => "amount_out_of_range",
            Self::MathOverflow => "math_overflow",
            Self::UnknownToken(_) => "unknown_token",
            Self::AlreadyRegistered(_) => "already_registered",
            Self::Unauthorized => "unauthorized",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::AuditWrite(_) => "audit_write",
            Self::Encoding(_) => "encoding",
        }
    }
}

pub type CurveResult<T> = Result<T, CurveError>;
