//! One-way lifecycle: `Active -> Migrating -> Migrated`.
//!
//! `Active -> Migrating` happens inside the trade commit that pushes
//! `real_base` to the threshold. `Migrating -> Migrated` is the externally
//! triggered hand-off to open-market liquidity.

use serde::{Deserialize, Serialize};

use crate::config::TokenMetadata;
use crate::error::{CurveError, CurveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveStatus {
    Active,
    Migrating,
    Migrated,
}

impl CurveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurveStatus::Active => "active",
            CurveStatus::Migrating => "migrating",
            CurveStatus::Migrated => "migrated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A trade committed with `real_base` at or above the threshold.
    ThresholdReached,
    /// Operator hand-off of final reserves.
    Handoff,
}

pub fn apply_event(status: CurveStatus, event: LifecycleEvent) -> CurveResult<CurveStatus> {
    match (status, event) {
        (CurveStatus::Active, LifecycleEvent::ThresholdReached) => Ok(CurveStatus::Migrating),
        (CurveStatus::Migrating, LifecycleEvent::Handoff) => Ok(CurveStatus::Migrated),
        (CurveStatus::Migrated, LifecycleEvent::Handoff) => Err(CurveError::AlreadyMigrated),
        (CurveStatus::Active, LifecycleEvent::Handoff) => Err(CurveError::NotReadyToMigrate),
        (_, LifecycleEvent::ThresholdReached) => Err(CurveError::CurveClosed),
    }
}

/// Trades are only accepted while the curve is `Active`.
pub fn ensure_tradable(status: CurveStatus) -> CurveResult<()> {
    match status {
        CurveStatus::Active => Ok(()),
        CurveStatus::Migrating | CurveStatus::Migrated => Err(CurveError::CurveClosed),
    }
}

/// Status the commit should land in, given the post-trade real reserve.
/// Returns `None` when no transition fires.
pub fn after_commit(status: CurveStatus, real_base: u128, threshold: u128) -> Option<CurveStatus> {
    if status == CurveStatus::Active && real_base >= threshold {
        apply_event(status, LifecycleEvent::ThresholdReached).ok()
    } else {
        None
    }
}

/// Everything the open-market liquidity side needs to seed a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationHandoff {
    pub token_id: String,
    pub metadata: TokenMetadata,
    pub real_base: u128,
    pub paid_out_base: u128,
    /// Base actually held for the pool: `real_base - paid_out_base`.
    pub liquid_base: u128,
    pub total_issued: u128,
    pub max_supply: u128,
    /// Tokens never issued through the curve.
    pub unissued_supply: u128,
    pub virtual_base: u128,
    pub virtual_token: u128,
    pub factor_bps: u32,
    pub final_price: u128,
    pub fee_bps: u32,
    pub founder_share_of_fee_bps: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let s = apply_event(CurveStatus::Active, LifecycleEvent::ThresholdReached).unwrap();
        assert_eq!(s, CurveStatus::Migrating);
        let s = apply_event(s, LifecycleEvent::Handoff).unwrap();
        assert_eq!(s, CurveStatus::Migrated);
    }

    #[test]
    fn test_handoff_errors() {
        assert_eq!(
            apply_event(CurveStatus::Active, LifecycleEvent::Handoff),
            Err(CurveError::NotReadyToMigrate)
        );
        assert_eq!(
            apply_event(CurveStatus::Migrated, LifecycleEvent::Handoff),
            Err(CurveError::AlreadyMigrated)
        );
    }

    #[test]
    fn test_threshold_fires_once() {
        assert_eq!(after_commit(CurveStatus::Active, 4_999, 5_000), None);
        assert_eq!(after_commit(CurveStatus::Active, 5_000, 5_000), Some(CurveStatus::Migrating));
        assert_eq!(after_commit(CurveStatus::Migrating, 9_000, 5_000), None);
        assert_eq!(after_commit(CurveStatus::Migrated, 9_000, 5_000), None);
    }

    #[test]
    fn test_only_active_trades() {
        assert!(ensure_tradable(CurveStatus::Active).is_ok());
        assert_eq!(ensure_tradable(CurveStatus::Migrating), Err(CurveError::CurveClosed));
        assert_eq!(ensure_tradable(CurveStatus::Migrated), Err(CurveError::CurveClosed));
    }
}
