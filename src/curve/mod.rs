//! Bonding-curve pricing and settlement.
//!
//! ```text
//! intent ──► CurveState ──► fees::split ──► math::quote_* ──► commit
//!                 ▲                                            │
//!                 │            progress ◄──── migration::after_commit
//!            factor register
//! ```

pub mod factor;
pub mod fees;
pub mod math;
pub mod migration;
pub mod progress;
pub mod state;

pub use factor::DynamicFactorRegister;
pub use fees::{FeeConfig, FeeSplit};
pub use math::{Reserves, PRICE_SCALE};
pub use migration::{CurveStatus, MigrationHandoff};
pub use progress::ProgressView;
pub use state::{CurveSnapshot, CurveState};
