//! Bounded, monotonically sequenced correction factor.
//!
//! The register does not compute factors; it only enforces the configured
//! bounds and rejects updates that arrive out of order. The caller is trusted
//! to have checked the oracle capability already.

use serde::{Deserialize, Serialize};

use crate::error::{CurveError, CurveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFactorRegister {
    factor_bps: u32,
    min_bps: u32,
    max_bps: u32,
    last_update_at: u64,
}

impl DynamicFactorRegister {
    pub fn new(initial_bps: u32, min_bps: u32, max_bps: u32) -> CurveResult<Self> {
        if min_bps == 0 || min_bps > max_bps {
            return Err(CurveError::InvalidCurveConfig("factor bounds"));
        }
        if initial_bps < min_bps || initial_bps > max_bps {
            return Err(CurveError::InvalidCurveConfig("initial factor outside bounds"));
        }
        Ok(Self {
            factor_bps: initial_bps,
            min_bps,
            max_bps,
            last_update_at: 0,
        })
    }

    pub fn factor_bps(&self) -> u32 {
        self.factor_bps
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_bps, self.max_bps)
    }

    pub fn last_update_at(&self) -> u64 {
        self.last_update_at
    }

    pub fn check(&self, new_bps: u32, as_of: u64) -> CurveResult<()> {
        if new_bps < self.min_bps || new_bps > self.max_bps {
            return Err(CurveError::FactorOutOfBounds {
                factor_bps: new_bps,
                min_bps: self.min_bps,
                max_bps: self.max_bps,
            });
        }
        if as_of <= self.last_update_at {
            return Err(CurveError::StaleUpdate {
                as_of,
                last: self.last_update_at,
            });
        }
        Ok(())
    }

    /// Validate then set factor and sequence together. Returns the previous factor.
    pub fn apply(&mut self, new_bps: u32, as_of: u64) -> CurveResult<u32> {
        self.check(new_bps, as_of)?;
        let prev = self.factor_bps;
        self.factor_bps = new_bps;
        self.last_update_at = as_of;
        Ok(prev)
    }
}
