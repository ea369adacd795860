//! Multi-token registry with per-token exclusion.
//!
//! Each token has one writer lock and one published snapshot. Mutations run
//! on a clone of the record while holding the writer lock, append the audit
//! entry, then swap the clone in and publish it. Readers only ever see a
//! published snapshot, so they never block on a trade in progress and never
//! observe a half-applied one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::audit::{AuditEntry, AuditLog};
use crate::config::CurveConfig;
use crate::curve::fees::FeeConfig;
use crate::curve::migration::{CurveStatus, MigrationHandoff};
use crate::curve::progress::ProgressView;
use crate::curve::state::{CurveSnapshot, CurveState};
use crate::error::{CurveError, CurveResult};
use crate::intent::{Direction, FactorPush, FeeUpdate, MigrationTrigger, TokenId, TradeIntent, TradePreview, TradeReceipt};
use crate::logging;
use crate::verify::invariants;

struct TokenSlot {
    writer: Mutex<CurveState>,
    published: RwLock<Arc<CurveState>>,
}

impl TokenSlot {
    fn new(state: CurveState) -> Self {
        Self {
            published: RwLock::new(Arc::new(state.clone())),
            writer: Mutex::new(state),
        }
    }

    fn current(&self) -> Arc<CurveState> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct CurveEngine {
    tokens: RwLock<HashMap<TokenId, Arc<TokenSlot>>>,
    audit: Option<Mutex<AuditLog>>,
    check_invariants: bool,
}

impl Default for CurveEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CurveEngine {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            audit: None,
            check_invariants: cfg!(debug_assertions),
        }
    }

    pub fn with_audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(Mutex::new(log));
        self
    }

    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    /// Seed the registry with already-validated records, e.g. from recovery.
    pub fn with_states(self, states: impl IntoIterator<Item = CurveState>) -> Self {
        {
            let mut map = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            for state in states {
                map.insert(state.token_id().to_string(), Arc::new(TokenSlot::new(state)));
            }
        }
        self
    }

    fn slot(&self, token_id: &str) -> CurveResult<Arc<TokenSlot>> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token_id)
            .cloned()
            .ok_or_else(|| CurveError::UnknownToken(token_id.to_string()))
    }

    fn append_audit(&self, entry: &AuditEntry) -> CurveResult<()> {
        let Some(audit) = &self.audit else {
            return Ok(());
        };
        let mut log = audit.lock().unwrap_or_else(PoisonError::into_inner);
        log.append_entry(entry)
            .map_err(|e| CurveError::AuditWrite(e.to_string()))
    }

    /// Run `op` on a copy of the record and commit it only if every step succeeds.
    fn commit<T>(
        &self,
        token_id: &str,
        op: &'static str,
        f: impl FnOnce(&mut CurveState) -> CurveResult<(T, AuditEntry)>,
    ) -> CurveResult<(T, Arc<CurveState>)> {
        let _scope = logging::ProfileScope::with_context(
            "commit",
            &[("token_id", logging::v_str(token_id)), ("op", logging::v_str(op))],
        );
        let result = self.slot(token_id).and_then(|slot| {
            let mut writer = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let mut next = writer.clone();
            let (out, entry) = f(&mut next)?;
            if self.check_invariants {
                invariants::assert_transition(&writer, &next)
                    .map_err(|v| CurveError::InvariantViolation(v.msg))?;
            }
            self.append_audit(&entry)?;
            *writer = next;
            let published = Arc::new(writer.clone());
            *slot.published.write().unwrap_or_else(PoisonError::into_inner) = published.clone();
            Ok((out, published))
        });
        if let Err(e) = &result {
            logging::log_reject(token_id, op, e.code(), &e.to_string());
        }
        result
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    pub fn register(&self, token_id: impl Into<TokenId>, config: CurveConfig) -> CurveResult<CurveSnapshot> {
        let token_id = token_id.into();
        let (state, snapshot) = match CurveState::new(token_id.clone(), config.clone())
            .and_then(|state| state.snapshot().map(|snap| (state, snap)))
        {
            Ok(pair) => pair,
            Err(e) => {
                logging::log_reject(&token_id, "register", e.code(), &e.to_string());
                return Err(e);
            }
        };

        let mut map = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&token_id) {
            logging::log_reject(&token_id, "register", "already_registered", "duplicate token id");
            return Err(CurveError::AlreadyRegistered(token_id));
        }
        self.append_audit(&AuditEntry::Register {
            ts: logging::ts_epoch_ms(),
            token_id: token_id.clone(),
            config,
            state_hash: snapshot.state_hash.clone(),
        })?;
        logging::log_registration(
            &token_id,
            &state.config().metadata.symbol,
            state.config().migration_threshold,
            &snapshot.state_hash,
        );
        map.insert(token_id, Arc::new(TokenSlot::new(state)));
        Ok(snapshot)
    }

    pub fn execute(&self, intent: &TradeIntent) -> CurveResult<TradeReceipt> {
        let (receipt, state) = self.commit(&intent.token_id, intent.direction.as_str(), |s| {
            let prev_status = s.status();
            let receipt = s.trade(intent.direction, intent.amount, intent.min_out)?;
            let entry = AuditEntry::Trade {
                ts: logging::ts_epoch_ms(),
                token_id: intent.token_id.clone(),
                trader: intent.trader.clone(),
                direction: intent.direction,
                amount_in: intent.amount,
                min_out: intent.min_out,
                amount_out: receipt.amount_out,
                founder_fee: receipt.fees.founder_fee,
                treasury_fee: receipt.fees.treasury_fee,
                factor_bps: receipt.factor_bps,
                virtual_base: receipt.reserves_after.virtual_base,
                virtual_token: receipt.reserves_after.virtual_token,
                real_base: receipt.real_base_after,
                paid_out_base: receipt.paid_out_base_after,
                total_issued: receipt.total_issued_after,
                status: receipt.new_status,
                seq: receipt.seq,
                state_hash: s.state_hash()?,
            };
            Ok(((receipt, prev_status), entry))
        })?;
        let (receipt, prev_status) = receipt;

        logging::log_trade(
            &intent.token_id,
            &intent.trader,
            intent.direction.as_str(),
            receipt.amount_in,
            receipt.amount_out,
            receipt.fees.founder_fee,
            receipt.fees.treasury_fee,
            receipt.factor_bps,
            receipt.seq,
        );
        if receipt.migration_triggered {
            logging::log_migration(
                &intent.token_id,
                prev_status.as_str(),
                receipt.new_status.as_str(),
                state.real_base(),
                state.total_issued(),
            );
        }
        Ok(receipt)
    }

    /// Returns the factor that was replaced.
    pub fn apply_factor(&self, push: &FactorPush) -> CurveResult<u32> {
        if !push.caller_is_oracle {
            logging::log_reject(&push.token_id, "factor", "unauthorized", "caller is not the oracle");
            return Err(CurveError::Unauthorized);
        }
        let (prev, _) = self.commit(&push.token_id, "factor", |s| {
            let prev = s.apply_factor(push.new_factor_bps, push.as_of)?;
            let entry = AuditEntry::Factor {
                ts: logging::ts_epoch_ms(),
                token_id: push.token_id.clone(),
                prev_factor_bps: prev,
                new_factor_bps: push.new_factor_bps,
                as_of: push.as_of,
                seq: s.seq(),
                state_hash: s.state_hash()?,
            };
            Ok((prev, entry))
        })?;
        logging::log_factor(&push.token_id, prev, push.new_factor_bps, push.as_of);
        Ok(prev)
    }

    /// Returns the fee configuration that was replaced.
    pub fn update_fees(&self, update: &FeeUpdate) -> CurveResult<FeeConfig> {
        let (prev, _) = self.commit(&update.token_id, "fees", |s| {
            let prev = s.update_fees(update.fee_bps, update.founder_share_of_fee_bps)?;
            let entry = AuditEntry::Fees {
                ts: logging::ts_epoch_ms(),
                token_id: update.token_id.clone(),
                fee_bps: update.fee_bps,
                founder_share_of_fee_bps: update.founder_share_of_fee_bps,
                seq: s.seq(),
                state_hash: s.state_hash()?,
            };
            Ok((prev, entry))
        })?;
        logging::log(
            logging::Level::Info,
            logging::Domain::Trade,
            "fees_updated",
            logging::obj(&[
                ("token_id", logging::v_str(&update.token_id)),
                ("fee_bps", serde_json::json!(update.fee_bps)),
                ("founder_share_bps", serde_json::json!(update.founder_share_of_fee_bps)),
            ]),
        );
        Ok(prev)
    }

    pub fn migrate(&self, trigger: &MigrationTrigger) -> CurveResult<MigrationHandoff> {
        let (handoff, _) = self.commit(&trigger.token_id, "migrate", |s| {
            let handoff = s.migrate()?;
            let entry = AuditEntry::Migrate {
                ts: logging::ts_epoch_ms(),
                token_id: trigger.token_id.clone(),
                handoff: handoff.clone(),
                seq: s.seq(),
                state_hash: s.state_hash()?,
            };
            Ok((handoff, entry))
        })?;
        logging::log_migration(
            &trigger.token_id,
            CurveStatus::Migrating.as_str(),
            CurveStatus::Migrated.as_str(),
            handoff.real_base,
            handoff.total_issued,
        );
        Ok(handoff)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// The last committed record for a token.
    pub fn state(&self, token_id: &str) -> CurveResult<Arc<CurveState>> {
        Ok(self.slot(token_id)?.current())
    }

    pub fn snapshot(&self, token_id: &str) -> CurveResult<CurveSnapshot> {
        self.state(token_id)?.snapshot()
    }

    pub fn quote_buy(&self, token_id: &str, gross: u128) -> CurveResult<TradePreview> {
        self.state(token_id)?.preview(Direction::Buy, gross)
    }

    pub fn quote_sell(&self, token_id: &str, tokens_in: u128) -> CurveResult<TradePreview> {
        self.state(token_id)?.preview(Direction::Sell, tokens_in)
    }

    pub fn current_price(&self, token_id: &str) -> CurveResult<u128> {
        self.state(token_id)?.price()
    }

    pub fn progress(&self, token_id: &str) -> CurveResult<ProgressView> {
        self.state(token_id)?.progress()
    }

    pub fn market_cap(&self, token_id: &str) -> CurveResult<u128> {
        self.state(token_id)?.market_cap()
    }

    /// Registered token ids, sorted.
    pub fn tokens(&self) -> Vec<TokenId> {
        let map = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<TokenId> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn tokens_with_status(&self, status: CurveStatus) -> Vec<TokenId> {
        let map = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<TokenId> = map
            .iter()
            .filter(|(_, slot)| slot.current().status() == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn active_tokens(&self) -> Vec<TokenId> {
        self.tokens_with_status(CurveStatus::Active)
    }

    /// Tokens waiting for an operator to run the hand-off.
    pub fn migrating_tokens(&self) -> Vec<TokenId> {
        self.tokens_with_status(CurveStatus::Migrating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenMetadata;

    fn engine_with(token: &str) -> CurveEngine {
        let engine = CurveEngine::new().with_invariant_checks(true);
        engine
            .register(token, CurveConfig::unit(TokenMetadata::default()))
            .unwrap();
        engine
    }

    fn buy(token: &str, amount: u128, min_out: u128) -> TradeIntent {
        TradeIntent {
            token_id: token.to_string(),
            direction: Direction::Buy,
            amount,
            min_out,
            trader: "alice".to_string(),
        }
    }

    #[test]
    fn test_unknown_token() {
        let engine = CurveEngine::new();
        assert_eq!(
            engine.execute(&buy("nope", 1, 0)),
            Err(CurveError::UnknownToken("nope".to_string()))
        );
        assert!(engine.snapshot("nope").is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let engine = engine_with("a");
        let err = engine
            .register("a", CurveConfig::unit(TokenMetadata::default()))
            .unwrap_err();
        assert_eq!(err, CurveError::AlreadyRegistered("a".to_string()));
    }

    #[test]
    fn test_invalid_config_rejected_at_registration() {
        let engine = CurveEngine::new();
        let mut cfg = CurveConfig::unit(TokenMetadata::default());
        cfg.fee_bps = 10_000;
        assert!(matches!(engine.register("x", cfg), Err(CurveError::InvalidFeeConfig { .. })));
        let mut cfg = CurveConfig::unit(TokenMetadata::default());
        cfg.min_factor_bps = 12_000;
        assert!(matches!(engine.register("y", cfg), Err(CurveError::InvalidCurveConfig(_))));
        assert!(engine.tokens().is_empty());
    }

    #[test]
    fn test_non_oracle_push_rejected() {
        let engine = engine_with("a");
        let push = FactorPush {
            token_id: "a".to_string(),
            new_factor_bps: 9_500,
            as_of: 1,
            caller_is_oracle: false,
        };
        assert_eq!(engine.apply_factor(&push), Err(CurveError::Unauthorized));
        assert_eq!(engine.state("a").unwrap().factor_bps(), 10_000);
    }

    #[test]
    fn test_published_snapshot_follows_commit() {
        let engine = engine_with("a");
        let before = engine.state("a").unwrap();
        engine.execute(&buy("a", 1_000, 0)).unwrap();
        let after = engine.state("a").unwrap();
        assert_eq!(before.total_issued(), 0);
        assert_eq!(after.total_issued(), 9_024);
        assert_eq!(engine.quote_buy("a", 1_000).unwrap().amount_in, 1_000);
    }

    #[test]
    fn test_rejected_trade_publishes_nothing() {
        let engine = engine_with("a");
        let hash = engine.snapshot("a").unwrap().state_hash;
        assert!(engine.execute(&buy("a", 1_000, 9_025)).is_err());
        assert_eq!(engine.snapshot("a").unwrap().state_hash, hash);
    }

    #[test]
    fn test_status_listing() {
        let engine = engine_with("a");
        engine
            .register("b", CurveConfig::unit(TokenMetadata::default()))
            .unwrap();
        engine.execute(&buy("b", 6_000, 0)).unwrap();
        assert_eq!(engine.active_tokens(), vec!["a".to_string()]);
        assert_eq!(engine.migrating_tokens(), vec!["b".to_string()]);
        engine
            .migrate(&MigrationTrigger { token_id: "b".to_string() })
            .unwrap();
        assert!(engine.migrating_tokens().is_empty());
        assert_eq!(engine.tokens_with_status(CurveStatus::Migrated), vec!["b".to_string()]);
    }

    #[test]
    fn test_audit_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let engine = CurveEngine::new().with_audit(AuditLog::open(&path).unwrap());
        engine
            .register("a", CurveConfig::unit(TokenMetadata::default()))
            .unwrap();
        engine.execute(&buy("a", 1_000, 0)).unwrap();
        let _ = engine.execute(&buy("a", 1_000, u128::MAX));
        let (entries, skipped) = AuditLog::read_entries(&path).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1.kind(), "trade");
    }
}
