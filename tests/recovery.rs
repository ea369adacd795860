//! Audit log replay and SQLite mirror round trips.

use std::fs::OpenOptions;
use std::io::Write;

use curvefx::audit::AuditLog;
use curvefx::config::{CurveConfig, TokenMetadata};
use curvefx::curve::CurveStatus;
use curvefx::engine::CurveEngine;
use curvefx::intent::{Direction, FactorPush, FeeUpdate, MigrationTrigger, TradeIntent};
use curvefx::storage::StateStore;

fn trade(token: &str, direction: Direction, amount: u128) -> TradeIntent {
    TradeIntent {
        token_id: token.to_string(),
        direction,
        amount,
        min_out: 0,
        trader: "alice".to_string(),
    }
}

fn run_history(engine: &CurveEngine) {
    engine.register("a", CurveConfig::unit(TokenMetadata::default())).unwrap();
    engine.register("b", CurveConfig::unit(TokenMetadata::default())).unwrap();
    engine.execute(&trade("a", Direction::Buy, 1_000)).unwrap();
    engine
        .apply_factor(&FactorPush {
            token_id: "a".to_string(),
            new_factor_bps: 9_800,
            as_of: 10,
            caller_is_oracle: true,
        })
        .unwrap();
    engine
        .update_fees(&FeeUpdate {
            token_id: "a".to_string(),
            fee_bps: 100,
            founder_share_of_fee_bps: 5_000,
        })
        .unwrap();
    engine.execute(&trade("a", Direction::Sell, 3_000)).unwrap();
    // Rejections never reach the log.
    assert!(engine.execute(&trade("a", Direction::Sell, 1_000_000)).is_err());
    engine.execute(&trade("b", Direction::Buy, 6_000)).unwrap();
    engine
        .migrate(&MigrationTrigger { token_id: "b".to_string() })
        .unwrap();
}

#[test]
fn replay_matches_live_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let engine = CurveEngine::new().with_audit(AuditLog::open(&path).unwrap());
    run_history(&engine);

    let rec = AuditLog::recover(&path).unwrap();
    assert_eq!(rec.entries, 8);
    assert!(rec.divergences.is_empty(), "{:?}", rec.divergences);
    for id in engine.tokens() {
        assert_eq!(rec.curves.get(&id).unwrap(), engine.state(&id).unwrap().as_ref());
    }
    assert_eq!(rec.curves.get("b").unwrap().status(), CurveStatus::Migrated);
}

#[test]
fn restarted_engine_continues_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    {
        let engine = CurveEngine::new().with_audit(AuditLog::open(&path).unwrap());
        run_history(&engine);
    }

    let rec = AuditLog::recover(&path).unwrap();
    let engine = CurveEngine::new()
        .with_states(rec.curves.into_values())
        .with_audit(AuditLog::open(&path).unwrap());
    engine.execute(&trade("a", Direction::Buy, 500)).unwrap();
    let live = engine.state("a").unwrap();

    let again = AuditLog::recover(&path).unwrap();
    assert!(again.divergences.is_empty());
    assert_eq!(again.curves.get("a").unwrap(), live.as_ref());
}

#[test]
fn torn_final_line_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    {
        let engine = CurveEngine::new().with_audit(AuditLog::open(&path).unwrap());
        engine.register("a", CurveConfig::unit(TokenMetadata::default())).unwrap();
        engine.execute(&trade("a", Direction::Buy, 1_000)).unwrap();
    }
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    write!(f, "{{\"trade\":{{\"ts\":1,\"token_id\":\"a\"").unwrap();
    drop(f);

    let rec = AuditLog::recover(&path).unwrap();
    assert_eq!(rec.entries, 2);
    assert_eq!(rec.skipped_lines, 1);
    assert_eq!(rec.curves.get("a").unwrap().total_issued(), 9_024);
}

#[test]
fn sqlite_mirror_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.log");
    let db = dir.path().join("curve.sqlite");
    let engine = CurveEngine::new().with_audit(AuditLog::open(&audit).unwrap());
    run_history(&engine);

    let mut store = StateStore::new(db.to_str().unwrap()).unwrap();
    store.init().unwrap();
    let a = engine.state("a").unwrap();
    let b = engine.state("b").unwrap();
    store.persist_snapshot(1, &[a.as_ref(), b.as_ref()]).unwrap();
    drop(store);

    let store = StateStore::new(db.to_str().unwrap()).unwrap();
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(&loaded[0], a.as_ref());
    assert_eq!(loaded[0].state_hash().unwrap(), a.state_hash().unwrap());
    assert_eq!(&loaded[1], b.as_ref());
}

#[test]
fn restart_after_torn_tail_keeps_new_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    {
        let engine = CurveEngine::new().with_audit(AuditLog::open(&path).unwrap());
        engine.register("a", CurveConfig::unit(TokenMetadata::default())).unwrap();
        engine.execute(&trade("a", Direction::Buy, 1_000)).unwrap();
    }
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    write!(f, "{{\"trade\":{{\"ts\":1").unwrap();
    drop(f);

    // Same order as service startup: recover, seed, reopen for append.
    let rec = AuditLog::recover(&path).unwrap();
    assert_eq!(rec.skipped_lines, 1);
    let engine = CurveEngine::new()
        .with_states(rec.curves.into_values())
        .with_audit(AuditLog::open(&path).unwrap());
    let r = engine.execute(&trade("a", Direction::Buy, 500)).unwrap();
    assert_eq!(r.seq, 2);
    let live = engine.state("a").unwrap();

    let again = AuditLog::recover(&path).unwrap();
    assert_eq!(again.skipped_lines, 0);
    assert_eq!(again.entries, 3);
    assert!(again.divergences.is_empty(), "{:?}", again.divergences);
    assert_eq!(again.curves.get("a").unwrap(), live.as_ref());
}
