//! Per-token exclusion under contention.

use std::sync::Arc;
use std::thread;

use curvefx::config::{CurveConfig, TokenMetadata};
use curvefx::engine::CurveEngine;
use curvefx::intent::{Direction, TradeIntent};

fn wide_config() -> CurveConfig {
    let mut cfg = CurveConfig::unit(TokenMetadata::default());
    cfg.virtual_base = 1_000_000;
    cfg.virtual_token = 1_000_000_000;
    cfg.max_supply = 1_000_000_000;
    cfg.migration_threshold = u128::MAX;
    cfg
}

fn buy(token: &str, amount: u128) -> TradeIntent {
    TradeIntent {
        token_id: token.to_string(),
        direction: Direction::Buy,
        amount,
        min_out: 0,
        trader: "t".to_string(),
    }
}

#[test]
fn concurrent_buys_match_serial_execution() {
    let engine = Arc::new(CurveEngine::new().with_invariant_checks(true));
    engine.register("shared", wide_config()).unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let mut out = 0u128;
            for _ in 0..200 {
                out += engine.execute(&buy("shared", 1_000)).unwrap().amount_out;
            }
            out
        }));
    }
    let issued: u128 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // Identical buys commute, so any interleaving ends in the serial state.
    let serial = CurveEngine::new();
    serial.register("shared", wide_config()).unwrap();
    for _ in 0..1_600 {
        serial.execute(&buy("shared", 1_000)).unwrap();
    }

    let live = engine.snapshot("shared").unwrap();
    let expected = serial.snapshot("shared").unwrap();
    assert_eq!(live.total_issued, issued);
    assert_eq!(live.virtual_base, expected.virtual_base);
    assert_eq!(live.virtual_token, expected.virtual_token);
    assert_eq!(live.total_issued, expected.total_issued);
    assert_eq!(live.seq, 1_600);
}

#[test]
fn tokens_are_independent() {
    let engine = Arc::new(CurveEngine::new());
    for i in 0..4 {
        engine.register(format!("tok-{}", i), wide_config()).unwrap();
    }
    let mut handles = vec![];
    for i in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let id = format!("tok-{}", i);
            for _ in 0..100 * (i + 1) {
                engine.execute(&buy(&id, 500)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    for i in 0..4u64 {
        let snap = engine.snapshot(&format!("tok-{}", i)).unwrap();
        assert_eq!(snap.trades, 100 * (i + 1));
    }
}

#[test]
fn readers_see_committed_states_only() {
    let engine = Arc::new(CurveEngine::new());
    engine.register("r", wide_config()).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..500 {
                engine.execute(&buy("r", 2_000)).unwrap();
            }
        })
    };
    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut last_seq = 0;
            for _ in 0..500 {
                let state = engine.state("r").unwrap();
                let snap = state.snapshot().unwrap();
                assert!(snap.seq >= last_seq);
                last_seq = snap.seq;
                // Every published record is internally consistent.
                assert_eq!(snap.real_base, snap.virtual_base - 1_000_000);
                assert_eq!(snap.total_issued, 1_000_000_000 - snap.virtual_token);
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
}
