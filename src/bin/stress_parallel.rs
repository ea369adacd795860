//! Parallel stress test: many threads trading on a shared set of curves.
//!
//! Checks that per-token exclusion holds under contention by rebuilding every
//! curve from the audit log afterwards and comparing it with the live record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use curvefx::audit::AuditLog;
use curvefx::config::{CurveConfig, TokenMetadata};
use curvefx::engine::CurveEngine;
use curvefx::intent::{Direction, FactorPush, TradeIntent};
use curvefx::verify::invariants::assert_curve_invariants;

fn main() -> Result<()> {
    println!("=== PARALLEL STRESS TEST ===\n");

    let n_threads = num_cpus::get().min(8);
    let n_tokens = 4;
    let ops_per_thread = std::env::var("OPS").ok().and_then(|v| v.parse().ok()).unwrap_or(20_000u64);

    let audit_path = std::env::temp_dir().join(format!("curvefx_stress_{}.log", std::process::id()));
    let engine = Arc::new(
        CurveEngine::new()
            .with_invariant_checks(true)
            .with_audit(AuditLog::open(&audit_path)?),
    );
    for t in 0..n_tokens {
        let mut cfg = CurveConfig::unit(TokenMetadata {
            symbol: format!("ST{}", t),
            ..Default::default()
        });
        cfg.virtual_base = 1_000_000;
        cfg.virtual_token = 1_000_000_000;
        cfg.max_supply = 1_000_000_000;
        cfg.migration_threshold = 50_000_000;
        engine.register(format!("tok-{}", t), cfg)?;
    }

    println!("Threads: {}", n_threads);
    println!("Tokens: {}", n_tokens);
    println!("Ops per thread: {}", ops_per_thread);

    let committed = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let mut handles = vec![];
    for t in 0..n_threads {
        let engine = Arc::clone(&engine);
        let committed = Arc::clone(&committed);
        let rejected = Arc::clone(&rejected);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(t as u64);
            let mut held = vec![0u128; n_tokens];
            for i in 0..ops_per_thread {
                let tok = rng.gen_range(0..n_tokens);
                let token_id = format!("tok-{}", tok);
                let ok = if i % 97 == 0 {
                    // Thread-local timestamps collide across threads; stale pushes are expected.
                    engine
                        .apply_factor(&FactorPush {
                            token_id,
                            new_factor_bps: rng.gen_range(9_900..=10_000),
                            as_of: i * n_threads as u64 + t as u64 + 1,
                            caller_is_oracle: true,
                        })
                        .is_ok()
                } else if held[tok] > 0 && rng.gen_bool(0.4) {
                    let amount = rng.gen_range(1..=held[tok]);
                    match engine.execute(&TradeIntent {
                        token_id,
                        direction: Direction::Sell,
                        amount,
                        min_out: 0,
                        trader: format!("thread-{}", t),
                    }) {
                        Ok(_) => {
                            held[tok] -= amount;
                            true
                        }
                        Err(_) => false,
                    }
                } else {
                    match engine.execute(&TradeIntent {
                        token_id,
                        direction: Direction::Buy,
                        amount: rng.gen_range(1..5_000),
                        min_out: 0,
                        trader: format!("thread-{}", t),
                    }) {
                        Ok(r) => {
                            held[tok] += r.amount_out;
                            true
                        }
                        Err(_) => false,
                    }
                };
                if ok {
                    committed.fetch_add(1, Ordering::Relaxed);
                } else {
                    rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        if h.join().is_err() {
            bail!("worker thread panicked");
        }
    }

    let elapsed = start.elapsed();
    let total = committed.load(Ordering::Relaxed) + rejected.load(Ordering::Relaxed);
    println!("\n=== Summary ===");
    println!("Total time: {:.2?}", elapsed);
    println!("Committed: {}", committed.load(Ordering::Relaxed));
    println!("Rejected: {}", rejected.load(Ordering::Relaxed));
    println!("Throughput: {:.0} ops/sec", total as f64 / elapsed.as_secs_f64());

    let recovery = AuditLog::recover(&audit_path)?;
    if !recovery.divergences.is_empty() {
        bail!("{} audit divergences", recovery.divergences.len());
    }
    for id in engine.tokens() {
        let live = engine.state(&id)?;
        if let Err(v) = assert_curve_invariants(&live) {
            bail!("{}: {}", id, v.msg);
        }
        match recovery.curves.get(&id) {
            Some(replayed) if replayed == live.as_ref() => {}
            _ => bail!("{}: replayed record differs from live record", id),
        }
        println!("{} status={} issued={} real_base={}", id, live.status().as_str(), live.total_issued(), live.real_base());
    }
    let _ = std::fs::remove_file(&audit_path);

    println!("\n✓ Parallel stress test complete");
    Ok(())
}
