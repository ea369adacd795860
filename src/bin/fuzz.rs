//! Randomized operation sequences against a handful of curves.
//!
//! Every committed operation must pass the transition checks and every
//! rejected one must leave the record byte-for-byte unchanged.
//! SEED and OPS control the run.

use std::env;

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use curvefx::config::{CurveConfig, TokenMetadata};
use curvefx::curve::{CurveState, CurveStatus};
use curvefx::intent::Direction;
use curvefx::verify::invariants::{assert_fee_conservation, assert_transition};

fn curve(i: usize, rng: &mut StdRng) -> Result<CurveState> {
    let mut cfg = CurveConfig::unit(TokenMetadata {
        symbol: format!("FZ{}", i),
        ..Default::default()
    });
    cfg.virtual_base = rng.gen_range(1_000..1_000_000);
    cfg.virtual_token = rng.gen_range(10_000..100_000_000);
    cfg.max_supply = cfg.virtual_token;
    cfg.fee_bps = rng.gen_range(0..500);
    cfg.founder_share_of_fee_bps = rng.gen_range(0..=10_000);
    cfg.migration_threshold = rng.gen_range(1_000..10_000_000);
    Ok(CurveState::new(format!("fz-{}", i), cfg)?)
}

fn main() -> Result<()> {
    let seed = env::var("SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(42u64);
    let ops = env::var("OPS").ok().and_then(|v| v.parse().ok()).unwrap_or(100_000u64);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut curves = Vec::new();
    for i in 0..4 {
        curves.push(curve(i, &mut rng)?);
    }

    let mut committed = 0u64;
    let mut rejected = 0u64;
    let mut migrations = vec![0u32; curves.len()];
    let mut as_of = vec![0u64; curves.len()];

    for step in 0..ops {
        let idx = rng.gen_range(0..curves.len());
        let before = curves[idx].clone();
        let c = &mut curves[idx];
        let roll = rng.gen_range(0..100);

        let outcome = if roll < 50 {
            let amount = rng.gen_range(0..50_000u128);
            let min_out = if rng.gen_bool(0.1) { rng.gen_range(0..10_000u128) } else { 0 };
            c.trade(Direction::Buy, amount, min_out).map(|r| {
                if r.migration_triggered {
                    migrations[idx] += 1;
                }
                (amount, Some(r.fees))
            })
        } else if roll < 85 {
            let held = c.total_issued().max(1);
            let amount = rng.gen_range(0..=held + held / 10);
            c.trade(Direction::Sell, amount, 0).map(|r| (r.fees.net + r.fees.fee(), Some(r.fees)))
        } else if roll < 95 {
            // Occasionally replay an old timestamp to hit the staleness guard.
            let t = if rng.gen_bool(0.2) { as_of[idx] } else { as_of[idx] + rng.gen_range(1..100) };
            let factor = rng.gen_range(8_500..11_500);
            c.apply_factor(factor, t).map(|_| {
                as_of[idx] = t;
                (0, None)
            })
        } else if roll < 98 {
            c.update_fees(rng.gen_range(0..10_500), rng.gen_range(0..10_500)).map(|_| (0, None))
        } else {
            c.migrate().map(|_| (0, None))
        };

        match outcome {
            Ok((gross, fees)) => {
                committed += 1;
                if let Err(v) = assert_transition(&before, c) {
                    bail!("step {} seed {}: {}", step, seed, v.msg);
                }
                if let Some(split) = fees {
                    if let Err(v) = assert_fee_conservation(gross, &split) {
                        bail!("step {} seed {}: {}", step, seed, v.msg);
                    }
                }
            }
            Err(e) => {
                rejected += 1;
                if *c != before {
                    bail!("step {} seed {}: rejected {} mutated the record", step, seed, e.code());
                }
            }
        }
    }

    for (i, c) in curves.iter().enumerate() {
        if migrations[i] > 1 {
            bail!("{} migrated {} times", c.token_id(), migrations[i]);
        }
        if c.status() != CurveStatus::Active && migrations[i] != 1 {
            bail!("{} left Active without a threshold crossing", c.token_id());
        }
        println!(
            "{} status={} real_base={} paid_out={} issued={} factor={} seq={}",
            c.token_id(),
            c.status().as_str(),
            c.real_base(),
            c.paid_out_base(),
            c.total_issued(),
            c.factor_bps(),
            c.seq()
        );
    }
    println!("seed={} ops={} committed={} rejected={}", seed, ops, committed, rejected);
    Ok(())
}
