//! Rebuild every curve from an audit log and print one snapshot per token.
//!
//! Usage: replay [AUDIT_PATH]

use std::env;

use anyhow::Result;
use serde_json::json;

use curvefx::audit::AuditLog;
use curvefx::config::Config;

fn main() -> Result<()> {
    let path = env::args().nth(1).unwrap_or_else(|| Config::from_env().audit_path);
    let recovery = AuditLog::recover(&path)?;

    let mut ids: Vec<_> = recovery.curves.keys().cloned().collect();
    ids.sort();
    for id in ids {
        let Some(state) = recovery.curves.get(&id) else { continue };
        let snapshot = state.snapshot()?;
        println!("{}", serde_json::to_string(&snapshot)?);
    }
    for d in &recovery.divergences {
        println!(
            "{}",
            json!({
                "divergence": {
                    "line": d.line,
                    "token_id": d.token_id,
                    "kind": d.kind,
                    "reason": d.reason,
                }
            })
        );
    }
    eprintln!(
        "replayed {} entries ({} skipped), {} tokens, {} divergences",
        recovery.entries,
        recovery.skipped_lines,
        recovery.curves.len(),
        recovery.divergences.len()
    );

    if !recovery.divergences.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
