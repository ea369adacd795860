//! Structured JSON-lines logging for the curve engine.
//!
//! Every record carries a run id, a process-wide sequence number, a level and
//! a domain, so a run can be filtered, summarized and lined up against the
//! audit log. Records go to `LOG_DIR/<run_id>/events.jsonl` (info and above)
//! or `trace.jsonl` (debug and trace), and are mirrored to stderr. Stdout is
//! left to the service protocol.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Trade,     // Buy/sell commits
    Guard,     // Rejected requests
    Oracle,    // Factor updates
    Lifecycle, // Registration, migration
    Audit,     // Audit log, recovery
    Storage,   // Snapshot persistence
    System,    // Startup, shutdown
    Profile,   // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Trade => "trade",
            Domain::Guard => "guard",
            Domain::Oracle => "oracle",
            Domain::Lifecycle => "lifecycle",
            Domain::Audit => "audit",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["signature", "authorization", "nonce"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["token_id", "trader", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(sanitize_fields(fields));

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain helpers
// =============================================================================

pub fn log_registration(token_id: &str, symbol: &str, threshold: u128, state_hash: &str) {
    log(
        Level::Info,
        Domain::Lifecycle,
        "registered",
        obj(&[
            ("token_id", v_str(token_id)),
            ("symbol", v_str(symbol)),
            ("migration_threshold", v_amount(threshold)),
            ("state_hash", v_str(state_hash)),
        ]),
    );
}

#[allow(clippy::too_many_arguments)]
pub fn log_trade(
    token_id: &str,
    trader: &str,
    direction: &str,
    amount_in: u128,
    amount_out: u128,
    founder_fee: u128,
    treasury_fee: u128,
    factor_bps: u32,
    seq: u64,
) {
    log(
        Level::Info,
        Domain::Trade,
        "commit",
        obj(&[
            ("token_id", v_str(token_id)),
            ("trader", v_str(trader)),
            ("direction", v_str(direction)),
            ("amount_in", v_amount(amount_in)),
            ("amount_out", v_amount(amount_out)),
            ("founder_fee", v_amount(founder_fee)),
            ("treasury_fee", v_amount(treasury_fee)),
            ("factor_bps", json!(factor_bps)),
            ("curve_seq", json!(seq)),
        ]),
    );
}

pub fn log_reject(token_id: &str, op: &str, code: &str, detail: &str) {
    log(
        Level::Debug,
        Domain::Guard,
        "reject",
        obj(&[
            ("token_id", v_str(token_id)),
            ("op", v_str(op)),
            ("code", v_str(code)),
            ("msg", v_str(detail)),
        ]),
    );
}

pub fn log_factor(token_id: &str, prev_bps: u32, new_bps: u32, as_of: u64) {
    log(
        Level::Info,
        Domain::Oracle,
        "factor_applied",
        obj(&[
            ("token_id", v_str(token_id)),
            ("prev_bps", json!(prev_bps)),
            ("new_bps", json!(new_bps)),
            ("as_of", json!(as_of)),
        ]),
    );
}

pub fn log_migration(token_id: &str, from: &str, to: &str, real_base: u128, total_issued: u128) {
    log(
        Level::Warn,
        Domain::Lifecycle,
        "status_change",
        obj(&[
            ("token_id", v_str(token_id)),
            ("from", v_str(from)),
            ("to", v_str(to)),
            ("real_base", v_amount(real_base)),
            ("total_issued", v_amount(total_issued)),
        ]),
    );
}

pub fn log_recovery(tokens: usize, entries: usize, divergent: usize) {
    let level = if divergent > 0 { Level::Error } else { Level::Info };
    log(
        level,
        Domain::Audit,
        "recovered",
        obj(&[
            ("tokens", json!(tokens)),
            ("entries", json!(entries)),
            ("divergent", json!(divergent)),
        ]),
    );
}

// =============================================================================
// Value helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// Amounts are u128 and may not fit a JSON number; they are logged as strings.
pub fn v_amount(n: u128) -> Value {
    Value::String(n.to_string())
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            context: None,
            started: Instant::now(),
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: Some(obj(fields)),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if Level::Trace < Level::from_env() {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_amounts_survive_beyond_u64() {
        let big = u128::MAX;
        assert_eq!(v_amount(big), Value::String(big.to_string()));
    }

    #[test]
    fn test_split_promotes_correlation_keys() {
        let (top, data) = split_fields(obj(&[
            ("token_id", v_str("t")),
            ("amount_in", v_amount(5)),
        ]));
        assert!(top.contains_key("token_id"));
        assert!(data.contains_key("amount_in"));
    }

    #[test]
    fn test_signature_redacted() {
        let m = sanitize_fields(obj(&[("signature", v_str("0xdead"))]));
        assert_eq!(m.get("signature").unwrap(), "[REDACTED]");
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
