//! Line-oriented curve service.
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Logs go to stderr and the run directory.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use curvefx::audit::AuditLog;
use curvefx::config::{Config, CurveConfig, TokenMetadata};
use curvefx::curve::{CurveSnapshot, CurveStatus, MigrationHandoff};
use curvefx::engine::CurveEngine;
use curvefx::error::CurveError;
use curvefx::intent::{Direction, FactorPush, FeeUpdate, MigrationTrigger, TokenId, TradeIntent, TradePreview, TradeReceipt};
use curvefx::logging::{self, obj, v_str, Domain, Level};
use curvefx::storage::StateStore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Request {
    Register {
        token_id: TokenId,
        #[serde(default)]
        metadata: TokenMetadata,
        /// Full parameter set; the standard launch parameters when absent.
        #[serde(default)]
        config: Option<CurveConfig>,
    },
    Trade(TradeIntent),
    Factor(FactorPush),
    Fees(FeeUpdate),
    Migrate(MigrationTrigger),
    Quote {
        token_id: TokenId,
        direction: Direction,
        amount: u128,
    },
    Snapshot {
        token_id: TokenId,
    },
    Tokens {
        #[serde(default)]
        status: Option<CurveStatus>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Response {
    Registered(CurveSnapshot),
    Receipt(TradeReceipt),
    FactorApplied { token_id: TokenId, prev_factor_bps: u32, factor_bps: u32 },
    FeesUpdated { token_id: TokenId, fee_bps: u32, founder_share_of_fee_bps: u32 },
    Migrated(MigrationHandoff),
    Quote(TradePreview),
    Snapshot(CurveSnapshot),
    Tokens(Vec<TokenId>),
    Error { code: &'static str, message: String },
}

impl From<CurveError> for Response {
    fn from(e: CurveError) -> Self {
        Response::Error { code: e.code(), message: e.to_string() }
    }
}

struct Service {
    engine: CurveEngine,
    store: StateStore,
    persist_every: u64,
}

impl Service {
    fn handle(&mut self, req: Request) -> Response {
        match self.dispatch(req) {
            Ok(resp) => resp,
            Err(e) => e.into(),
        }
    }

    fn dispatch(&mut self, req: Request) -> Result<Response, CurveError> {
        let resp = match req {
            Request::Register { token_id, metadata, config } => {
                let config = config.unwrap_or_else(|| CurveConfig::standard(metadata));
                let snap = self.engine.register(token_id.clone(), config)?;
                self.persist(&token_id, true);
                Response::Registered(snap)
            }
            Request::Trade(intent) => {
                let receipt = self.engine.execute(&intent)?;
                if let Err(e) = self.store.record_trade(logging::ts_epoch_ms(), &intent.token_id, &intent.trader, &receipt) {
                    storage_error("record_trade", &e);
                }
                self.persist(&intent.token_id, receipt.migration_triggered);
                Response::Receipt(receipt)
            }
            Request::Factor(push) => {
                let prev = self.engine.apply_factor(&push)?;
                self.persist(&push.token_id, false);
                Response::FactorApplied {
                    token_id: push.token_id,
                    prev_factor_bps: prev,
                    factor_bps: push.new_factor_bps,
                }
            }
            Request::Fees(update) => {
                self.engine.update_fees(&update)?;
                self.persist(&update.token_id, false);
                Response::FeesUpdated {
                    token_id: update.token_id,
                    fee_bps: update.fee_bps,
                    founder_share_of_fee_bps: update.founder_share_of_fee_bps,
                }
            }
            Request::Migrate(trigger) => {
                let handoff = self.engine.migrate(&trigger)?;
                self.persist(&trigger.token_id, true);
                Response::Migrated(handoff)
            }
            Request::Quote { token_id, direction, amount } => {
                let preview = match direction {
                    Direction::Buy => self.engine.quote_buy(&token_id, amount)?,
                    Direction::Sell => self.engine.quote_sell(&token_id, amount)?,
                };
                Response::Quote(preview)
            }
            Request::Snapshot { token_id } => Response::Snapshot(self.engine.snapshot(&token_id)?),
            Request::Tokens { status } => Response::Tokens(match status {
                Some(status) => self.engine.tokens_with_status(status),
                None => self.engine.tokens(),
            }),
        };
        Ok(resp)
    }

    /// Mirror the token's record to SQLite every `persist_every` commits, or
    /// immediately on lifecycle changes. The audit log is already durable, so
    /// failures here are logged and not surfaced.
    fn persist(&mut self, token_id: &str, force: bool) {
        let Ok(state) = self.engine.state(token_id) else {
            return;
        };
        if !force && state.seq() % self.persist_every != 0 {
            return;
        }
        if let Err(e) = self.store.persist_snapshot(logging::ts_epoch_ms(), &[state.as_ref()]) {
            storage_error("persist_snapshot", &e);
        }
    }
}

fn storage_error(op: &str, e: &anyhow::Error) {
    logging::log(
        Level::Error,
        Domain::Storage,
        "write_failed",
        obj(&[("op", v_str(op)), ("msg", v_str(&e.to_string()))]),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let mut store = StateStore::new(&cfg.sqlite_path)?;
    store.init()?;

    // The audit log is canonical; SQLite rows are only compared against it.
    let recovery = AuditLog::recover(&cfg.audit_path)?;
    for d in &recovery.divergences {
        logging::log(
            Level::Error,
            Domain::Audit,
            "divergence",
            obj(&[
                ("token_id", v_str(&d.token_id)),
                ("line", json!(d.line)),
                ("kind", v_str(d.kind)),
                ("msg", v_str(&d.reason)),
            ]),
        );
    }
    for cached in store.load_all()? {
        let fresh = recovery.curves.get(cached.token_id());
        let fresh_hash = fresh.map(|c| c.state_hash()).transpose()?;
        if fresh_hash.is_none() || fresh_hash != Some(cached.state_hash()?) {
            logging::log(
                Level::Warn,
                Domain::Storage,
                "stale_row",
                obj(&[("token_id", v_str(cached.token_id()))]),
            );
        }
    }
    let recovered: Vec<_> = recovery.curves.values().collect();
    store.persist_snapshot(logging::ts_epoch_ms(), &recovered)?;

    let audit = AuditLog::open_with(&cfg.audit_path, cfg.audit_fsync)?;
    let engine = CurveEngine::new()
        .with_invariant_checks(cfg.check_invariants)
        .with_states(recovery.curves.into_values())
        .with_audit(audit);

    logging::log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("audit_path", v_str(&cfg.audit_path)),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("tokens", json!(engine.tokens().len())),
        ]),
    );

    let mut service = Service {
        engine,
        store,
        persist_every: cfg.persist_every.max(1),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => service.handle(req),
            Err(e) => Response::Error { code: "bad_request", message: e.to_string() },
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    logging::log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}
