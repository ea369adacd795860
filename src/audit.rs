//! Append-only audit log of committed curve operations.
//!
//! One JSON object per line. Every entry records the request that was
//! committed plus the resulting state hash, so the log can rebuild every
//! curve by re-executing it and flag any step whose replayed state differs.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::CurveConfig;
use crate::curve::migration::{CurveStatus, MigrationHandoff};
use crate::curve::state::CurveState;
use crate::intent::{Direction, TokenId};
use crate::logging;

#[derive(Debug)]
pub struct AuditLog {
    file: File,
    path: PathBuf,
    fsync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntry {
    Register {
        ts: u64,
        token_id: TokenId,
        config: CurveConfig,
        state_hash: String,
    },
    Trade {
        ts: u64,
        token_id: TokenId,
        trader: String,
        direction: Direction,
        amount_in: u128,
        min_out: u128,
        amount_out: u128,
        founder_fee: u128,
        treasury_fee: u128,
        factor_bps: u32,
        virtual_base: u128,
        virtual_token: u128,
        real_base: u128,
        paid_out_base: u128,
        total_issued: u128,
        status: CurveStatus,
        seq: u64,
        state_hash: String,
    },
    Factor {
        ts: u64,
        token_id: TokenId,
        prev_factor_bps: u32,
        new_factor_bps: u32,
        as_of: u64,
        seq: u64,
        state_hash: String,
    },
    Fees {
        ts: u64,
        token_id: TokenId,
        fee_bps: u32,
        founder_share_of_fee_bps: u32,
        seq: u64,
        state_hash: String,
    },
    Migrate {
        ts: u64,
        token_id: TokenId,
        handoff: MigrationHandoff,
        seq: u64,
        state_hash: String,
    },
}

impl AuditEntry {
    pub fn token_id(&self) -> &str {
        match self {
            AuditEntry::Register { token_id, .. }
            | AuditEntry::Trade { token_id, .. }
            | AuditEntry::Factor { token_id, .. }
            | AuditEntry::Fees { token_id, .. }
            | AuditEntry::Migrate { token_id, .. } => token_id,
        }
    }

    pub fn state_hash(&self) -> &str {
        match self {
            AuditEntry::Register { state_hash, .. }
            | AuditEntry::Trade { state_hash, .. }
            | AuditEntry::Factor { state_hash, .. }
            | AuditEntry::Fees { state_hash, .. }
            | AuditEntry::Migrate { state_hash, .. } => state_hash,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuditEntry::Register { .. } => "register",
            AuditEntry::Trade { .. } => "trade",
            AuditEntry::Factor { .. } => "factor",
            AuditEntry::Fees { .. } => "fees",
            AuditEntry::Migrate { .. } => "migrate",
        }
    }
}

/// A replayed entry whose outcome did not match what was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub line: usize,
    pub token_id: TokenId,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Recovery {
    pub curves: HashMap<TokenId, CurveState>,
    pub entries: usize,
    pub skipped_lines: usize,
    pub divergences: Vec<Divergence>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::open_with(path, false)
    }

    /// `fsync` forces a `sync_data` after every append. A partial last line
    /// left by an interrupted write is cut off before the first append, so new
    /// entries always start on a fresh line.
    pub fn open_with(path: impl AsRef<Path>, fsync: bool) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        {
            let mut file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
            let len = file.metadata()?.len();
            let keep = complete_prefix_len(&mut file, len)?;
            if keep < len {
                file.set_len(keep)?;
                file.sync_data()?;
                logging::log(
                    logging::Level::Warn,
                    logging::Domain::Audit,
                    "torn_tail_trimmed",
                    logging::obj(&[
                        ("path", logging::v_str(&path.to_string_lossy())),
                        ("dropped_bytes", serde_json::json!(len - keep)),
                    ]),
                );
            }
        }
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self { file, path, fsync })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry).context("serialize audit entry")?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn read_entries(path: impl AsRef<Path>) -> Result<(Vec<(usize, AuditEntry)>, usize)> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((vec![], 0));
        }
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut entries = Vec::new();
        let mut skipped = 0;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push((idx + 1, entry)),
                Err(_) => skipped += 1,
            }
        }
        Ok((entries, skipped))
    }

    /// Rebuild every curve by re-executing the log.
    pub fn recover(path: impl AsRef<Path>) -> Result<Recovery> {
        let _scope = logging::ProfileScope::new("audit_recover");
        let (entries, skipped_lines) = Self::read_entries(path)?;
        let mut rec = Recovery {
            entries: entries.len(),
            skipped_lines,
            ..Default::default()
        };

        for (line, entry) in entries {
            let outcome = replay_entry(&mut rec.curves, &entry);
            let reason = match outcome {
                Err(reason) => Some(reason),
                Ok(hash) if hash != entry.state_hash() => {
                    Some(format!("state hash {} != recorded {}", hash, entry.state_hash()))
                }
                Ok(_) => None,
            };
            if let Some(reason) = reason {
                rec.divergences.push(Divergence {
                    line,
                    token_id: entry.token_id().to_string(),
                    kind: entry.kind(),
                    reason,
                });
            }
        }

        logging::log_recovery(rec.curves.len(), rec.entries, rec.divergences.len());
        Ok(rec)
    }
}

/// Length of the file up to and including its last newline.
fn complete_prefix_len(file: &mut File, len: u64) -> std::io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut end = len;
    let mut buf = vec![0u8; CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let n = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;
        if let Some(pos) = buf[..n].iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// Apply one entry to the in-memory curves, returning the resulting state hash.
fn replay_entry(curves: &mut HashMap<TokenId, CurveState>, entry: &AuditEntry) -> Result<String, String> {
    if let AuditEntry::Register { token_id, config, .. } = entry {
        if curves.contains_key(token_id) {
            return Err("duplicate registration".to_string());
        }
        let state = CurveState::new(token_id.clone(), config.clone()).map_err(|e| e.to_string())?;
        let hash = state.state_hash().map_err(|e| e.to_string())?;
        curves.insert(token_id.clone(), state);
        return Ok(hash);
    }

    let state = curves
        .get_mut(entry.token_id())
        .ok_or_else(|| "entry for unregistered token".to_string())?;
    let applied = match entry {
        AuditEntry::Trade { direction, amount_in, min_out, .. } => {
            state.trade(*direction, *amount_in, *min_out).map(|_| ())
        }
        AuditEntry::Factor { new_factor_bps, as_of, .. } => {
            state.apply_factor(*new_factor_bps, *as_of).map(|_| ())
        }
        AuditEntry::Fees { fee_bps, founder_share_of_fee_bps, .. } => {
            state.update_fees(*fee_bps, *founder_share_of_fee_bps).map(|_| ())
        }
        AuditEntry::Migrate { .. } => state.migrate().map(|_| ()),
        AuditEntry::Register { .. } => Ok(()),
    };
    applied.map_err(|e| e.to_string())?;
    state.state_hash().map_err(|e| e.to_string())
}
