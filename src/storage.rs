use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::curve::state::CurveState;
use crate::intent::TradeReceipt;

/// SQLite mirror of the curve records. The audit log stays canonical; this is
/// a fast-start cache and a queryable trade history.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS curves (
                token_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                seq INTEGER NOT NULL,
                real_base TEXT NOT NULL,
                total_issued TEXT NOT NULL,
                state_hash TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS trades (
                token_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                trader TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount_in TEXT NOT NULL,
                amount_out TEXT NOT NULL,
                founder_fee TEXT NOT NULL,
                treasury_fee TEXT NOT NULL,
                factor_bps INTEGER NOT NULL,
                virtual_base TEXT NOT NULL,
                virtual_token TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (token_id, seq)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Upsert one row per token. Amounts are stored as decimal text since
    /// SQLite integers stop at 64 bits.
    pub fn persist_snapshot(&mut self, ts: u64, curves: &[&CurveState]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for state in curves {
            let record = serde_json::to_string(state).context("serialize curve record")?;
            tx.execute(
                "INSERT INTO curves (token_id, status, seq, real_base, total_issued, state_hash, record, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(token_id) DO UPDATE SET
                    status = excluded.status,
                    seq = excluded.seq,
                    real_base = excluded.real_base,
                    total_issued = excluded.total_issued,
                    state_hash = excluded.state_hash,
                    record = excluded.record,
                    updated_ts = excluded.updated_ts
                 WHERE excluded.seq >= curves.seq",
                params![
                    state.token_id(),
                    state.status().as_str(),
                    state.seq() as i64,
                    state.real_base().to_string(),
                    state.total_issued().to_string(),
                    state.state_hash()?,
                    record,
                    ts as i64
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn record_trade(&mut self, ts: u64, token_id: &str, trader: &str, receipt: &TradeReceipt) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trades (token_id, seq, ts, trader, direction, amount_in, amount_out,
                founder_fee, treasury_fee, factor_bps, virtual_base, virtual_token, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                token_id,
                receipt.seq as i64,
                ts as i64,
                trader,
                receipt.direction.as_str(),
                receipt.amount_in.to_string(),
                receipt.amount_out.to_string(),
                receipt.fees.founder_fee.to_string(),
                receipt.fees.treasury_fee.to_string(),
                receipt.factor_bps as i64,
                receipt.reserves_after.virtual_base.to_string(),
                receipt.reserves_after.virtual_token.to_string(),
                receipt.new_status.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, token_id: &str) -> Result<Option<CurveState>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM curves WHERE token_id = ?1",
                params![token_id],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json).context("decode curve record")?)),
            None => Ok(None),
        }
    }

    pub fn load_all(&self) -> Result<Vec<CurveState>> {
        let mut stmt = self.conn.prepare("SELECT record FROM curves ORDER BY token_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).context("decode curve record")?);
        }
        Ok(out)
    }

    pub fn trade_count(&self, token_id: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE token_id = ?1",
            params![token_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CurveConfig, TokenMetadata};

    fn curve(id: &str) -> CurveState {
        CurveState::new(id, CurveConfig::unit(TokenMetadata::default())).unwrap()
    }

    #[test]
    fn test_snapshot_upsert_and_load() {
        let mut store = StateStore::in_memory().unwrap();
        store.init().unwrap();
        let mut c = curve("a");
        store.persist_snapshot(1, &[&c]).unwrap();
        c.buy(1_000, 0).unwrap();
        store.persist_snapshot(2, &[&c]).unwrap();
        assert_eq!(store.load("a").unwrap(), Some(c.clone()));
        assert_eq!(store.load_all().unwrap().len(), 1);
        assert!(store.load("b").unwrap().is_none());
    }

    #[test]
    fn test_older_snapshot_does_not_overwrite() {
        let mut store = StateStore::in_memory().unwrap();
        store.init().unwrap();
        let old = curve("a");
        let mut new = old.clone();
        new.buy(1_000, 0).unwrap();
        store.persist_snapshot(2, &[&new]).unwrap();
        store.persist_snapshot(3, &[&old]).unwrap();
        assert_eq!(store.load("a").unwrap(), Some(new));
    }

    #[test]
    fn test_trade_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.sqlite");
        let mut store = StateStore::new(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        let mut c = curve("a");
        let r = c.buy(1_000, 0).unwrap();
        store.record_trade(1, "a", "alice", &r).unwrap();
        store.record_trade(1, "a", "alice", &r).unwrap();
        assert_eq!(store.trade_count("a").unwrap(), 1);
    }
}
