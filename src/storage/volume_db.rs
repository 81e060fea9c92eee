//! Volume sample persistence
//!
//! One row per `(symbol, trade_type)`. The first sample wins: a later sample
//! for the same pair is skipped, never merged or overwritten, even when it
//! comes from a different window.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{InstrumentCategory, VolumeSample};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trades_data (
    symbol TEXT NOT NULL,
    trade_type TEXT NOT NULL,
    total_trades INTEGER NOT NULL,
    total_volume REAL NOT NULL,
    official_volume REAL NOT NULL,
    exchange TEXT NOT NULL DEFAULT 'OKX',
    timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    observed_trades INTEGER,
    observed_volume REAL,
    window_start_ms INTEGER,
    window_end_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_trades_data_ts
    ON trades_data(timestamp DESC);
"#;

/// Fails on tables that already hold duplicate keys; upserts then rely on the
/// in-transaction lookup alone.
const UNIQUE_KEY_SQL: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_data_symbol_type
    ON trades_data(symbol, trade_type)";

/// Columns missing from tables created by the seven-column legacy schema
const EXTRA_COLUMNS: &[(&str, &str)] = &[
    ("observed_trades", "INTEGER"),
    ("observed_volume", "REAL"),
    ("window_start_ms", "INTEGER"),
    ("window_end_ms", "INTEGER"),
];

const SELECT_COLUMNS: &str = "symbol, trade_type, total_trades, total_volume, official_volume, \
     exchange, timestamp, observed_trades, observed_volume, window_start_ms, window_end_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    SkippedDuplicate,
}

/// A stored row, as read back for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedVolume {
    pub symbol: String,
    pub trade_type: String,
    /// Scaled (24h) trade count
    pub total_trades: i64,
    /// Scaled (24h) volume
    pub total_volume: f64,
    pub official_volume: f64,
    pub exchange: String,
    pub timestamp: String,
    pub observed_trades: Option<i64>,
    pub observed_volume: Option<f64>,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
}

impl PersistedVolume {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            trade_type: row.get(1)?,
            total_trades: row.get(2)?,
            total_volume: row.get(3)?,
            official_volume: row.get(4)?,
            exchange: row.get(5)?,
            timestamp: row.get(6)?,
            observed_trades: row.get(7)?,
            observed_volume: row.get(8)?,
            window_start_ms: row.get(9)?,
            window_end_ms: row.get(10)?,
        })
    }

    pub fn divergence_ratio(&self) -> Option<f64> {
        crate::sampling::extrapolate::divergence_ratio(self.total_volume, self.official_volume)
    }
}

#[derive(Clone)]
pub struct VolumeDb {
    conn: Arc<Mutex<Connection>>,
    exchange: String,
    unique_key: bool,
}

impl VolumeDb {
    pub fn new(db_path: &str, exchange: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize trades_data schema")?;
        let added = add_missing_columns(&conn)?;
        if added > 0 {
            info!(db_path, added, "Upgraded legacy trades_data table");
        }

        let unique_key = match conn.execute_batch(UNIQUE_KEY_SQL) {
            Ok(()) => true,
            Err(e) => {
                warn!(db_path, error = %e, "trades_data holds duplicate keys, unique index not created");
                false
            }
        };

        info!(db_path, unique_key, "Volume database ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            exchange: exchange.to_string(),
            unique_key,
        })
    }

    /// Insert unless a row for `(symbol, trade_type)` already exists.
    ///
    /// Lookup and insert share one transaction; the unique index backs it up
    /// for writers in other processes.
    pub async fn upsert(&self, sample: &VolumeSample) -> Result<UpsertOutcome> {
        let trade_type = sample.category.as_str();
        let timestamp = sample.sampled_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin upsert")?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM trades_data WHERE symbol = ?1 AND trade_type = ?2
                 ORDER BY timestamp DESC LIMIT 1",
                params![&sample.symbol, trade_type],
                |row| row.get(0),
            )
            .optional()
            .context("lookup existing sample")?;

        if existing.is_some() {
            info!(symbol = %sample.symbol, trade_type, "Sample already stored, skipping");
            return Ok(UpsertOutcome::SkippedDuplicate);
        }

        let on_conflict = if self.unique_key {
            " ON CONFLICT(symbol, trade_type) DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO trades_data
                (symbol, trade_type, total_trades, total_volume, official_volume, exchange,
                 timestamp, observed_trades, observed_volume, window_start_ms, window_end_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11){}",
            on_conflict
        );
        let changed = tx
            .execute(
                &sql,
                params![
                    &sample.symbol,
                    trade_type,
                    sample.scaled_trade_count as i64,
                    sample.scaled_volume,
                    sample.official_volume,
                    &self.exchange,
                    timestamp,
                    sample.observed_trade_count as i64,
                    sample.observed_volume,
                    sample.window_start_ms,
                    sample.window_end_ms,
                ],
            )
            .context("insert sample")?;
        tx.commit().context("commit upsert")?;

        if changed == 0 {
            info!(symbol = %sample.symbol, trade_type, "Sample already stored, skipping");
            return Ok(UpsertOutcome::SkippedDuplicate);
        }

        debug!(symbol = %sample.symbol, trade_type, "Sample stored");
        Ok(UpsertOutcome::Inserted)
    }

    pub async fn latest(
        &self,
        symbol: &str,
        category: InstrumentCategory,
    ) -> Result<Option<PersistedVolume>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM trades_data WHERE symbol = ?1 AND trade_type = ?2
             ORDER BY timestamp DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt
            .query_row(params![symbol, category.as_str()], PersistedVolume::from_row)
            .optional()?;
        Ok(row)
    }

    /// Most recent rows first, optionally for one category.
    pub async fn list(
        &self,
        category: Option<InstrumentCategory>,
        limit: usize,
    ) -> Result<Vec<PersistedVolume>> {
        let conn = self.conn.lock();
        let limit = limit.min(i64::MAX as usize) as i64;

        let rows = match category {
            Some(c) => {
                let sql = format!(
                    "SELECT {} FROM trades_data WHERE trade_type = ?1
                     ORDER BY timestamp DESC, symbol ASC LIMIT ?2",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![c.as_str(), limit], PersistedVolume::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM trades_data ORDER BY timestamp DESC, symbol ASC LIMIT ?1",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![limit], PersistedVolume::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(rows)
    }
}

fn add_missing_columns(conn: &Connection) -> Result<usize> {
    let existing: HashSet<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(trades_data)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;
        names
    };

    let mut added = 0;
    for (name, sql_type) in EXTRA_COLUMNS {
        if !existing.contains(*name) {
            conn.execute_batch(&format!(
                "ALTER TABLE trades_data ADD COLUMN {} {}",
                name, sql_type
            ))
            .with_context(|| format!("add column {}", name))?;
            added += 1;
        }
    }
    Ok(added)
}
