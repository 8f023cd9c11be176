//! The embedded bar store: schema, finality-ratchet upsert, and read APIs.
//!
//! Connection discipline: every public method opens its own connection, executes,
//! commits, and closes — connections are never held across calls or shared between
//! threads, matching the reference store's "one connection per call" rule. WAL
//! journal mode and a 30s busy timeout absorb concurrent writers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ashare_core::{AshareError, BootstrapStatus, DailyPriceRow, SymbolRow, SyncState};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS symbols (
    stock_code TEXT PRIMARY KEY,
    stock_name TEXT NOT NULL,
    market TEXT NOT NULL,
    source TEXT NOT NULL,
    synced_at TEXT
);

CREATE TABLE IF NOT EXISTS daily_prices (
    stock_code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    adjust TEXT NOT NULL,
    open REAL,
    close REAL,
    high REAL,
    low REAL,
    volume REAL,
    change_pct REAL,
    source TEXT,
    is_final INTEGER NOT NULL DEFAULT 0,
    fetched_at TEXT,
    PRIMARY KEY (stock_code, trade_date, adjust)
);

CREATE INDEX IF NOT EXISTS idx_daily_prices_trade_date ON daily_prices(trade_date);
CREATE INDEX IF NOT EXISTS idx_daily_prices_stock_trade_date ON daily_prices(stock_code, trade_date);
CREATE INDEX IF NOT EXISTS idx_daily_prices_final_trade_date ON daily_prices(is_final, trade_date);

CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_symbols_sync_at TEXT,
    last_incremental_sync_at TEXT,
    last_backfill_sync_at TEXT,
    last_finalized_trade_date TEXT,
    bootstrap_cursor_symbol TEXT,
    bootstrap_status TEXT NOT NULL DEFAULT 'idle',
    last_error TEXT,
    updated_at TEXT
);

INSERT OR IGNORE INTO sync_state (id, bootstrap_status) VALUES (1, 'idle');
";

/// One line of per-day bar coverage, for `get_trade_date_coverage`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDateCoverage {
    /// The trading day.
    pub trade_date: NaiveDate,
    /// Number of `daily_prices` rows recorded for that day.
    pub symbol_count: i64,
    /// Number of those rows asserted final.
    pub final_count: i64,
}

/// Partial update applied to the singleton `sync_state` row. Any field left `None`
/// is left untouched; `updated_at` is always refreshed to the current call time.
#[derive(Debug, Clone, Default)]
pub struct SyncStateUpdate {
    /// New value for `last_symbols_sync_at`.
    pub last_symbols_sync_at: Option<String>,
    /// New value for `last_incremental_sync_at`.
    pub last_incremental_sync_at: Option<String>,
    /// New value for `last_backfill_sync_at`.
    pub last_backfill_sync_at: Option<String>,
    /// New value for `last_finalized_trade_date`.
    pub last_finalized_trade_date: Option<String>,
    /// New value for `bootstrap_cursor_symbol`. `Some(None)` clears the cursor.
    pub bootstrap_cursor_symbol: Option<Option<String>>,
    /// New value for `bootstrap_status`.
    pub bootstrap_status: Option<BootstrapStatus>,
    /// New value for `last_error`. `Some(None)` clears the last error.
    pub last_error: Option<Option<String>>,
}

/// Summary counters returned by [`BarStore::get_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatus {
    /// Rows in `symbols`.
    pub symbol_count: i64,
    /// Rows in `daily_prices`.
    pub bar_count: i64,
    /// The sync-state cursor row.
    pub sync_state: SyncState,
}

fn bootstrap_status_to_str(status: BootstrapStatus) -> &'static str {
    match status {
        BootstrapStatus::Idle => "idle",
        BootstrapStatus::Running => "running",
        BootstrapStatus::Stopped => "stopped",
        BootstrapStatus::Done => "done",
        BootstrapStatus::DoneWithErrors => "done_with_errors",
    }
}

fn bootstrap_status_from_str(raw: &str) -> BootstrapStatus {
    match raw {
        "running" => BootstrapStatus::Running,
        "stopped" => BootstrapStatus::Stopped,
        "done" => BootstrapStatus::Done,
        "done_with_errors" => BootstrapStatus::DoneWithErrors,
        _ => BootstrapStatus::Idle,
    }
}

/// The embedded, single-file bar store.
pub struct BarStore {
    path: PathBuf,
}

impl BarStore {
    /// Open (creating if absent) the store at `path` and ensure its schema exists.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] if the parent directory cannot be created or
    /// the database cannot be opened/migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AshareError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AshareError::store(e))?;
            }
        }
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, AshareError> {
        let conn = Connection::open(&self.path).map_err(|e| AshareError::store(e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AshareError::store(e))?;
        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| AshareError::store(e))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<(), AshareError> {
        let conn = self.connect()?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| AshareError::store(e))?;
        Ok(())
    }

    /// Upsert the symbol dictionary. Existing rows are replaced wholesale — unlike
    /// `daily_prices`, symbols carry no finality concept.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn upsert_symbols(&self, rows: &[SymbolRow]) -> Result<usize, AshareError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let now = ashare_core::clock::format_beijing(ashare_core::clock::now_beijing());
        let tx = conn.transaction().map_err(|e| AshareError::store(e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO symbols (stock_code, stock_name, market, source, synced_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(stock_code) DO UPDATE SET
                       stock_name = excluded.stock_name,
                       market = excluded.market,
                       source = excluded.source,
                       synced_at = excluded.synced_at",
                )
                .map_err(|e| AshareError::store(e))?;
            for row in rows {
                stmt.execute(params![row.stock_code, row.stock_name, row.market, row.source, now])
                    .map_err(|e| AshareError::store(e))?;
            }
        }
        tx.commit().map_err(|e| AshareError::store(e))?;
        Ok(rows.len())
    }

    /// Upsert daily bars, applying the finality ratchet per row. The whole batch is
    /// one transaction; partial progress across separate calls is possible but never
    /// within a single call.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn upsert_daily_prices(&self, rows: &[DailyPriceRow], adjust: &str) -> Result<usize, AshareError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let now = ashare_core::clock::format_beijing(ashare_core::clock::now_beijing());
        let tx = conn.transaction().map_err(|e| AshareError::store(e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO daily_prices
                       (stock_code, trade_date, adjust, open, close, high, low, volume, change_pct, source, is_final, fetched_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(stock_code, trade_date, adjust) DO UPDATE SET
                       open = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.open ELSE excluded.open END,
                       close = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.close ELSE excluded.close END,
                       high = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.high ELSE excluded.high END,
                       low = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.low ELSE excluded.low END,
                       volume = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.volume ELSE excluded.volume END,
                       change_pct = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.change_pct ELSE excluded.change_pct END,
                       source = CASE WHEN daily_prices.is_final = 1 AND excluded.is_final = 0 THEN daily_prices.source ELSE excluded.source END,
                       is_final = MAX(daily_prices.is_final, excluded.is_final),
                       fetched_at = excluded.fetched_at",
                )
                .map_err(|e| AshareError::store(e))?;
            for row in rows {
                stmt.execute(params![
                    row.stock_code,
                    row.trade_date.format("%Y-%m-%d").to_string(),
                    adjust,
                    row.open,
                    row.close,
                    row.high,
                    row.low,
                    row.volume,
                    row.change_pct,
                    row.source,
                    i64::from(row.is_final),
                    now,
                ])
                .map_err(|e| AshareError::store(e))?;
            }
        }
        tx.commit().map_err(|e| AshareError::store(e))?;
        Ok(rows.len())
    }

    /// Read bars for one symbol in `[start, end]`, ascending by date.
    ///
    /// When `allow_today_unfinal` is `false`, non-final rows are excluded from the
    /// result regardless of date.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_price_range(
        &self,
        stock_code: &str,
        start: NaiveDate,
        end: NaiveDate,
        adjust: &str,
        allow_today_unfinal: bool,
    ) -> Result<Vec<DailyPriceRow>, AshareError> {
        let conn = self.connect()?;
        let sql = if allow_today_unfinal {
            "SELECT stock_code, trade_date, open, close, high, low, change_pct, volume, source, is_final
             FROM daily_prices
             WHERE stock_code = ?1 AND adjust = ?2 AND trade_date BETWEEN ?3 AND ?4
             ORDER BY trade_date ASC"
        } else {
            "SELECT stock_code, trade_date, open, close, high, low, change_pct, volume, source, is_final
             FROM daily_prices
             WHERE stock_code = ?1 AND adjust = ?2 AND trade_date BETWEEN ?3 AND ?4 AND is_final = 1
             ORDER BY trade_date ASC"
        };
        let mut stmt = conn.prepare(sql).map_err(|e| AshareError::store(e))?;
        let rows = stmt
            .query_map(
                params![
                    stock_code,
                    adjust,
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string()
                ],
                row_from_sql,
            )
            .map_err(|e| AshareError::store(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AshareError::store(e))?;
        Ok(rows)
    }

    /// Most recent trade date present in `daily_prices`, optionally restricted to final rows.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_latest_trade_date(&self, only_final: bool) -> Result<Option<NaiveDate>, AshareError> {
        let conn = self.connect()?;
        let sql = if only_final {
            "SELECT MAX(trade_date) FROM daily_prices WHERE is_final = 1"
        } else {
            "SELECT MAX(trade_date) FROM daily_prices"
        };
        let raw: Option<String> = conn
            .query_row(sql, [], |r| r.get(0))
            .map_err(|e| AshareError::store(e))?;
        Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    /// `true` iff at least one final bar exists for `date` across any symbol.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn has_final_for_date(&self, date: NaiveDate) -> Result<bool, AshareError> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM daily_prices WHERE trade_date = ?1 AND is_final = 1",
                params![date.format("%Y-%m-%d").to_string()],
                |r| r.get(0),
            )
            .map_err(|e| AshareError::store(e))?;
        Ok(count > 0)
    }

    /// `true` iff `(stock_code, date, adjust)` has a final bar.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn has_final_for_symbol_date(
        &self,
        stock_code: &str,
        date: NaiveDate,
        adjust: &str,
    ) -> Result<bool, AshareError> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM daily_prices
                 WHERE stock_code = ?1 AND trade_date = ?2 AND adjust = ?3 AND is_final = 1",
                params![stock_code, date.format("%Y-%m-%d").to_string(), adjust],
                |r| r.get(0),
            )
            .map_err(|e| AshareError::store(e))?;
        Ok(count > 0)
    }

    /// The bar recorded for one `(stock_code, date, adjust)`, if any.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_symbol_day_snapshot_info(
        &self,
        stock_code: &str,
        date: NaiveDate,
        adjust: &str,
    ) -> Result<Option<DailyPriceRow>, AshareError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT stock_code, trade_date, open, close, high, low, change_pct, volume, source, is_final
             FROM daily_prices WHERE stock_code = ?1 AND trade_date = ?2 AND adjust = ?3",
            params![stock_code, date.format("%Y-%m-%d").to_string(), adjust],
            row_from_sql,
        )
        .optional()
        .map_err(|e| AshareError::store(e))
    }

    /// Per-day row counts and final-row counts in `[start, end]`, ascending by date.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_trade_date_coverage(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TradeDateCoverage>, AshareError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT trade_date, COUNT(*), SUM(is_final)
                 FROM daily_prices
                 WHERE trade_date BETWEEN ?1 AND ?2
                 GROUP BY trade_date
                 ORDER BY trade_date ASC",
            )
            .map_err(|e| AshareError::store(e))?;
        let rows = stmt
            .query_map(
                params![start.format("%Y-%m-%d").to_string(), end.format("%Y-%m-%d").to_string()],
                |r| {
                    let raw_date: String = r.get(0)?;
                    Ok((raw_date, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
                },
            )
            .map_err(|e| AshareError::store(e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AshareError::store(e))?;
        Ok(rows
            .into_iter()
            .filter_map(|(raw_date, symbol_count, final_count)| {
                NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
                    .ok()
                    .map(|trade_date| TradeDateCoverage {
                        trade_date,
                        symbol_count,
                        final_count,
                    })
            })
            .collect())
    }

    /// All known symbol codes.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_symbol_codes(&self) -> Result<Vec<String>, AshareError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT stock_code FROM symbols ORDER BY stock_code ASC")
            .map_err(|e| AshareError::store(e))?;
        let rows = stmt
            .query_map([], |r| r.get(0))
            .map_err(|e| AshareError::store(e))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| AshareError::store(e))?;
        Ok(rows)
    }

    /// Read the singleton `sync_state` row.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_sync_state(&self) -> Result<SyncState, AshareError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT last_symbols_sync_at, last_incremental_sync_at, last_backfill_sync_at,
                    last_finalized_trade_date, bootstrap_cursor_symbol, bootstrap_status,
                    last_error, updated_at
             FROM sync_state WHERE id = 1",
            [],
            |r| {
                Ok(SyncState {
                    last_symbols_sync_at: r.get(0)?,
                    last_incremental_sync_at: r.get(1)?,
                    last_backfill_sync_at: r.get(2)?,
                    last_finalized_trade_date: r.get(3)?,
                    bootstrap_cursor_symbol: r.get(4)?,
                    bootstrap_status: bootstrap_status_from_str(&r.get::<_, String>(5)?),
                    last_error: r.get(6)?,
                    updated_at: r.get(7)?,
                })
            },
        )
        .map_err(|e| AshareError::store(e))
    }

    /// Apply a partial update to the singleton `sync_state` row.
    ///
    /// Per the propagation policy, store errors here are never raised: a failure to
    /// persist observability state should not block ingestion. Errors are logged as
    /// warnings and swallowed.
    pub fn update_sync_state(&self, update: &SyncStateUpdate) {
        if let Err(e) = self.try_update_sync_state(update) {
            tracing::warn!(error = %e, "failed to update sync_state");
        }
    }

    fn try_update_sync_state(&self, update: &SyncStateUpdate) -> Result<(), AshareError> {
        let conn = self.connect()?;
        let now = ashare_core::clock::format_beijing(ashare_core::clock::now_beijing());
        conn.execute(
            "UPDATE sync_state SET
               last_symbols_sync_at = COALESCE(?1, last_symbols_sync_at),
               last_incremental_sync_at = COALESCE(?2, last_incremental_sync_at),
               last_backfill_sync_at = COALESCE(?3, last_backfill_sync_at),
               last_finalized_trade_date = COALESCE(?4, last_finalized_trade_date),
               bootstrap_cursor_symbol = CASE WHEN ?5 THEN ?6 ELSE bootstrap_cursor_symbol END,
               bootstrap_status = COALESCE(?7, bootstrap_status),
               last_error = CASE WHEN ?8 THEN ?9 ELSE last_error END,
               updated_at = ?10
             WHERE id = 1",
            params![
                update.last_symbols_sync_at,
                update.last_incremental_sync_at,
                update.last_backfill_sync_at,
                update.last_finalized_trade_date,
                update.bootstrap_cursor_symbol.is_some(),
                update.bootstrap_cursor_symbol.clone().flatten(),
                update.bootstrap_status.map(bootstrap_status_to_str),
                update.last_error.is_some(),
                update.last_error.clone().flatten(),
                now,
            ],
        )
        .map_err(|e| AshareError::store(e))?;
        Ok(())
    }

    /// Clear the backfill resume cursor and reset its status to `idle`.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn reset_bootstrap_cursor(&self) -> Result<(), AshareError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE sync_state SET bootstrap_cursor_symbol = NULL, bootstrap_status = 'idle' WHERE id = 1",
            [],
        )
        .map_err(|e| AshareError::store(e))?;
        Ok(())
    }

    /// Summary counters: symbol/bar counts plus the sync-state cursor.
    ///
    /// # Errors
    /// Returns [`AshareError::Store`] on any SQLite failure.
    pub fn get_status(&self) -> Result<StoreStatus, AshareError> {
        let conn = self.connect()?;
        let symbol_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))
            .map_err(|e| AshareError::store(e))?;
        let bar_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM daily_prices", [], |r| r.get(0))
            .map_err(|e| AshareError::store(e))?;
        drop(conn);
        Ok(StoreStatus {
            symbol_count,
            bar_count,
            sync_state: self.get_sync_state()?,
        })
    }
}

fn row_from_sql(r: &rusqlite::Row<'_>) -> rusqlite::Result<DailyPriceRow> {
    let raw_date: String = r.get(1)?;
    let trade_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").unwrap_or_default();
    Ok(DailyPriceRow {
        stock_code: r.get(0)?,
        trade_date,
        open: r.get(2)?,
        close: r.get(3)?,
        high: r.get(4)?,
        low: r.get(5)?,
        change_pct: r.get(6)?,
        volume: r.get(7)?,
        source: r.get(8)?,
        is_final: r.get::<_, i64>(9)? != 0,
    })
}
