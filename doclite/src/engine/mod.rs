//! Owns the SQLite connection. Every statement the crate issues goes
//! through here so that it is logged, bound by name and classified the
//! same way.

pub mod values;

use crate::config::StoreConfig;
use crate::error::{classify_sqlite, Result};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use std::cell::Cell;
use std::time::Duration;

pub use values::{json_to_sql, sql_to_json};
use values::as_named;

/// SQL function registered on every connection that lowercases text with
/// full Unicode case folding. SQLite's built-in `lower()` folds ASCII only.
pub const FOLD_FN: &str = "unicode_lower";

/// Connection plus the per-connection transaction bookkeeping.
pub(crate) struct EngineState {
    conn: Connection,
    savepoint_seq: Cell<u64>,
}

impl EngineState {
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn next_savepoint(&self) -> String {
        let n = self.savepoint_seq.get() + 1;
        self.savepoint_seq.set(n);
        format!("doclite_sp_{n}")
    }
}

/// A single SQLite connection shared by a store. The lock is reentrant so a
/// transaction scope can hold it while the operations inside re-enter.
pub struct Engine {
    state: ReentrantMutex<EngineState>,
    location: String,
}

impl Engine {
    /// Open the database described by `config` and apply connection pragmas.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| classify_sqlite(e, None))?;

        let location = config
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string());

        apply_pragmas(&conn, config).map_err(|e| classify_sqlite(e, None))?;
        log::debug!("opened database {location}");

        Ok(Engine {
            state: ReentrantMutex::new(EngineState {
                conn,
                savepoint_seq: Cell::new(0),
            }),
            location,
        })
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Engine::open(&StoreConfig::in_memory())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, EngineState> {
        self.state.lock()
    }

    /// True while a transaction scope is open on this connection.
    pub fn in_transaction(&self) -> bool {
        !self.lock().conn.is_autocommit()
    }

    // ── Statements ───────────────────────────────────────────────────

    /// Execute a statement, leaving the raw rusqlite error to the caller.
    /// Writes use this so constraint failures can be mapped to fields.
    pub(crate) fn try_execute(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
    ) -> rusqlite::Result<usize> {
        log::debug!("{sql} [{} params]", params.len());
        let state = self.lock();
        let mut stmt = state.conn.prepare_cached(sql)?;
        stmt.execute(&as_named(params)[..])
    }

    pub fn execute(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<usize> {
        self.try_execute(sql, params)
            .map_err(|e| classify_sqlite(e, Some(sql)))
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        log::debug!("{sql}");
        self.lock()
            .conn
            .execute_batch(sql)
            .map_err(|e| classify_sqlite(e, Some(sql)))
    }

    /// Run a query and map every row.
    pub fn query_map<R, F>(&self, sql: &str, params: &[(String, SqlValue)], f: F) -> Result<Vec<R>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<R>,
    {
        log::debug!("{sql} [{} params]", params.len());
        let state = self.lock();
        let run = || -> rusqlite::Result<Vec<R>> {
            let mut stmt = state.conn.prepare_cached(sql)?;
            let rows = stmt.query_map(&as_named(params)[..], f)?;
            rows.collect()
        };
        run().map_err(|e| classify_sqlite(e, Some(sql)))
    }

    /// First column of every row, converted to JSON.
    pub fn query_values(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
    ) -> Result<Vec<serde_json::Value>> {
        self.query_map(sql, params, |row| row.get::<_, SqlValue>(0).map(sql_to_json))
    }

    /// A single integer result, e.g. `SELECT COUNT(*)`.
    pub fn query_count(&self, sql: &str, params: &[(String, SqlValue)]) -> Result<u64> {
        let counts = self.query_map(sql, params, |row| row.get::<_, i64>(0))?;
        Ok(counts.first().copied().unwrap_or(0).max(0) as u64)
    }

    // ── Catalog ──────────────────────────────────────────────────────

    /// Column names of `table`, including generated columns. Empty when the
    /// table does not exist.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        self.query_map(
            "SELECT name FROM pragma_table_xinfo(:p1)",
            &[(":p1".to_string(), SqlValue::Text(table.to_string()))],
            |row| row.get::<_, String>(0),
        )
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.query_map(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
            |row| row.get::<_, String>(0),
        )
    }
}

fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if !config.is_in_memory() {
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.as_str(),
            |row| row.get(0),
        )?;
        if !mode.eq_ignore_ascii_case(config.journal_mode.as_str()) {
            log::warn!(
                "requested journal_mode {} but SQLite is using {mode}",
                config.journal_mode.as_str()
            );
        }
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "case_sensitive_like", "ON")?;
    register_functions(conn)
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get::<SqlValue>(0)? {
                SqlValue::Text(s) => SqlValue::Text(s.to_lowercase()),
                other => other,
            })
        },
    )
}
