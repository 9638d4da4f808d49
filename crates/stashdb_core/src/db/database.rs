//! Live database instance: execution primitives, transaction stack,
//! result cache and query log.
//!
//! # Responsibility
//! - Own the single SQLite connection behind one logical database name.
//! - Give callers nested-transaction ergonomics over one real
//!   transaction plus named savepoints.
//! - Memoize expensive read results with per-entry TTL.
//!
//! # Invariants
//! - The transaction nesting level never goes negative; commit and
//!   rollback at level 0 are safe no-ops.
//! - Savepoint names derive from the nesting level, so a name is unique
//!   on the stack at any instant.
//! - The query log records successful executions only.

use crate::db::registry::JournalMode;
use crate::db::{DbError, DbResult};
use crate::value::{display_value, escape_column, normalize, SqlRow};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// One successful execution, kept for diagnostics when logging is on.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    pub sql: String,
    pub params: Vec<String>,
    pub elapsed_secs: f64,
}

struct CacheEntry {
    value: Box<dyn Any + Send>,
    expires_at: Instant,
}

struct DbInner {
    conn: Connection,
    txn_level: u32,
    logging_enabled: bool,
    query_log: Vec<QueryLogEntry>,
}

/// The live instance behind one logical database name.
///
/// Obtained through [`crate::db::registry::get_instance`]; every caller
/// on the same name shares the same instance. Per-operation locking
/// makes the instance safe to share across threads, but no ordering is
/// guaranteed between threads without external coordination.
pub struct Database {
    name: String,
    path: Option<PathBuf>,
    inner: Mutex<DbInner>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub(crate) fn open_file(
        name: &str,
        path: PathBuf,
        journal: JournalMode,
        busy_timeout: Duration,
    ) -> DbResult<Self> {
        let conn = Connection::open(&path).map_err(|err| DbError::Connection {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        Self::apply_pragmas(&conn, Some(journal), busy_timeout)?;
        Ok(Self::from_connection(name, Some(path), conn))
    }

    /// Opens a registry-independent in-memory instance and applies all
    /// migrations registered for `name`.
    ///
    /// # Contract
    /// - Returned instances are fully migrated before first use.
    /// - The instance is not registered; dropping it discards all data.
    pub fn open_in_memory(name: &str) -> DbResult<Self> {
        let conn = Connection::open_in_memory().map_err(|err| DbError::Connection {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        Self::apply_pragmas(&conn, None, Duration::from_secs(5))?;
        let db = Self::from_connection(name, None, conn);
        crate::db::migrations::apply(&db)?;
        Ok(db)
    }

    fn from_connection(name: &str, path: Option<PathBuf>, conn: Connection) -> Self {
        Self {
            name: name.to_string(),
            path,
            inner: Mutex::new(DbInner {
                conn,
                txn_level: 0,
                logging_enabled: false,
                query_log: Vec::new(),
            }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn apply_pragmas(
        conn: &Connection,
        journal: Option<JournalMode>,
        busy_timeout: Duration,
    ) -> DbResult<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if let Some(mode) = journal {
            // journal_mode returns the resulting mode as a row.
            conn.query_row(
                &format!("PRAGMA journal_mode = {};", mode.as_sql()),
                [],
                |_| Ok(()),
            )?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(())
    }

    /// Logical name this instance was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved file path, or `None` for in-memory instances.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock_inner(&self) -> MutexGuard<'_, DbInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_logged<R>(
        inner: &mut DbInner,
        sql: &str,
        params: &[Value],
        op: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> DbResult<R> {
        let started = Instant::now();
        let out = op(&inner.conn)?;
        if inner.logging_enabled {
            inner.query_log.push(QueryLogEntry {
                sql: sql.to_string(),
                params: params.iter().map(display_value).collect(),
                elapsed_secs: started.elapsed().as_secs_f64(),
            });
        }
        Ok(out)
    }

    // ---- execution primitives -------------------------------------------

    /// Executes a statement, returning the affected row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, params, |conn| {
            conn.execute(sql, params_from_iter(params.iter()))
        })
    }

    pub(crate) fn execute_returning_rowid(
        &self,
        sql: &str,
        params: &[Value],
    ) -> DbResult<(usize, i64)> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, params, |conn| {
            let changed = conn.execute(sql, params_from_iter(params.iter()))?;
            Ok((changed, conn.last_insert_rowid()))
        })
    }

    /// Fetches the first matching row, if any.
    pub fn fetch(&self, sql: &str, params: &[Value]) -> DbResult<Option<SqlRow>> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, params, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            match rows.next()? {
                Some(row) => Ok(Some(read_row(row, &columns)?)),
                None => Ok(None),
            }
        })
    }

    /// Fetches all matching rows.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> DbResult<Vec<SqlRow>> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, params, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_row(row, &columns)?);
            }
            Ok(out)
        })
    }

    /// Fetches the first column of the first row, or `None` on no rows.
    pub fn fetch_scalar(&self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, params, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get::<_, Value>(0)?)),
                None => Ok(None),
            }
        })
    }

    /// Executes a multi-statement batch with no parameters.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, sql, &[], |conn| conn.execute_batch(sql))
    }

    // ---- trivial-SQL convenience wrappers -------------------------------

    /// Inserts one row, returning the affected row count.
    pub fn insert(&self, table: &str, data: &[(&str, Value)]) -> DbResult<usize> {
        let columns = data
            .iter()
            .map(|(col, _)| escape_column(col))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; data.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            escape_column(table)
        );
        let params: Vec<Value> = data.iter().map(|(_, v)| normalize(v.clone())).collect();
        self.execute(&sql, &params)
    }

    /// Updates rows matching a raw `where_sql` fragment.
    pub fn update(
        &self,
        table: &str,
        data: &[(&str, Value)],
        where_sql: &str,
        where_params: &[Value],
    ) -> DbResult<usize> {
        let assignments = data
            .iter()
            .map(|(col, _)| format!("{} = ?", escape_column(col)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {where_sql}",
            escape_column(table)
        );
        let mut params: Vec<Value> = data.iter().map(|(_, v)| normalize(v.clone())).collect();
        params.extend(where_params.iter().cloned());
        self.execute(&sql, &params)
    }

    /// Deletes rows matching a raw `where_sql` fragment.
    pub fn delete(&self, table: &str, where_sql: &str, params: &[Value]) -> DbResult<usize> {
        let sql = format!("DELETE FROM {} WHERE {where_sql}", escape_column(table));
        self.execute(&sql, params)
    }

    /// Counts rows, optionally under a raw `where_sql` fragment.
    pub fn count(
        &self,
        table: &str,
        where_sql: Option<&str>,
        params: &[Value],
    ) -> DbResult<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", escape_column(table));
        if let Some(clause) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        match self.fetch_scalar(&sql, params)? {
            Some(Value::Integer(n)) => Ok(u64::try_from(n).unwrap_or(0)),
            _ => Ok(0),
        }
    }

    /// Returns whether any row matches.
    pub fn exists(
        &self,
        table: &str,
        where_sql: Option<&str>,
        params: &[Value],
    ) -> DbResult<bool> {
        Ok(self.count(table, where_sql, params)? > 0)
    }

    /// Starts a table-scoped query builder bound to this instance.
    pub fn query(&self, table: &str) -> crate::query::Query<'_> {
        crate::query::Query::new(self, table)
    }

    // ---- transaction/savepoint stack ------------------------------------

    /// Opens a real transaction at level 0, a savepoint at any deeper
    /// level. Level increases by one either way.
    pub fn begin_transaction(&self) -> DbResult<()> {
        let mut inner = self.lock_inner();
        let sql = if inner.txn_level == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT {}", savepoint_name(inner.txn_level))
        };
        Self::run_logged(&mut inner, &sql, &[], |conn| conn.execute_batch(&sql))?;
        inner.txn_level += 1;
        Ok(())
    }

    /// Commits the top frame: the real transaction at level 1, the
    /// newest savepoint above that. No-op at level 0.
    pub fn commit(&self) -> DbResult<()> {
        let mut inner = self.lock_inner();
        let sql = match inner.txn_level {
            0 => return Ok(()),
            1 => "COMMIT".to_string(),
            level => format!("RELEASE SAVEPOINT {}", savepoint_name(level - 1)),
        };
        Self::run_logged(&mut inner, &sql, &[], |conn| conn.execute_batch(&sql))?;
        inner.txn_level -= 1;
        Ok(())
    }

    /// Rolls back the top frame. For savepoints the frame is also
    /// released so the stack actually pops. No-op at level 0.
    pub fn rollback(&self) -> DbResult<()> {
        let mut inner = self.lock_inner();
        let sql = match inner.txn_level {
            0 => return Ok(()),
            1 => "ROLLBACK".to_string(),
            level => {
                let sp = savepoint_name(level - 1);
                format!("ROLLBACK TO SAVEPOINT {sp}; RELEASE SAVEPOINT {sp};")
            }
        };
        Self::run_logged(&mut inner, &sql, &[], |conn| conn.execute_batch(&sql))?;
        inner.txn_level -= 1;
        Ok(())
    }

    /// Rolls back every open frame, stopping early if one attempt fails.
    pub fn rollback_all(&self) -> DbResult<()> {
        while self.transaction_level() > 0 {
            self.rollback()?;
        }
        Ok(())
    }

    /// Current nesting level; 0 means no transaction is open.
    pub fn transaction_level(&self) -> u32 {
        self.lock_inner().txn_level
    }

    // ---- result cache ---------------------------------------------------

    /// Returns the cached value under `key` while unexpired, otherwise
    /// runs `factory`, stores its result for `ttl` (default 5 minutes)
    /// and returns it. Expiry is lazy; nothing evicts on a timer.
    pub fn cached<T, F>(&self, key: &str, ttl: Option<Duration>, factory: F) -> DbResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Self) -> DbResult<T>,
    {
        {
            let cache = self.lock_cache();
            if let Some(entry) = cache.get(key) {
                if Instant::now() < entry.expires_at {
                    return entry
                        .value
                        .downcast_ref::<T>()
                        .cloned()
                        .ok_or_else(|| DbError::CacheType {
                            key: key.to_string(),
                        });
                }
            }
        }

        // Factory runs without holding the cache lock; it typically
        // issues queries against this same instance.
        let value = factory(self)?;
        self.lock_cache().insert(
            key.to_string(),
            CacheEntry {
                value: Box::new(value.clone()),
                expires_at: Instant::now() + ttl.unwrap_or(DEFAULT_CACHE_TTL),
            },
        );
        Ok(value)
    }

    /// Removes one cache entry, or every entry when `key` is `None`.
    pub fn clear_cache(&self, key: Option<&str>) {
        let mut cache = self.lock_cache();
        match key {
            Some(key) => {
                cache.remove(key);
            }
            None => cache.clear(),
        }
    }

    // ---- query log ------------------------------------------------------

    /// Enables or disables diagnostic query logging (off by default).
    pub fn set_query_logging(&self, enabled: bool) {
        self.lock_inner().logging_enabled = enabled;
    }

    /// Snapshot of the recorded query log.
    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        self.lock_inner().query_log.clone()
    }

    pub fn clear_query_log(&self) {
        self.lock_inner().query_log.clear();
    }

    // ---- schema version -------------------------------------------------

    /// Reads the persisted schema generation (`PRAGMA user_version`).
    pub fn schema_version(&self) -> DbResult<u32> {
        let mut inner = self.lock_inner();
        Self::run_logged(&mut inner, "PRAGMA user_version", &[], |conn| {
            conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))
        })
    }

    pub(crate) fn set_schema_version(&self, version: u32) -> DbResult<()> {
        self.execute_batch(&format!("PRAGMA user_version = {version};"))
    }
}

fn savepoint_name(level: u32) -> String {
    format!("sp_{level}")
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<SqlRow> {
    let mut out = SqlRow::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        out.insert(name.clone(), row.get::<_, Value>(index)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::savepoint_name;

    #[test]
    fn savepoint_names_follow_level() {
        assert_eq!(savepoint_name(1), "sp_1");
        assert_eq!(savepoint_name(7), "sp_7");
    }
}
