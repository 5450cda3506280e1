//! Async statement facade over the single shared SQLite connection.
//!
//! Every component issues SQL through the [`Gateway`]. Statements run on the
//! blocking pool (`spawn_blocking`) against one `Mutex`-guarded connection,
//! which serializes writes the same way SQLite itself would.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use silt_core::{DatabaseConfig, Result, SiltError};
use std::sync::{Arc, Mutex};

/// A materialized result row: column name / value pairs in select order.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn text(&self, column: &str) -> Result<String> {
        match self.get(column) {
            Some(SqlValue::Text(s)) => Ok(s.clone()),
            other => Err(SiltError::Sql(format!(
                "column '{column}' is not text: {other:?}"
            ))),
        }
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            Some(SqlValue::Text(s)) => Ok(Some(s.clone())),
            Some(SqlValue::Null) | None => Ok(None),
            other => Err(SiltError::Sql(format!(
                "column '{column}' is not text: {other:?}"
            ))),
        }
    }

    pub fn integer(&self, column: &str) -> Result<i64> {
        match self.get(column) {
            Some(SqlValue::Integer(n)) => Ok(*n),
            other => Err(SiltError::Sql(format!(
                "column '{column}' is not an integer: {other:?}"
            ))),
        }
    }
}

/// Convert a JSON value into a bindable SQLite value.
///
/// Booleans become 0/1 integers, arrays and nested objects are stored as
/// serialized JSON text. This is the projection used for index columns and
/// query arguments, so both sides of a comparison go through the same map.
pub(crate) fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    use serde_json::Value;

    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Thin async gateway over one SQLite connection.
#[derive(Clone)]
pub struct Gateway {
    conn: Arc<Mutex<Connection>>,
}

impl Gateway {
    /// Open (or create) the database file and apply connection pragmas.
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        let conn = if cfg.in_memory {
            Connection::open_in_memory().map_err(|e| SiltError::Sql(e.to_string()))?
        } else {
            let path = cfg.resolved_path();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
            .map_err(|e| SiltError::Sql(e.to_string()))?
        };

        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| SiltError::Sql(e.to_string()))?;
        if cfg.wal_mode && !cfg.in_memory {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| SiltError::Sql(e.to_string()))?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| SiltError::Sql(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| SiltError::Sql(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            f(&guard)
        })
        .await
        .map_err(|e| SiltError::Internal(format!("task join error: {e}")))?
    }

    /// Execute one DDL/DML statement; returns the affected row count.
    pub async fn run(&self, sql: &str, args: Vec<SqlValue>) -> Result<usize> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(args))
                .map_err(|e| SiltError::Sql(e.to_string()))
        })
        .await
    }

    /// Execute a query and materialize every row.
    pub async fn query(&self, sql: &str, args: Vec<SqlValue>) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| SiltError::Sql(e.to_string()))?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

            let rows = stmt
                .query_map(params_from_iter(args), |row| {
                    let mut columns = Vec::with_capacity(names.len());
                    for (i, name) in names.iter().enumerate() {
                        columns.push((name.clone(), row.get::<_, SqlValue>(i)?));
                    }
                    Ok(Row { columns })
                })
                .map_err(|e| SiltError::Sql(e.to_string()))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| SiltError::Sql(e.to_string()))
        })
        .await
    }

    /// Expect at most one row; [`SiltError::Cardinality`] if there are more.
    pub async fn get(&self, sql: &str, args: Vec<SqlValue>) -> Result<Option<Row>> {
        let mut rows = self.query(sql, args).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(SiltError::Cardinality(n)),
        }
    }

    /// First row of the result set, or none.
    pub async fn find_one(&self, sql: &str, args: Vec<SqlValue>) -> Result<Option<Row>> {
        let mut rows = self.query(sql, args).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    /// Execute an `INSERT ... RETURNING` (or similar) statement.
    ///
    /// Returns the first returned row; more than one is unexpected and only
    /// logged.
    pub async fn insert(&self, sql: &str, args: Vec<SqlValue>) -> Result<Option<Row>> {
        let rows = self.query(sql, args).await?;
        if rows.len() > 1 {
            tracing::warn!(
                rows = rows.len(),
                "insert statement returned more than one row"
            );
        }
        Ok(rows.into_iter().next())
    }

    /// Like [`run`](Self::run) but swallows SQLite's "duplicate column name"
    /// error. Used for idempotent `ALTER TABLE ... ADD COLUMN` during schema
    /// evolution; any other engine error still propagates.
    pub async fn try_run(&self, sql: &str) -> Result<bool> {
        let sql = sql.to_string();
        self.with_conn(move |conn| match conn.execute(&sql, []) {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("duplicate column name") => {
                tracing::info!(error = %e, "column already present, skipping");
                Ok(false)
            }
            Err(e) => Err(SiltError::Sql(e.to_string())),
        })
        .await
    }

    /// Run a closure inside one engine transaction.
    ///
    /// Commits when the closure returns `Ok`; the transaction is rolled back
    /// on error (dropping an uncommitted `rusqlite` transaction rolls back).
    pub async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap();
            let tx = guard
                .transaction()
                .map_err(|e| SiltError::Sql(e.to_string()))?;

            let out = f(&tx)?;

            tx.commit().map_err(|e| SiltError::Sql(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| SiltError::Internal(format!("task join error: {e}")))?
    }
}
