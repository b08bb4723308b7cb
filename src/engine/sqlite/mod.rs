//! `SQLite` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`path: /path/to/db.sqlite` or `uri: sqlite:///path`)
//! - In-memory connections (`:memory:`)
//! - Named parameters rewritten to numbered placeholders (`?1`, `?2`, ...)
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - BLOB data is Base64-encoded for JSON safety
//! - `busy_timeout_ms` option maps to `busy_timeout`
//! - Transactions are `BEGIN DEFERRED`, so a reader only takes locks once it reads

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::engine::{option_u64, warn_unknown_options, with_scheme, DatabaseEngine, ResultSet};
use crate::error::{FacadeError, Result};
use crate::sql::{bind_named, trim_string, Params, PlaceholderStyle};

const KNOWN_OPTIONS: [&str; 1] = ["busy_timeout_ms"];

/// `SQLite` database engine implementation
pub struct SqliteEngine {
    conn: Connection,
}

impl DatabaseEngine for SqliteEngine {
    async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let path = database_path(config)?;
        let path_str = path.to_str().ok_or_else(|| {
            FacadeError::invalid_input("SQLite file path contains invalid UTF-8 characters")
        })?;
        let conn = open_connection(path_str)?;

        let options = config.options();
        warn_unknown_options("sqlite", &options, &KNOWN_OPTIONS);
        if let Some(timeout_ms) = option_u64(&options, "busy_timeout_ms")? {
            conn.busy_timeout(Duration::from_millis(timeout_ms)).map_err(|e| {
                FacadeError::engine_error("sqlite", format!("Failed to set timeout: {e}"))
            })?;
        }

        Ok(Self { conn })
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        self.begin().await?;
        let bound = bind_named(sql, params, PlaceholderStyle::Numbered)?;
        tracing::debug!(engine = "sqlite", sql = %trim_string(&bound.sql, true), "executing");
        execute_query(&self.conn, &bound.sql, &bound.values)
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Ok(());
        }
        self.batch("BEGIN DEFERRED", "begin transaction")
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        tracing::debug!(engine = "sqlite", "commit");
        self.batch("COMMIT", "commit")
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        tracing::debug!(engine = "sqlite", "rollback");
        self.batch("ROLLBACK", "roll back")
    }

    async fn close(mut self) -> Result<()> {
        self.rollback().await?;
        self.conn.close().map_err(|(_, e)| {
            FacadeError::engine_error("sqlite", format!("Failed to close connection: {e}"))
        })
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl SqliteEngine {
    fn batch(&self, sql: &str, action: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(|e| {
            FacadeError::engine_error("sqlite", format!("Failed to {action}: {e}"))
        })
    }
}

/// Database file from `path`, or from a `sqlite://` connection string
fn database_path(config: &DatabaseConfig) -> Result<PathBuf> {
    if let Some(path) = config.path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.clone());
    }

    match config.uri.as_deref() {
        Some(uri) => {
            let normalized = with_scheme(uri, "sqlite");
            normalized
                .strip_prefix("sqlite://")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| {
                    FacadeError::invalid_input(
                        "SQLite connection strings must look like sqlite:///path/to/file.db",
                    )
                })
        }
        None => Err(FacadeError::invalid_input("SQLite requires 'path' parameter")),
    }
}

/// Open `SQLite` connection (read-write, created when missing)
fn open_connection(path: &str) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    Connection::open_with_flags(path, flags)
        .map_err(|e| FacadeError::connection_failed(format!("Failed to open SQLite database: {e}")))
}

/// Execute query and return `ResultSet`
fn execute_query(conn: &Connection, query: &str, values: &[Value]) -> Result<ResultSet> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| FacadeError::query_failed(format!("Failed to prepare query: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let bound = params_from_iter(values.iter().map(json_to_sqlite));

    if column_names.is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        let changed = stmt
            .execute(bound)
            .map_err(|e| FacadeError::query_failed(format!("Failed to execute query: {e}")))?;
        return Ok(ResultSet::affected(changed as u64));
    }

    let mut rows = stmt
        .query(bound)
        .map_err(|e| FacadeError::query_failed(format!("Failed to execute query: {e}")))?;

    let mut rows_data = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| FacadeError::query_failed(format!("Failed to fetch row: {e}")))?
    {
        let values = row_to_json(column_names.len(), row)
            .map_err(|e| FacadeError::query_failed(format!("Failed to fetch row: {e}")))?;
        rows_data.push(values);
    }

    Ok(ResultSet::new(column_names, rows_data))
}

/// Convert a JSON parameter to a `SQLite` value
fn json_to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        // Arrays and objects are stored as JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(column_count: usize, row: &Row) -> std::result::Result<Vec<Value>, rusqlite::Error> {
    (0..column_count).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &Row, idx: usize) -> std::result::Result<Value, rusqlite::Error> {
    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number), // Handle NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}
