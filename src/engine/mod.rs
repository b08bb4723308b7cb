//! Database Engine Traits and Core Types
//!
//! This module defines the core abstractions for database engines.
//! Each engine (`PostgreSQL`, `MySQL`, `SQLite`) implements the `DatabaseEngine` trait.
//!
//! # Connection Lifecycle
//! An engine value is one open connection. Transactions begin lazily before the first
//! statement and stay open until `commit`, `rollback` or `close`; closing with an open
//! transaction rolls it back.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent. The only shared pieces are the
//! named parameter rewriting in [`crate::sql::bind_named`] and [`ResultSet`].

use serde::Serialize;
use serde_json::Value;

use crate::config::{DatabaseConfig, Dialect};
use crate::error::{FacadeError, Result};
use crate::sql::Params;

#[cfg(not(any(feature = "sqlite", feature = "postgres", feature = "mysql")))]
compile_error!("enable at least one engine feature: sqlite, postgres or mysql");

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Rows produced by a statement, with a read cursor
///
/// Rows are materialized when the statement runs. The cursor only tracks how many have
/// been handed out through the `fetch_*` methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows, one value per column
    pub rows: Vec<Vec<Value>>,

    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    #[serde(skip)]
    cursor: usize,
}

impl ResultSet {
    /// Result of a statement that returns rows
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows, rows_affected: None, cursor: 0 }
    }

    /// Result of a statement that only modifies rows
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self { rows_affected: Some(rows_affected), ..Self::default() }
    }

    /// Whether the statement produced a row description
    #[must_use]
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Rows modified, or rows returned when the statement returns rows
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows_affected.unwrap_or(self.rows.len() as u64)
    }

    /// Rows not yet fetched
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len().saturating_sub(self.cursor)
    }

    fn row_object(&self, row: &[Value]) -> Value {
        Value::Object(self.columns.iter().cloned().zip(row.iter().cloned()).collect())
    }

    /// Next row as an object keyed by column name, `None` when exhausted
    pub fn fetch_one(&mut self) -> Option<Value> {
        let row = self.rows.get(self.cursor)?;
        let object = self.row_object(row);
        self.cursor += 1;
        Some(object)
    }

    /// Up to `n` next rows
    pub fn fetch_many(&mut self, n: usize) -> Vec<Value> {
        let end = self.cursor.saturating_add(n).min(self.rows.len());
        let start = self.cursor.min(end);
        let rows = self.rows[start..end].iter().map(|row| self.row_object(row)).collect();
        self.cursor = end;
        rows
    }

    /// Every remaining row
    pub fn fetch_all(&mut self) -> Vec<Value> {
        self.fetch_many(self.remaining())
    }
}

/// Database engine trait
///
/// All database engines implement this trait. An engine value owns one connection.
pub trait DatabaseEngine: Sized + Send {
    /// Open a connection described by a validated configuration
    ///
    /// Engine options are read from `connection_params.options`; unknown options are
    /// logged and ignored.
    fn connect(config: &DatabaseConfig) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// Execute one statement with named parameters (`:name`)
    ///
    /// Starts a transaction first when none is open.
    fn execute(
        &mut self,
        sql: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = Result<ResultSet>> + Send;

    /// Start a transaction (no-op when one is already open)
    fn begin(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Commit the open transaction (no-op when none is open)
    fn commit(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Roll back the open transaction (no-op when none is open)
    fn rollback(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Roll back any open transaction and close the connection
    fn close(self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Whether a transaction is open
    fn in_transaction(&self) -> bool;
}

/// An open connection to whichever engine the configured dialect needs
pub enum Connection {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteEngine),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresEngine),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlEngine),
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Connection").field(&self.engine_name()).finish()
    }
}

impl Connection {
    /// Connect using the engine matching the configuration's dialect
    ///
    /// # Errors
    /// `UnsupportedDialect` when the dialect has no native driver (`mssql`, `oracle`),
    /// when its engine feature is disabled, or when ODBC is requested.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.use_odbc {
            return Err(FacadeError::unsupported_dialect(format!(
                "ODBC connections are not supported ({})",
                config.dialect
            )));
        }

        tracing::debug!(
            dialect = %config.dialect,
            uri = %config.redacted_uri().unwrap_or_default(),
            "opening connection"
        );

        match config.dialect {
            #[cfg(feature = "sqlite")]
            Dialect::SQLite => Ok(Self::Sqlite(sqlite::SqliteEngine::connect(config).await?)),
            #[cfg(feature = "postgres")]
            Dialect::PostgreSQL => {
                Ok(Self::Postgres(postgres::PostgresEngine::connect(config).await?))
            }
            #[cfg(feature = "mysql")]
            Dialect::MySQL | Dialect::MariaDB => {
                Ok(Self::MySql(mysql::MySqlEngine::connect(config).await?))
            }
            other => Err(FacadeError::unsupported_dialect(format!(
                "No native driver is available for dialect '{other}'"
            ))),
        }
    }

    /// Engine name (for logs and errors)
    #[must_use]
    pub const fn engine_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgresql",
            #[cfg(feature = "mysql")]
            Self::MySql(_) => "mysql",
        }
    }

    pub async fn execute(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(engine) => engine.execute(sql, params).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.execute(sql, params).await,
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.execute(sql, params).await,
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(engine) => engine.commit().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.commit().await,
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.commit().await,
        }
    }

    pub async fn rollback(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(engine) => engine.rollback().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.rollback().await,
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.rollback().await,
        }
    }

    pub async fn close(self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(engine) => engine.close().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.close().await,
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.close().await,
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(engine) => engine.in_transaction(),
            #[cfg(feature = "postgres")]
            Self::Postgres(engine) => engine.in_transaction(),
            #[cfg(feature = "mysql")]
            Self::MySql(engine) => engine.in_transaction(),
        }
    }
}

/// Replace the scheme of a connection string (`mysql+pymysql://` -> `mysql://`)
pub(crate) fn with_scheme(uri: &str, scheme: &str) -> String {
    match uri.split_once("://") {
        Some((_, rest)) => format!("{scheme}://{rest}"),
        None => uri.to_string(),
    }
}

/// Engine option as an unsigned integer (numbers or numeric strings)
pub(crate) fn option_u64(options: &serde_json::Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            FacadeError::config_error(format!("Option '{key}' must be a non-negative integer"))
        }),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
            FacadeError::config_error(format!("Option '{key}' must be a non-negative integer"))
        }),
        Some(_) => Err(FacadeError::config_error(format!(
            "Option '{key}' must be a non-negative integer"
        ))),
    }
}

/// Log options an engine does not understand
pub(crate) fn warn_unknown_options(
    engine: &str,
    options: &serde_json::Map<String, Value>,
    known: &[&str],
) {
    for key in options.keys().filter(|key| !known.contains(&key.as_str())) {
        tracing::warn!(engine, option = %key, "ignoring unknown connection option");
    }
}
