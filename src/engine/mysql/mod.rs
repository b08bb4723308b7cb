//! `MySQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `MySQL` and `MariaDB`.
//!
//! # Features
//! - Client-server connections via TCP (connection string built from the configuration)
//! - Named parameters rewritten to `?` placeholders (repeated names repeat their value)
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - Statements run through the binary protocol (prepared statements)
//! - Binary data that is not valid UTF-8 is Base64-encoded for JSON safety
//! - `wait_timeout` (seconds) option is applied to the session

use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row, Value};

use crate::config::DatabaseConfig;
use crate::engine::{option_u64, warn_unknown_options, with_scheme, DatabaseEngine, ResultSet};
use crate::error::{FacadeError, Result};
use crate::sql::{bind_named, trim_string, Params, PlaceholderStyle};

const KNOWN_OPTIONS: [&str; 1] = ["wait_timeout"];

/// `MySQL` database engine implementation
pub struct MySqlEngine {
    conn: Conn,
    in_transaction: bool,
}

impl DatabaseEngine for MySqlEngine {
    async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let opts = build_mysql_opts(config)?;

        let conn = Conn::new(opts).await.map_err(|e| {
            FacadeError::connection_failed(format!("Failed to connect to MySQL: {e}"))
        })?;

        Ok(Self { conn, in_transaction: false })
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        self.begin().await?;
        let bound = bind_named(sql, params, PlaceholderStyle::Question)?;
        tracing::debug!(engine = "mysql", sql = %trim_string(&bound.sql, true), "executing");

        let values: Vec<Value> = bound.values.iter().map(json_to_mysql).collect();
        let params = if values.is_empty() {
            mysql_async::Params::Empty
        } else {
            mysql_async::Params::Positional(values)
        };

        let mut result = self
            .conn
            .exec_iter(bound.sql.as_str(), params)
            .await
            .map_err(|e| FacadeError::query_failed(format!("Failed to execute query: {e}")))?;

        let column_names: Vec<String> = result
            .columns()
            .map(|columns| columns.iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();

        let rows: Vec<Row> = result
            .collect()
            .await
            .map_err(|e| FacadeError::query_failed(format!("Failed to fetch rows: {e}")))?;
        let rows_affected = result.affected_rows();
        drop(result);

        if column_names.is_empty() {
            // INSERT, UPDATE, DELETE, DDL
            return Ok(ResultSet::affected(rows_affected));
        }

        let rows_data = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
        Ok(ResultSet::new(column_names, rows_data))
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        self.query_drop("START TRANSACTION", "begin transaction").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        tracing::debug!(engine = "mysql", "commit");
        self.in_transaction = false;
        self.query_drop("COMMIT", "commit").await
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        tracing::debug!(engine = "mysql", "rollback");
        self.in_transaction = false;
        self.query_drop("ROLLBACK", "roll back").await
    }

    async fn close(mut self) -> Result<()> {
        let result = self.rollback().await;
        self.conn.disconnect().await.map_err(|e| {
            FacadeError::engine_error("mysql", format!("Failed to disconnect: {e}"))
        })?;
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl MySqlEngine {
    async fn query_drop(&mut self, sql: &str, action: &str) -> Result<()> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| FacadeError::engine_error("mysql", format!("Failed to {action}: {e}")))
    }
}

/// Build `MySQL` connection options from `DatabaseConfig`
fn build_mysql_opts(config: &DatabaseConfig) -> Result<OptsBuilder> {
    let uri = with_scheme(&config.uri()?, "mysql");
    let opts = Opts::from_url(&uri).map_err(|e| {
        FacadeError::invalid_input(format!("Invalid MySQL connection string: {e}"))
    })?;

    let options = config.options();
    warn_unknown_options("mysql", &options, &KNOWN_OPTIONS);

    let mut builder = OptsBuilder::from_opts(opts);
    if let Some(seconds) = option_u64(&options, "wait_timeout")? {
        let seconds = usize::try_from(seconds)
            .map_err(|_| FacadeError::config_error("Option 'wait_timeout' is too large"))?;
        builder = builder.wait_timeout(Some(seconds));
    }

    Ok(builder)
}

/// Convert a JSON parameter to a `MySQL` value
fn json_to_mysql(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::NULL,
        serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                n.as_f64().map_or(Value::NULL, Value::Double)
            }
        }
        serde_json::Value::String(s) => Value::Bytes(s.as_bytes().to_vec()),
        // Arrays and objects are sent as JSON text
        other => Value::Bytes(other.to_string().into_bytes()),
    }
}

/// Convert a `MySQL` row to a JSON-safe `Vec`
fn row_to_json(row: &Row) -> Result<Vec<serde_json::Value>> {
    (0..row.columns_ref().len()).map(|idx| mysql_value_to_json(row, idx)).collect()
}

/// Convert `MySQL` value to JSON value
fn mysql_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| FacadeError::query_failed(format!("Failed to get value at index {idx}")))?;

    Ok(value_to_json(value))
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => {
                // Binary data - encode as Base64
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },

        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::UInt(u) => serde_json::Value::Number((*u).into()),

        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),

        // DATE columns arrive with a zero time part
        Value::Date(year, month, day, 0, 0, 0, 0) => {
            serde_json::Value::String(format!("{year:04}-{month:02}-{day:02}"))
        }
        Value::Date(year, month, day, hour, minute, second, 0) => serde_json::Value::String(
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"),
        ),
        Value::Date(year, month, day, hour, minute, second, micro) => {
            serde_json::Value::String(format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
            ))
        }

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            let mut time = format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if *microseconds > 0 {
                time.push_str(&format!(".{microseconds:06}"));
            }
            serde_json::Value::String(time)
        }
    }
}
