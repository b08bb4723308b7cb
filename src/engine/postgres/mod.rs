//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP (connection string built from the configuration)
//! - Named parameters rewritten to `$n` placeholders and bound by the prepared
//!   statement's parameter types (NULLs are typed too)
//! - Rich type system support (arrays, JSON/JSONB, timestamps, numerics, etc.)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Arrays of common element types become JSON arrays
//! - JSON/JSONB preserved as nested JSON
//! - NUMERIC values become decimal strings (no precision loss)
//! - BYTEA data is Base64-encoded for JSON safety
//! - `application_name` and `connect_timeout` (seconds) options are applied

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use crate::config::DatabaseConfig;
use crate::engine::{option_u64, warn_unknown_options, with_scheme, DatabaseEngine, ResultSet};
use crate::error::{FacadeError, Result};
use crate::sql::{bind_named, trim_string, Params, PlaceholderStyle};

const KNOWN_OPTIONS: [&str; 2] = ["application_name", "connect_timeout"];

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// `PostgreSQL` database engine implementation
pub struct PostgresEngine {
    client: Client,
    connection: JoinHandle<()>,
    in_transaction: bool,
}

impl DatabaseEngine for PostgresEngine {
    async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pg_config = build_pg_config(config)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            FacadeError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Note: Connection errors are not logged to prevent credential leakage
        let connection = tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(Self { client, connection, in_transaction: false })
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        self.begin().await?;
        let bound = bind_named(sql, params, PlaceholderStyle::Dollar)?;
        tracing::debug!(engine = "postgresql", sql = %trim_string(&bound.sql, true), "executing");

        let stmt = self
            .client
            .prepare(&bound.sql)
            .await
            .map_err(|e| FacadeError::query_failed(format!("Failed to prepare query: {e}")))?;

        let boxed = stmt
            .params()
            .iter()
            .enumerate()
            .map(|(idx, ty)| {
                let value = bound.values.get(idx).unwrap_or(&serde_json::Value::Null);
                to_pg_param(value, ty, idx + 1)
            })
            .collect::<Result<Vec<BoxedParam>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            boxed.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

        if stmt.columns().is_empty() {
            // INSERT, UPDATE, DELETE, DDL
            let rows_affected = self
                .client
                .execute(&stmt, &refs)
                .await
                .map_err(|e| FacadeError::query_failed(format!("Failed to execute query: {e}")))?;
            return Ok(ResultSet::affected(rows_affected));
        }

        let rows = self
            .client
            .query(&stmt, &refs)
            .await
            .map_err(|e| FacadeError::query_failed(format!("Failed to execute query: {e}")))?;

        let column_names: Vec<String> =
            stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows_data = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;

        Ok(ResultSet::new(column_names, rows_data))
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        self.batch("BEGIN", "begin transaction").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        tracing::debug!(engine = "postgresql", "commit");
        self.in_transaction = false;
        self.batch("COMMIT", "commit").await
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        tracing::debug!(engine = "postgresql", "rollback");
        self.in_transaction = false;
        self.batch("ROLLBACK", "roll back").await
    }

    async fn close(mut self) -> Result<()> {
        let result = self.rollback().await;
        drop(self.client);
        let _ = self.connection.await;
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl PostgresEngine {
    async fn batch(&self, sql: &str, action: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(|e| {
            FacadeError::engine_error("postgresql", format!("Failed to {action}: {e}"))
        })
    }
}

/// Build `PostgreSQL` connection config from `DatabaseConfig`
fn build_pg_config(config: &DatabaseConfig) -> Result<Config> {
    let uri = with_scheme(&config.uri()?, "postgresql");
    let mut pg_config: Config = uri.parse().map_err(|e| {
        FacadeError::invalid_input(format!("Invalid PostgreSQL connection string: {e}"))
    })?;

    let options = config.options();
    warn_unknown_options("postgresql", &options, &KNOWN_OPTIONS);

    if let Some(name) = options.get("application_name").and_then(|v| v.as_str()) {
        pg_config.application_name(name);
    }
    if let Some(seconds) = option_u64(&options, "connect_timeout")? {
        pg_config.connect_timeout(Duration::from_secs(seconds));
    }

    Ok(pg_config)
}

/// Convert a JSON parameter to the type the prepared statement expects
///
/// `NULL` is bound as a typed `None` so the driver's type check still passes.
fn to_pg_param(value: &serde_json::Value, ty: &Type, position: usize) -> Result<BoxedParam> {
    let mismatch = || {
        FacadeError::invalid_input(format!(
            "Cannot bind parameter ${position} as PostgreSQL type '{}'",
            ty.name()
        ))
    };

    match *ty {
        Type::BOOL => bind(value, json_bool, mismatch),
        Type::INT2 => bind(value, |v| json_i64(v).and_then(|i| i16::try_from(i).ok()), mismatch),
        Type::INT4 => bind(value, |v| json_i64(v).and_then(|i| i32::try_from(i).ok()), mismatch),
        Type::INT8 => bind(value, json_i64, mismatch),
        Type::FLOAT4 => bind(value, |v| json_f64(v).map(|f| f as f32), mismatch),
        Type::FLOAT8 => bind(value, json_f64, mismatch),
        Type::JSON | Type::JSONB => bind(value, |v| Some(v.clone()), mismatch),
        Type::BYTEA => bind(
            value,
            |v| {
                use base64::Engine;
                v.as_str().and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
            },
            mismatch,
        ),
        Type::TIMESTAMP => bind(
            value,
            |v| {
                v.as_str().and_then(|s| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                        .ok()
                })
            },
            mismatch,
        ),
        Type::TIMESTAMPTZ => bind(
            value,
            |v| {
                v.as_str().and_then(|s| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                })
            },
            mismatch,
        ),
        Type::DATE => bind(
            value,
            |v| v.as_str().and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            mismatch,
        ),
        Type::TIME => bind(
            value,
            |v| v.as_str().and_then(|s| chrono::NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok()),
            mismatch,
        ),
        Type::UUID => bind(value, |v| v.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok()), mismatch),
        Type::NUMERIC => Err(FacadeError::invalid_input(format!(
            "Cannot bind parameter ${position} as NUMERIC; cast the placeholder (e.g. :value::float8)"
        ))),
        // Text-like and everything else: send as text and let the server check it
        _ => bind(
            value,
            |v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            },
            mismatch,
        ),
    }
}

/// Box a converted parameter; `NULL` becomes a `None` of the target type
fn bind<T, F, E>(value: &serde_json::Value, convert: F, mismatch: E) -> Result<BoxedParam>
where
    T: ToSql + Sync + Send + 'static,
    F: FnOnce(&serde_json::Value) -> Option<T>,
    E: FnOnce() -> FacadeError,
{
    if value.is_null() {
        return Ok(Box::new(None::<T>));
    }
    convert(value).map(|v| Box::new(Some(v)) as BoxedParam).ok_or_else(mismatch)
}

fn json_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// NUMERIC read as an exact decimal string
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        decode_numeric(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode the binary NUMERIC format (base-10000 digit groups) into decimal text
fn decode_numeric(
    raw: &[u8],
) -> std::result::Result<String, Box<dyn std::error::Error + Sync + Send>> {
    let read = |offset: usize| -> std::result::Result<u16, Box<dyn std::error::Error + Sync + Send>> {
        raw.get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "numeric value is truncated".into())
    };

    let ndigits = usize::from(read(0)?);
    let weight = i32::from(read(2)? as i16);
    let sign = read(4)?;
    let dscale = usize::from(read(6)?);

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits).map(|i| read(8 + i * 2)).collect::<std::result::Result<Vec<_>, _>>()?;
    let digit = |i: i32| -> u16 {
        usize::try_from(i).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

/// Convert a `PostgreSQL` row to a JSON-safe `Vec`
fn row_to_json(row: &Row) -> Result<Vec<serde_json::Value>> {
    (0..row.columns().len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

/// Read a nullable column value
fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        FacadeError::query_failed(format!(
            "Failed to convert PostgreSQL type '{}' to JSON: {e}",
            row.columns()[idx].type_().name()
        ))
    })
}

fn number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number) // Handle NaN/Infinity as null
}

fn array<T, F>(values: Option<Vec<Option<T>>>, convert: F) -> Option<serde_json::Value>
where
    F: Fn(T) -> serde_json::Value,
{
    values.map(|items| {
        serde_json::Value::Array(
            items.into_iter().map(|item| item.map_or(serde_json::Value::Null, &convert)).collect(),
        )
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_();

    let value: Option<Value> = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),

        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Number(v.into())),

        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| number(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(number),

        Type::NUMERIC => get::<PgNumeric>(row, idx)?.map(|v| Value::String(v.0)),

        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,

        // BYTEA (binary data) - encode as Base64
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        // Timestamps - convert to ISO 8601 strings
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => {
            get::<chrono::NaiveDate>(row, idx)?.map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
        }
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),

        Type::BOOL_ARRAY => array(get::<Vec<Option<bool>>>(row, idx)?, Value::Bool),
        Type::INT2_ARRAY => array(get::<Vec<Option<i16>>>(row, idx)?, |v| Value::Number(v.into())),
        Type::INT4_ARRAY => array(get::<Vec<Option<i32>>>(row, idx)?, |v| Value::Number(v.into())),
        Type::INT8_ARRAY => array(get::<Vec<Option<i64>>>(row, idx)?, |v| Value::Number(v.into())),
        Type::FLOAT8_ARRAY => array(get::<Vec<Option<f64>>>(row, idx)?, number),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(get::<Vec<Option<String>>>(row, idx)?, Value::String)
        }
        Type::UUID_ARRAY => {
            array(get::<Vec<Option<uuid::Uuid>>>(row, idx)?, |v| Value::String(v.to_string()))
        }

        // Text types and anything else the server can send as text
        _ => get::<String>(row, idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}
