//! Result Handlers and Parameter Sanitizers
//!
//! Result handlers post-process the data returned by [`crate::Database::execute`]. They are
//! plain functions over `serde_json::Value`, applied in registration order.
//!
//! Sanitizers run over every parameter value before a query executes.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::fmt::Write;
use std::sync::Arc;

use crate::error::{FacadeError, Result};
use crate::sql::Sanitizer;

/// A function applied to processed result data
pub type ResultHandler = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Unwrap a one-element list into its row (`as_object`), or wrap a single row in a list
#[must_use]
pub fn single_row(as_object: bool) -> ResultHandler {
    Arc::new(move |data| match data {
        Value::Array(mut rows) if as_object && rows.len() == 1 => rows.remove(0),
        Value::Object(row) if !as_object => Value::Array(vec![Value::Object(row)]),
        other => other,
    })
}

/// Reformat date and time strings with a `strftime` pattern
///
/// Recognizes RFC 3339 timestamps, `YYYY-MM-DD[T ]HH:MM:SS[.f]` and `YYYY-MM-DD`.
/// Strings that are not dates, or that cannot be rendered with the pattern (e.g. a
/// timezone pattern on a timestamp without offset), are left unchanged.
///
/// # Errors
/// Returns `InvalidInput` when the pattern is not a valid `strftime` pattern.
pub fn time_format(pattern: &str) -> Result<ResultHandler> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(FacadeError::invalid_input(format!("Invalid time format '{pattern}'")));
    }

    let pattern = pattern.to_string();
    Ok(Arc::new(move |data| map_strings(data, &|s| reformat_time(s, &pattern))))
}

fn reformat_time(text: &str, pattern: &str) -> Option<String> {
    let mut out = String::new();

    let written = if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        write!(out, "{}", dt.format(pattern))
    } else if let Some(dt) = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
    {
        write!(out, "{}", dt.format(pattern))
    } else if let Some(dt) =
        NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        write!(out, "{}", dt.format(pattern))
    } else {
        return None;
    };

    written.ok().map(|()| out)
}

/// Apply `f` to every string value, recursively; `None` keeps the original string
fn map_strings(data: Value, f: &dyn Fn(&str) -> Option<String>) -> Value {
    match data {
        Value::String(s) => Value::String(f(&s).unwrap_or(s)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, map_strings(v, f))).collect())
        }
        other => other,
    }
}

/// Remove all whitespace from keys and string values, optionally lowercasing them
#[must_use]
pub fn strip_whitespace(lowercase: bool) -> ResultHandler {
    Arc::new(move |data| clean(data, lowercase))
}

fn clean_text(text: &str, lowercase: bool) -> String {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if lowercase {
        text.to_lowercase()
    } else {
        text
    }
}

fn clean(data: Value, lowercase: bool) -> Value {
    match data {
        Value::String(s) => Value::String(clean_text(&s, lowercase)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| clean(v, lowercase)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter().map(|(k, v)| (clean_text(&k, lowercase), clean(v, lowercase))).collect(),
        ),
        other => other,
    }
}

/// Lowercase every object key, recursively
#[must_use]
pub fn lowercase_keys() -> ResultHandler {
    Arc::new(|data| lowercase(data, false))
}

/// Lowercase every object key and string value, recursively
#[must_use]
pub fn lowercase_nested() -> ResultHandler {
    Arc::new(|data| lowercase(data, true))
}

fn lowercase(data: Value, values: bool) -> Value {
    match data {
        Value::String(s) if values => Value::String(s.to_lowercase()),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| lowercase(v, values)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter().map(|(k, v)| (k.to_lowercase(), lowercase(v, values))).collect(),
        ),
        other => other,
    }
}

/// Drop object entries whose value is `null`, recursively (list items are kept)
#[must_use]
pub fn remove_nulls() -> ResultHandler {
    Arc::new(drop_nulls)
}

fn drop_nulls(data: Value) -> Value {
    match data {
        Value::Array(items) => Value::Array(items.into_iter().map(drop_nulls).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k, drop_nulls(v))).collect(),
        ),
        other => other,
    }
}

/// Drop empty values (`null`, `""`, `" "`, `[]`, `{}`) from objects and lists, recursively
///
/// Emptiness is checked before descending, so a container that only becomes empty
/// after cleaning is kept.
#[must_use]
pub fn remove_empty() -> ResultHandler {
    Arc::new(drop_empty)
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == " ",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn drop_empty(data: Value) -> Value {
    match data {
        Value::Array(items) => {
            Value::Array(items.into_iter().filter(|v| !is_empty(v)).map(drop_empty).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_empty(v))
                .map(|(k, v)| (k, drop_empty(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Sanitizer trimming surrounding whitespace from string parameters
#[must_use]
pub fn trim_strings() -> Sanitizer {
    Arc::new(|value| match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    })
}

/// Sanitizer removing NUL characters from string parameters
#[must_use]
pub fn strip_nul() -> Sanitizer {
    Arc::new(|value| match value {
        Value::String(s) if s.contains('\0') => Value::String(s.replace('\0', "")),
        other => other,
    })
}
