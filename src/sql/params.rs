//! Query Parameters
//!
//! Queries reference parameters by name (`:name`), independent of the driver. Before a
//! query reaches a driver, [`bind_named`] rewrites the named placeholders into the
//! driver's positional style and lines the values up in binding order.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FacadeError, Result};

/// Named query parameters, kept in insertion order
pub type Params = serde_json::Map<String, Value>;

/// A function applied to every parameter value before execution
pub type Sanitizer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Build [`Params`] from key/value pairs
pub fn params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Apply every sanitizer, in order, to every parameter value
///
/// Missing or empty parameters yield an empty map.
#[must_use]
pub fn sanitize(params: Option<&Params>, sanitizers: &[Sanitizer]) -> Params {
    let Some(params) = params else {
        return Params::new();
    };

    params
        .iter()
        .map(|(key, value)| {
            let value = sanitizers.iter().fold(value.clone(), |value, sanitizer| sanitizer(value));
            (key.clone(), value)
        })
        .collect()
}

/// Positional placeholder syntax expected by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL); repeated names reuse their index
    Dollar,
    /// `?1`, `?2`, ... (SQLite); repeated names reuse their index
    Numbered,
    /// `?` per occurrence (MySQL); repeated names repeat their value
    Question,
}

/// A query rewritten for a driver together with its values in binding order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    /// Query text with positional placeholders
    pub sql: String,

    /// Values to bind, in placeholder order
    pub values: Vec<Value>,
}

/// Rewrite `:name` placeholders into a driver's positional style
///
/// Placeholders inside string literals, quoted identifiers and comments are left alone,
/// as are PostgreSQL casts (`::type`) and assignments (`:=`). Inside square brackets a
/// `:` that follows a bound (`arr[1:n]`) is an array slice separator.
/// Parameters that the query does not reference are ignored.
///
/// # Errors
/// Returns `InvalidInput` when the query references a parameter that is not supplied.
pub fn bind_named(sql: &str, params: &Params, style: PlaceholderStyle) -> Result<BoundQuery> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut indexes: HashMap<String, usize> = HashMap::new();
    let mut chars = sql.chars().peekable();
    let mut brackets = 0usize;

    while let Some(ch) = chars.next() {
        match ch {
            '[' => {
                brackets += 1;
                out.push(ch);
            }
            ']' => {
                brackets = brackets.saturating_sub(1);
                out.push(ch);
            }
            '\'' | '"' | '`' => {
                out.push(ch);
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == ch {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(ch);
                for inner in chars.by_ref() {
                    out.push(inner);
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(ch);
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    out.push(inner);
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ':' if chars.peek() == Some(&':') => {
                out.push(ch);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            ':' if brackets > 0 && follows_slice_bound(&out) => out.push(ch),
            ':' if chars.peek().is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }

                let value = params.get(&name).ok_or_else(|| {
                    FacadeError::invalid_input(format!("Missing value for parameter ':{name}'"))
                })?;

                match style {
                    PlaceholderStyle::Question => {
                        values.push(value.clone());
                        out.push('?');
                    }
                    PlaceholderStyle::Dollar | PlaceholderStyle::Numbered => {
                        let index = match indexes.get(&name) {
                            Some(index) => *index,
                            None => {
                                values.push(value.clone());
                                indexes.insert(name, values.len());
                                values.len()
                            }
                        };
                        out.push(if style == PlaceholderStyle::Dollar { '$' } else { '?' });
                        out.push_str(&index.to_string());
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    Ok(BoundQuery { sql: out, values })
}

fn follows_slice_bound(out: &str) -> bool {
    out.trim_end().ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ')')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_params_preserve_order() {
        let p = params([("b", json!(2)), ("a", json!(1))]);
        let keys: Vec<_> = p.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_sanitize_applies_in_order() {
        let p = params([("name", json!("  Alice  ")), ("age", json!(30))]);
        let trim: Sanitizer = Arc::new(|v| match v {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        });
        let upper: Sanitizer = Arc::new(|v| match v {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        });

        let sanitized = sanitize(Some(&p), &[trim, upper]);
        assert_eq!(sanitized["name"], json!("ALICE"));
        assert_eq!(sanitized["age"], json!(30));
    }

    #[test]
    fn test_sanitize_empty() {
        assert!(sanitize(None, &[]).is_empty());
        assert!(sanitize(Some(&Params::new()), &[]).is_empty());
    }

    #[test]
    fn test_bind_dollar_style() {
        let p = params([("id", json!(7)), ("name", json!("x"))]);
        let bound =
            bind_named("SELECT * FROM t WHERE id = :id OR parent = :id AND name = :name", &p, PlaceholderStyle::Dollar)
                .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id = $1 OR parent = $1 AND name = $2");
        assert_eq!(bound.values, vec![json!(7), json!("x")]);
    }

    #[test]
    fn test_bind_numbered_style() {
        let p = params([("id", json!(7))]);
        let bound = bind_named("SELECT :id, :id", &p, PlaceholderStyle::Numbered).unwrap();
        assert_eq!(bound.sql, "SELECT ?1, ?1");
        assert_eq!(bound.values, vec![json!(7)]);
    }

    #[test]
    fn test_bind_question_style_repeats_values() {
        let p = params([("id", json!(7)), ("name", json!("x"))]);
        let bound = bind_named("CALL p(:id, :name, :id)", &p, PlaceholderStyle::Question).unwrap();
        assert_eq!(bound.sql, "CALL p(?, ?, ?)");
        assert_eq!(bound.values, vec![json!(7), json!("x"), json!(7)]);
    }

    #[test]
    fn test_bind_skips_literals_comments_and_casts() {
        let p = params([("id", json!(1))]);
        let sql = "SELECT ':skip', \"a:b\", created::date -- :nope\nFROM t /* :no */ WHERE id = :id";
        let bound = bind_named(sql, &p, PlaceholderStyle::Dollar).unwrap();
        assert_eq!(
            bound.sql,
            "SELECT ':skip', \"a:b\", created::date -- :nope\nFROM t /* :no */ WHERE id = $1"
        );
        assert_eq!(bound.values.len(), 1);
    }

    #[test]
    fn test_bind_missing_param() {
        let err = bind_named("SELECT :missing", &Params::new(), PlaceholderStyle::Question)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(err.message().contains(":missing"));
    }

    #[test]
    fn test_bind_ignores_assignment_and_slices() {
        let bound =
            bind_named("SELECT arr[1:2], x := 3", &Params::new(), PlaceholderStyle::Dollar).unwrap();
        assert_eq!(bound.sql, "SELECT arr[1:2], x := 3");
        assert!(bound.values.is_empty());
    }

    #[test]
    fn test_bind_array_slice_upper_bound() {
        let p = params([("lo", json!(2)), ("hi", json!(4))]);

        let bound = bind_named("SELECT arr[1:n] FROM t", &p, PlaceholderStyle::Dollar).unwrap();
        assert_eq!(bound.sql, "SELECT arr[1:n] FROM t");
        assert!(bound.values.is_empty());

        let bound = bind_named("SELECT m[1][:lo], arr[ :hi ]", &p, PlaceholderStyle::Dollar).unwrap();
        assert_eq!(bound.sql, "SELECT m[1][$1], arr[ $2 ]");
        assert_eq!(bound.values, vec![json!(2), json!(4)]);
    }
}
