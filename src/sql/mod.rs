//! Raw SQL Analysis
//!
//! Lightweight, pattern-based inspection of raw SQL text. Nothing here parses SQL; the
//! helpers answer the handful of questions the execution path needs:
//! - Does the statement modify data (and therefore get committed instead of fetched)?
//! - Does it change the schema (and therefore never get paged)?
//! - Does it already page its results?
//! - Does it sort its results?
//! - Is it a stored procedure invocation?
//! - Does it look like it was assembled with string formatting?
//!
//! String literals and comments are masked before matching so that text such as
//! `WHERE note = 'limit 5'` is not mistaken for a paging clause.

pub mod params;

use regex::Regex;
use std::sync::LazyLock;

pub use params::{bind_named, params, sanitize, BoundQuery, Params, PlaceholderStyle, Sanitizer};

static PAGING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // MySQL, MariaDB, PostgreSQL, SQLite
        r"(?i)\bLIMIT\s+\d+",
        // SQL Server
        r"(?i)\bTOP\s*\(?\s*\d+",
        // Oracle (legacy)
        r"(?i)\bROWNUM\b\s*(?:BETWEEN\s*\d+\s*AND\s*\d+|<=?\s*\d+)",
        // SQL:2008 (Oracle 12c+, SQL Server 2012+, PostgreSQL)
        r"(?i)\bFETCH\s+(?:NEXT|FIRST)\s+\d+\s+ROWS?\s+ONLY\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("paging pattern is valid"))
    .collect()
});

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("order by pattern is valid"));

static INNERMOST_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("parenthesis pattern is valid"));

static STORED_PROCEDURE: LazyLock<Regex> = LazyLock::new(|| {
    // exec/execute: SQL Server, Sybase; call: MySQL, PostgreSQL, Oracle; begin/declare: PL/SQL
    Regex::new(r"(?i)^(?:exec|execute|call|begin|declare)\s").expect("procedure pattern is valid")
});

static FORMAT_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\w*(?::[^}]*)?\}|%[sdf]\b|\$\{\w+\}").expect("format pattern is valid")
});

static REPEATED_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(" +").expect("space pattern is valid"));

/// Collapse whitespace in a query, mostly for log output
///
/// With `trim_carriage` every run of whitespace (including line breaks) becomes a single
/// space; otherwise only repeated spaces are collapsed and line breaks are kept.
#[must_use]
pub fn trim_string(sql: &str, trim_carriage: bool) -> String {
    if trim_carriage {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        REPEATED_SPACES.replace_all(sql, " ").into_owned()
    }
}

/// Strip SQL comments from query
///
/// Handles:
/// - Line comments: -- comment
/// - Block comments: /* comment */
pub(crate) fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;

    while let Some(ch) = chars.next() {
        if in_literal {
            result.push(ch);
            if ch == '\'' {
                in_literal = false;
            }
            continue;
        }

        match ch {
            '\'' => {
                in_literal = true;
                result.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' ');
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Replace the contents of single-quoted string literals with nothing (`'abc'` -> `''`)
pub(crate) fn mask_literals(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_literal = false;

    for ch in sql.chars() {
        if ch == '\'' {
            in_literal = !in_literal;
            result.push(ch);
        } else if !in_literal {
            result.push(ch);
        }
    }

    result
}

/// Comments removed, literals masked, surrounding whitespace trimmed
fn normalized(sql: &str) -> String {
    mask_literals(&strip_comments(sql)).trim().to_string()
}

/// Check if the statement modifies data (INSERT, UPDATE or DELETE)
#[must_use]
pub fn is_data_manipulation_query(sql: &str) -> bool {
    let statement = normalized(sql).to_lowercase();
    ["insert", "update", "delete"].iter().any(|kw| statement.starts_with(kw))
}

/// Check if the statement defines or changes schema objects (DDL, grants)
#[must_use]
pub fn is_schema_statement(sql: &str) -> bool {
    let statement = normalized(sql).to_lowercase();
    let keyword = statement.split(|c: char| !(c.is_alphanumeric() || c == '_')).next().unwrap_or("");
    ["create", "alter", "drop", "truncate", "grant", "revoke", "comment", "rename"].contains(&keyword)
}

/// Check if the statement invokes a stored procedure or an anonymous block
#[must_use]
pub fn is_stored_procedure(sql: &str) -> bool {
    STORED_PROCEDURE.is_match(&normalized(sql))
}

/// Check for an `ORDER BY` outside of subqueries
#[must_use]
pub fn has_sorting(sql: &str) -> bool {
    let mut text = normalized(sql);
    loop {
        let stripped = INNERMOST_PARENS.replace_all(&text, "").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }
    ORDER_BY.is_match(&text)
}

/// Detect paging (limits, offsets, row bounds) in a query
#[must_use]
pub fn has_paging(sql: &str) -> bool {
    let text = normalized(sql);
    PAGING_PATTERNS.iter().any(|pattern| pattern.is_match(&text))
}

/// Check whether the query text looks assembled with string formatting
///
/// Placeholders such as `{name}`, `%s` or `${name}` left outside string literals usually
/// mean a value was (or was meant to be) interpolated instead of bound.
#[must_use]
pub fn has_format_args(sql: &str) -> bool {
    FORMAT_ARGS.is_match(&normalized(sql))
}
