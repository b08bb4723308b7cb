//! SQL Dialects and Templating
//!
//! Every supported database product is a [`Dialect`]. The dialect selects the SQL
//! syntax used for pagination (`LIMIT`/`OFFSET` versus `OFFSET ... FETCH NEXT`) and for
//! stored procedure invocation (`CALL`, `EXEC`, anonymous PL/SQL blocks).
//!
//! Templates are plain string builders. They never execute anything and work for
//! dialects whose driver is not compiled in, so SQL can be rendered offline.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{FacadeError, Result};
use crate::sql::{has_paging, has_sorting};

/// Offset-only paging for MySQL needs an explicit upper bound; this is the documented
/// "all rows" value.
const MYSQL_MAX_ROWS: &str = "18446744073709551615";

/// Procedure names: identifiers, optionally qualified (`dbo.my_procedure`)
static PROCEDURE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$#]*(\.[A-Za-z_][A-Za-z0-9_$#]*)*$")
        .expect("procedure name pattern is valid")
});

/// Parameter names as they appear after `:` in a query
static PARAMETER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("parameter pattern is valid"));

/// Supported database dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `PostgreSQL`
    #[serde(alias = "postgres")]
    PostgreSQL,
    /// `MySQL`
    MySQL,
    /// `MariaDB` (wire compatible with `MySQL`)
    MariaDB,
    /// Microsoft SQL Server
    #[serde(alias = "sqlserver")]
    MsSql,
    /// Oracle Database (12c+ for paging)
    Oracle,
    /// `SQLite`
    SQLite,
}

impl Dialect {
    /// All dialects, in documentation order
    pub const ALL: [Self; 6] =
        [Self::PostgreSQL, Self::MySQL, Self::MariaDB, Self::MsSql, Self::Oracle, Self::SQLite];

    /// Get the dialect name as used in configuration files
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::MariaDB => "mariadb",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
            Self::SQLite => "sqlite",
        }
    }

    /// URI scheme used when a connection string is built from parameters
    #[must_use]
    pub const fn default_scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::MariaDB => "mariadb",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
            Self::SQLite => "sqlite",
        }
    }

    /// Server port used when the configuration leaves it out
    #[must_use]
    pub const fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL | Self::MariaDB => Some(3306),
            Self::MsSql => Some(1433),
            Self::Oracle => Some(1521),
            Self::SQLite => None,
        }
    }

    /// File based dialects are configured with a `path` instead of a server address
    #[must_use]
    pub const fn is_file_based(&self) -> bool {
        matches!(self, Self::SQLite)
    }

    const fn uses_limit_offset(&self) -> bool {
        matches!(self, Self::PostgreSQL | Self::MySQL | Self::MariaDB | Self::SQLite)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = FacadeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Self::PostgreSQL),
            "mysql" => Ok(Self::MySQL),
            "mariadb" => Ok(Self::MariaDB),
            "mssql" | "sqlserver" => Ok(Self::MsSql),
            "oracle" => Ok(Self::Oracle),
            "sqlite" => Ok(Self::SQLite),
            other => Err(FacadeError::unsupported_dialect(format!(
                "'{other}' is not a supported dialect. Supported dialects: postgresql, mysql, \
                 mariadb, mssql, oracle, sqlite"
            ))),
        }
    }
}

/// Strip surrounding whitespace and trailing statement terminators
fn strip_terminator(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim_end()
}

/// Append a clause, on its own line when the last line ends in a `--` comment
fn append_clause(query: &str, clause: &str) -> String {
    let last_line = query.rsplit('\n').next().unwrap_or(query);
    if last_line.contains("--") {
        format!("{query}\n{clause}")
    } else {
        format!("{query} {clause}")
    }
}

/// Add paging with limits and offsets to a query based on the dialect
///
/// Queries that already page (`LIMIT n`, `TOP n`, `ROWNUM` bounds, `FETCH NEXT n ROWS`)
/// are returned unchanged apart from trimming. SQL Server requires an `ORDER BY` for
/// `OFFSET`, so one that keeps the natural order is added when missing.
///
/// # Errors
/// Returns `PagingError` when `page_size` is zero.
pub fn page(query: &str, dialect: Dialect, offset: u64, page_size: u64) -> Result<String> {
    let query = query.trim();

    if has_paging(query) {
        return Ok(query.to_string());
    }

    if page_size == 0 {
        return Err(FacadeError::paging_error(
            "Paging is enabled but page_size is missing or set to 0",
        ));
    }

    let query = strip_terminator(query);

    if dialect.uses_limit_offset() {
        return Ok(append_clause(query, &format!("LIMIT {page_size} OFFSET {offset}")));
    }

    let ordered = order_for_offset(query, dialect);
    Ok(append_clause(&ordered, &format!("OFFSET {offset} ROWS FETCH NEXT {page_size} ROWS ONLY")))
}

/// Skip `offset` rows without bounding the result size
///
/// Queries that already page are returned unchanged apart from trimming.
#[must_use]
pub fn offset(query: &str, dialect: Dialect, offset: u64) -> String {
    let query = query.trim();

    if has_paging(query) {
        return query.to_string();
    }

    let query = strip_terminator(query);

    match dialect {
        Dialect::PostgreSQL => append_clause(query, &format!("LIMIT ALL OFFSET {offset}")),
        Dialect::SQLite => append_clause(query, &format!("LIMIT -1 OFFSET {offset}")),
        Dialect::MySQL | Dialect::MariaDB => {
            append_clause(query, &format!("LIMIT {MYSQL_MAX_ROWS} OFFSET {offset}"))
        }
        Dialect::MsSql | Dialect::Oracle => {
            append_clause(&order_for_offset(query, dialect), &format!("OFFSET {offset} ROWS"))
        }
    }
}

fn order_for_offset(query: &str, dialect: Dialect) -> String {
    if dialect == Dialect::MsSql && !has_sorting(query) {
        append_clause(query, "ORDER BY (SELECT NULL)")
    } else {
        query.to_string()
    }
}

/// Render the statement that invokes a stored procedure
///
/// Parameters are referenced as named placeholders (`:name`) so they are bound by the
/// driver rather than interpolated. You may have to qualify the procedure with its
/// schema (e.g. `dbo.my_procedure`).
///
/// # Errors
/// - `UnsupportedDialect` for `SQLite`, which has no stored procedures
/// - `InvalidInput` when the procedure or a parameter name is not an identifier
pub fn stored_procedure_call<S: AsRef<str>>(
    dialect: Dialect,
    procedure_name: &str,
    param_names: &[S],
) -> Result<String> {
    if !PROCEDURE_NAME.is_match(procedure_name) {
        return Err(FacadeError::invalid_input(format!(
            "'{procedure_name}' is not a valid stored procedure name"
        )));
    }

    let mut names = Vec::with_capacity(param_names.len());
    for name in param_names {
        let name = name.as_ref();
        if !PARAMETER_NAME.is_match(name) {
            return Err(FacadeError::invalid_input(format!(
                "'{name}' is not a valid parameter name"
            )));
        }
        names.push(name);
    }

    let placeholders = names.iter().map(|n| format!(":{n}")).collect::<Vec<_>>().join(", ");

    let sql = match dialect {
        Dialect::PostgreSQL | Dialect::MySQL | Dialect::MariaDB => {
            format!("CALL {procedure_name}({placeholders})")
        }
        Dialect::MsSql => {
            let assignments = names.iter().map(|n| format!("@{n}=:{n}")).collect::<Vec<_>>();
            if assignments.is_empty() {
                format!("EXEC {procedure_name}")
            } else {
                format!("EXEC {procedure_name} {}", assignments.join(", "))
            }
        }
        Dialect::Oracle => format!("BEGIN {procedure_name}({placeholders}); END;"),
        Dialect::SQLite => {
            return Err(FacadeError::unsupported_dialect(
                "SQLite does not support stored procedures.",
            ))
        }
    };

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dialect_serialization() {
        assert_eq!(serde_json::to_string(&Dialect::PostgreSQL).unwrap(), r#""postgresql""#);
        assert_eq!(serde_json::to_string(&Dialect::MsSql).unwrap(), r#""mssql""#);
        assert_eq!(serde_json::from_str::<Dialect>(r#""postgres""#).unwrap(), Dialect::PostgreSQL);
        assert_eq!(serde_json::from_str::<Dialect>(r#""sqlserver""#).unwrap(), Dialect::MsSql);
        assert!(serde_json::from_str::<Dialect>(r#""db2""#).is_err());
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::MySQL);
        let err = "db2".parse::<Dialect>().unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_DIALECT");
    }

    #[test]
    fn test_page_limit_offset_dialects() {
        for dialect in [Dialect::PostgreSQL, Dialect::MySQL, Dialect::MariaDB, Dialect::SQLite] {
            let sql = page("  SELECT * FROM users  ", dialect, 40, 20).unwrap();
            assert_eq!(sql, "SELECT * FROM users LIMIT 20 OFFSET 40");
        }
    }

    #[test]
    fn test_page_oracle() {
        let sql = page("SELECT * FROM users", Dialect::Oracle, 0, 10).unwrap();
        assert_eq!(sql, "SELECT * FROM users OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY");
    }

    #[test]
    fn test_page_mssql_adds_order_by() {
        let sql = page("SELECT * FROM users", Dialect::MsSql, 5, 10).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM users ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
        );

        let sql = page("SELECT * FROM users ORDER BY id", Dialect::MsSql, 5, 10).unwrap();
        assert_eq!(sql, "SELECT * FROM users ORDER BY id OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY");
    }

    #[test]
    fn test_page_strips_terminator() {
        let sql = page("SELECT 1;", Dialect::SQLite, 0, 1).unwrap();
        assert_eq!(sql, "SELECT 1 LIMIT 1 OFFSET 0");
    }

    #[test]
    fn test_page_existing_paging_untouched() {
        let sql = page(" SELECT * FROM users LIMIT 5 ", Dialect::PostgreSQL, 10, 20).unwrap();
        assert_eq!(sql, "SELECT * FROM users LIMIT 5");

        let paged = page("SELECT * FROM t", Dialect::Oracle, 0, 10).unwrap();
        assert_eq!(page(&paged, Dialect::Oracle, 10, 10).unwrap(), paged);
    }

    #[test]
    fn test_page_zero_size_rejected() {
        let err = page("SELECT * FROM users", Dialect::MySQL, 0, 0).unwrap_err();
        assert_eq!(err.error_code(), "PAGING_ERROR");
        assert!(err.message().contains("page_size is missing or set to 0"));
    }

    #[test]
    fn test_offset_per_dialect() {
        let q = "SELECT * FROM users";
        assert_eq!(offset(q, Dialect::PostgreSQL, 3), "SELECT * FROM users LIMIT ALL OFFSET 3");
        assert_eq!(offset(q, Dialect::SQLite, 3), "SELECT * FROM users LIMIT -1 OFFSET 3");
        assert_eq!(
            offset(q, Dialect::MySQL, 3),
            "SELECT * FROM users LIMIT 18446744073709551615 OFFSET 3"
        );
        assert_eq!(offset(q, Dialect::Oracle, 3), "SELECT * FROM users OFFSET 3 ROWS");
        assert_eq!(
            offset(q, Dialect::MsSql, 3),
            "SELECT * FROM users ORDER BY (SELECT NULL) OFFSET 3 ROWS"
        );
    }

    #[test]
    fn test_page_after_trailing_line_comment() {
        let sql = page("SELECT id FROM t -- newest", Dialect::SQLite, 0, 2).unwrap();
        assert_eq!(sql, "SELECT id FROM t -- newest\nLIMIT 2 OFFSET 0");

        let sql = page("SELECT id FROM t -- newest", Dialect::MsSql, 0, 2).unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM t -- newest\nORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 2 ROWS ONLY"
        );

        let sql = page("-- newest first\nSELECT id FROM t", Dialect::PostgreSQL, 0, 2).unwrap();
        assert_eq!(sql, "-- newest first\nSELECT id FROM t LIMIT 2 OFFSET 0");
    }

    #[test]
    fn test_offset_after_trailing_line_comment() {
        let sql = offset("SELECT id FROM t -- all ids", Dialect::SQLite, 3);
        assert_eq!(sql, "SELECT id FROM t -- all ids\nLIMIT -1 OFFSET 3");
    }

    #[test]
    fn test_offset_existing_paging_untouched() {
        assert_eq!(offset(" SELECT id FROM t LIMIT 5 ", Dialect::SQLite, 3), "SELECT id FROM t LIMIT 5");
        let fetch = "SELECT id FROM t OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY";
        assert_eq!(offset(fetch, Dialect::Oracle, 3), fetch);
    }

    #[test]
    fn test_stored_procedure_templates() {
        let params = ["id", "name"];
        assert_eq!(
            stored_procedure_call(Dialect::PostgreSQL, "update_user", &params).unwrap(),
            "CALL update_user(:id, :name)"
        );
        assert_eq!(
            stored_procedure_call(Dialect::MySQL, "update_user", &params).unwrap(),
            "CALL update_user(:id, :name)"
        );
        assert_eq!(
            stored_procedure_call(Dialect::MsSql, "dbo.update_user", &params).unwrap(),
            "EXEC dbo.update_user @id=:id, @name=:name"
        );
        assert_eq!(
            stored_procedure_call(Dialect::Oracle, "pkg.update_user", &params).unwrap(),
            "BEGIN pkg.update_user(:id, :name); END;"
        );
    }

    #[test]
    fn test_stored_procedure_without_params() {
        let none: [&str; 0] = [];
        assert_eq!(stored_procedure_call(Dialect::PostgreSQL, "refresh", &none).unwrap(), "CALL refresh()");
        assert_eq!(stored_procedure_call(Dialect::MsSql, "refresh", &none).unwrap(), "EXEC refresh");
        assert_eq!(
            stored_procedure_call(Dialect::Oracle, "refresh", &none).unwrap(),
            "BEGIN refresh(); END;"
        );
    }

    #[test]
    fn test_stored_procedure_sqlite_rejected() {
        let none: [&str; 0] = [];
        let err = stored_procedure_call(Dialect::SQLite, "refresh", &none).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_DIALECT");
        assert!(err.message().contains("SQLite does not support stored procedures."));
    }

    #[test]
    fn test_stored_procedure_name_injection_rejected() {
        let none: [&str; 0] = [];
        assert!(stored_procedure_call(Dialect::MySQL, "x(); DROP TABLE users; --", &none).is_err());
        assert!(stored_procedure_call(Dialect::MySQL, "ok", &["bad name"]).is_err());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Dialect::PostgreSQL.default_port(), Some(5432));
        assert_eq!(Dialect::MariaDB.default_port(), Some(3306));
        assert_eq!(Dialect::SQLite.default_port(), None);
    }
}
