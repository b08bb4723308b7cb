//! Database Façade
//!
//! [`Database`] wraps one resolved database configuration and a lazily opened
//! [`Connection`]. It adds the raw SQL conveniences on top of the engines:
//! parameter sanitizing, sorting and paging injection, stored procedure templating,
//! fetch modes, auto-commit and result post-processing.
//!
//! # Execution
//! [`Database::execute`] runs a fixed sequence:
//! 1. Connect, unless a custom execution handler is installed
//! 2. Sanitize parameters (builder sanitizers, then per-call sanitizers)
//! 3. Apply the sorter when the query has no `ORDER BY`
//! 4. Unless the statement modifies data or calls a procedure: page it when a page size is
//!    given or paging is enabled, otherwise apply a bare offset when one is given
//! 5. Execute through the execution handler or the connection
//! 6. Keep the result set; [`Database::fetch`] continues reading from it
//! 7. Reads: fetch rows and shape the return value by `fetch_return`
//! 8. Writes: commit when `auto_commit` is set and return the success message
//!
//! Errors from any step go through the error handler, when one is installed.
//!
//! # Example
//! ```no_run
//! use dbfacade::{Database, QueryOptions};
//! use serde_json::json;
//!
//! # async fn run() -> dbfacade::Result<()> {
//! let mut db = Database::builder(json!({"dialect": "sqlite", "path": "app.db"})).build()?;
//! let params = dbfacade::params([("active", json!(true))]);
//! let users = db
//!     .execute("SELECT * FROM users WHERE active = :active", Some(&params), QueryOptions::new())
//!     .await?;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{
    get_default_db_config, validate_db_model, DatabaseConfig, DbModel, Dialect, FetchReturn,
    ModelValidationErrors, MultiDatabaseConfig, SINGLE_MODEL,
};
use crate::dialect;
use crate::engine::{Connection, ResultSet};
use crate::error::{FacadeError, Result};
use crate::handlers::ResultHandler;
use crate::sql::{
    has_format_args, has_sorting, is_data_manipulation_query, is_schema_statement,
    is_stored_procedure, sanitize, trim_string, Params, Sanitizer,
};

/// Runs a query instead of the connection: `(query, params, fetch)`
pub type ExecutionHandler = Arc<dyn Fn(&str, &Params, usize) -> Result<ResultSet> + Send + Sync>;

/// Builds the return value of a data manipulation statement: `(query, rows_affected)`
pub type SuccessHandler = Arc<dyn Fn(&str, u64) -> Value + Send + Sync>;

/// Receives every execution error; may recover with an output or pass an error on
pub type ErrorHandler = Arc<dyn Fn(FacadeError) -> Result<QueryOutput> + Send + Sync>;

/// Rewrites queries that have no `ORDER BY`
pub type Sorter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Functions that customize execution, shared by every session of a façade
#[derive(Clone, Default)]
struct Hooks {
    sanitizers: Vec<Sanitizer>,
    result_handlers: Vec<ResultHandler>,
    execution_handler: Option<ExecutionHandler>,
    success_handler: Option<SuccessHandler>,
    error_handler: Option<ErrorHandler>,
    sorter: Option<Sorter>,
}

/// Per-call execution options
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Rows to fetch: 0 for all, 1 for a single row (or `null`), n for up to n rows
    pub fetch: usize,

    /// Rows to skip
    pub offset: u64,

    /// Page size; forces paging for this call
    pub page_size: Option<u64>,

    /// Extra sanitizers for this call
    pub sanitizers: Vec<Sanitizer>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fetch(mut self, fetch: usize) -> Self {
        self.fetch = fetch;
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizers.push(sanitizer);
        self
    }
}

/// What [`Database::execute`] returns
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Processed rows, a single row, or the success message of a write
    Data(Value),
    /// Processed rows together with the result set (`fetch_return: tuple`)
    Tuple(Value, ResultSet),
    /// The result set only (`fetch_return: object`)
    Object(ResultSet),
}

impl QueryOutput {
    /// Processed data, when the output carries any
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data(data) | Self::Tuple(data, _) => Some(data),
            Self::Object(_) => None,
        }
    }

    /// Result set, when the output carries one
    #[must_use]
    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            Self::Tuple(_, result) | Self::Object(result) => Some(result),
            Self::Data(_) => None,
        }
    }

    /// Collapse into one JSON value
    ///
    /// A tuple becomes `{"data": .., "result": ..}`; a result set becomes its
    /// `{"columns", "rows", "rows_affected"}` object.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Data(data) => data,
            Self::Tuple(data, result) => json!({"data": data, "result": result}),
            Self::Object(result) => json!(result),
        }
    }
}

/// Read rows from a result set: 0 all, 1 one row (or `null`), n up to n rows
fn fetch_rows(result: &mut ResultSet, fetch: usize) -> Value {
    match fetch {
        0 => Value::Array(result.fetch_all()),
        1 => result.fetch_one().unwrap_or(Value::Null),
        n => Value::Array(result.fetch_many(n)),
    }
}

/// Builds a [`Database`] from a configuration document
pub struct DatabaseBuilder {
    config: Value,
    name: Option<String>,
    default_config_name: Option<String>,
    default_config: Option<DatabaseConfig>,
    page_size: Option<u64>,
    hooks: Hooks,
}

impl DatabaseBuilder {
    /// Database to use from a multi-database configuration
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Entry used when no name is given and no entry is flagged `default`
    #[must_use]
    pub fn default_config_name(mut self, name: impl Into<String>) -> Self {
        self.default_config_name = Some(name.into());
        self
    }

    /// Configuration used when no name is given and no entry is flagged `default`
    ///
    /// Takes precedence over [`Self::default_config_name`].
    #[must_use]
    pub fn default_config(mut self, config: DatabaseConfig) -> Self {
        self.default_config = Some(config);
        self
    }

    /// Page size overriding `paging.page_size`
    #[must_use]
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.hooks.sanitizers.push(sanitizer);
        self
    }

    /// Post-processing step for fetched data; handlers run in registration order
    #[must_use]
    pub fn result_handler(mut self, handler: ResultHandler) -> Self {
        self.hooks.result_handlers.push(handler);
        self
    }

    #[must_use]
    pub fn execution_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Params, usize) -> Result<ResultSet> + Send + Sync + 'static,
    {
        self.hooks.execution_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn success_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, u64) -> Value + Send + Sync + 'static,
    {
        self.hooks.success_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(FacadeError) -> Result<QueryOutput> + Send + Sync + 'static,
    {
        self.hooks.error_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn sorter<F>(mut self, sorter: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.hooks.sorter = Some(Arc::new(sorter));
        self
    }

    /// Validate the configuration and resolve the database to use
    ///
    /// # Errors
    /// `Validation` when the document matches neither model; `ConfigError` when a
    /// requested database name does not exist.
    pub fn build(self) -> Result<Database> {
        let (name, config) = match validate_db_model(&self.config)? {
            DbModel::Single(config) => (self.name, config),
            DbModel::Multi(multi) => resolve_multi(
                &multi,
                self.name,
                self.default_config,
                self.default_config_name,
            )?,
        };

        if let Some(name) = &name {
            tracing::debug!(database = %name, dialect = %config.dialect, "resolved database");
        }

        let page_size = self.page_size.unwrap_or_else(|| config.page_size());

        Ok(Database { name, config, page_size, hooks: self.hooks, connection: None, result: None })
    }
}

/// Pick one entry from a multi-database configuration
///
/// Order: explicit name, the entry flagged `default`, the provided default configuration,
/// the default configuration name, the first entry.
fn resolve_multi(
    multi: &MultiDatabaseConfig,
    name: Option<String>,
    default_config: Option<DatabaseConfig>,
    default_config_name: Option<String>,
) -> Result<(Option<String>, DatabaseConfig)> {
    let lookup = |name: String| -> Result<(Option<String>, DatabaseConfig)> {
        match multi.get(&name) {
            Some(config) => Ok((Some(name), config.clone())),
            None => Err(FacadeError::config_error(format!(
                "The named database configuration '{name}' was not found in the configuration \
                 file. Available: {}",
                multi.names().join(", ")
            ))),
        }
    };

    if let Some(name) = name {
        return lookup(name);
    }
    if let Some((name, config)) = get_default_db_config(multi) {
        return Ok((Some(name.to_string()), config.clone()));
    }
    if let Some(config) = default_config {
        return Ok((None, config));
    }
    if let Some(name) = default_config_name {
        return lookup(name);
    }

    multi
        .first()
        .map(|(name, config)| (Some(name.to_string()), config.clone()))
        .ok_or_else(|| {
            FacadeError::config_error("Please check your configuration file for a valid database entry.")
        })
}

/// A configured database with a lazily opened connection
pub struct Database {
    name: Option<String>,
    config: DatabaseConfig,
    page_size: u64,
    hooks: Hooks,
    connection: Option<Connection>,
    result: Option<ResultSet>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("dialect", &self.config.dialect)
            .field("page_size", &self.page_size)
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Start building a façade from a configuration document
    #[must_use]
    pub fn builder(config: Value) -> DatabaseBuilder {
        DatabaseBuilder {
            config,
            name: None,
            default_config_name: None,
            default_config: None,
            page_size: None,
            hooks: Hooks::default(),
        }
    }

    /// Façade over an already typed configuration, without hooks
    ///
    /// # Errors
    /// `Validation` when the configuration breaks a field rule.
    pub fn from_config(config: DatabaseConfig) -> Result<Self> {
        let errors = config.field_errors();
        if !errors.is_empty() {
            return Err(ModelValidationErrors::new(vec![(SINGLE_MODEL.to_string(), errors)]).into());
        }

        let page_size = config.page_size();
        Ok(Self { name: None, config, page_size, hooks: Hooks::default(), connection: None, result: None })
    }

    /// Name of the selected entry of a multi-database configuration
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Connection string of the resolved configuration
    pub fn uri(&self) -> Result<String> {
        self.config.uri()
    }

    /// Connection string with the password masked
    pub fn redacted_uri(&self) -> Result<String> {
        self.config.redacted_uri()
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn set_page_size(&mut self, page_size: u64) {
        self.page_size = page_size;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the connection if it is not open yet
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let connection = Connection::open(&self.config).await?;
        tracing::info!(
            database = self.name.as_deref().unwrap_or("default"),
            engine = connection.engine_name(),
            "connected"
        );
        self.connection = Some(connection);
        Ok(())
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| FacadeError::connection_failed("The connection is not open"))
    }

    /// Roll back any open transaction and close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.result = None;
        match self.connection.take() {
            Some(connection) => {
                connection.close().await?;
                tracing::info!(database = self.name.as_deref().unwrap_or("default"), "closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        match self.connection.as_mut() {
            Some(connection) => connection.commit().await,
            None => Ok(()),
        }
    }

    pub async fn rollback(&mut self) -> Result<()> {
        match self.connection.as_mut() {
            Some(connection) => connection.rollback().await,
            None => Ok(()),
        }
    }

    /// A new, unconnected façade over the same configuration and hooks
    #[must_use]
    pub fn session(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            page_size: self.page_size,
            hooks: self.hooks.clone(),
            connection: None,
            result: None,
        }
    }

    /// Add paging to a query for this database's dialect
    ///
    /// A `page_size` of `None` or 0 falls back to the façade's page size.
    pub fn page(&self, query: &str, offset: u64, page_size: Option<u64>) -> Result<String> {
        let page_size = page_size.filter(|n| *n > 0).unwrap_or(self.page_size);
        dialect::page(query, self.config.dialect, offset, page_size)
    }

    /// Skip rows without limiting them
    #[must_use]
    pub fn offset(&self, query: &str, offset: u64) -> String {
        dialect::offset(query, self.config.dialect, offset)
    }

    /// The result set of the last statement
    #[must_use]
    pub fn result(&self) -> Option<&ResultSet> {
        self.result.as_ref()
    }

    /// Fetch more rows from the last result set (0 all, 1 one row, n up to n rows)
    ///
    /// # Errors
    /// `InvalidInput` when no statement has been executed.
    pub fn fetch(&mut self, fetch: usize) -> Result<Value> {
        let result = self
            .result
            .as_mut()
            .ok_or_else(|| FacadeError::invalid_input("No valid result object found."))?;
        Ok(fetch_rows(result, fetch))
    }

    /// Run the result handlers over fetched data
    #[must_use]
    pub fn process_data(&self, data: Value) -> Value {
        self.hooks.result_handlers.iter().fold(data, |data, handler| handler(data))
    }

    /// Execute a raw SQL statement with named parameters (`:name`)
    pub async fn execute(
        &mut self,
        query: &str,
        params: Option<&Params>,
        options: QueryOptions,
    ) -> Result<QueryOutput> {
        match self.run(query, params, &options).await {
            Ok(output) => Ok(output),
            Err(err) => {
                tracing::warn!(code = err.error_code(), "execution failed");
                match self.hooks.error_handler.clone() {
                    Some(handler) => handler(err),
                    None => Err(err),
                }
            }
        }
    }

    /// Call a stored procedure, passing every parameter by name
    ///
    /// # Errors
    /// `UnsupportedDialect` for SQLite; `InvalidInput` for malformed procedure or
    /// parameter names.
    pub async fn execute_sp(
        &mut self,
        procedure: &str,
        params: Option<&Params>,
        fetch: usize,
    ) -> Result<QueryOutput> {
        let names: Vec<&str> =
            params.map(|p| p.keys().map(String::as_str).collect()).unwrap_or_default();
        let query = dialect::stored_procedure_call(self.config.dialect, procedure, &names)?;
        self.execute(&query, params, QueryOptions::new().fetch(fetch)).await
    }

    async fn run(
        &mut self,
        query: &str,
        params: Option<&Params>,
        options: &QueryOptions,
    ) -> Result<QueryOutput> {
        let started = Instant::now();
        let execution_handler = self.hooks.execution_handler.clone();

        if execution_handler.is_none() {
            self.connect().await?;
        }

        let sanitizers: Vec<Sanitizer> =
            self.hooks.sanitizers.iter().chain(options.sanitizers.iter()).cloned().collect();
        let params = if sanitizers.is_empty() {
            params.cloned().unwrap_or_default()
        } else {
            sanitize(params, &sanitizers)
        };

        if has_format_args(query) {
            tracing::warn!("query text looks string-formatted; bind values as :name parameters");
        }

        let mut query = query.to_string();
        if let Some(sorter) = &self.hooks.sorter {
            if !has_sorting(&query) {
                query = sorter(&query);
            }
        }

        let modifies_data = is_data_manipulation_query(&query);
        if !modifies_data && !is_stored_procedure(&query) && !is_schema_statement(&query) {
            if options.page_size.is_some() || self.config.paging.enabled {
                query = self.page(&query, options.offset, options.page_size)?;
            } else if options.offset > 0 {
                query = self.offset(&query, options.offset);
            }
        }

        let mut result = match execution_handler {
            Some(handler) => handler(&query, &params, options.fetch)?,
            None => self.connection_mut()?.execute(&query, &params).await?,
        };

        tracing::debug!(
            sql = %trim_string(&query, true),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed"
        );

        if modifies_data {
            if self.config.auto_commit {
                self.commit().await?;
            }
            let affected = result.row_count();
            self.result = Some(result);
            let message = match &self.hooks.success_handler {
                Some(handler) => handler(&query, affected),
                None => json!({"message": "success", "rows_affected": affected}),
            };
            return Ok(QueryOutput::Data(message));
        }

        let data = fetch_rows(&mut result, options.fetch);
        let output = if options.fetch == 0 {
            QueryOutput::Data(self.process_data(data))
        } else {
            match self.config.fetch_return {
                FetchReturn::Data => QueryOutput::Data(self.process_data(data)),
                FetchReturn::Tuple => QueryOutput::Tuple(self.process_data(data), result.clone()),
                FetchReturn::Object => QueryOutput::Object(result.clone()),
            }
        };
        self.result = Some(result);

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::single_row;
    use crate::sql::params;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Execution handler that records queries and returns three rows for reads
    fn recorder(log: Arc<Mutex<Vec<String>>>) -> impl Fn(&str, &Params, usize) -> Result<ResultSet> {
        move |query, _params, _fetch| {
            log.lock().unwrap().push(query.to_string());
            if is_data_manipulation_query(query) {
                Ok(ResultSet::affected(2))
            } else {
                Ok(ResultSet::new(
                    vec!["id".to_string()],
                    vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
                ))
            }
        }
    }

    fn build(config: Value, log: &Arc<Mutex<Vec<String>>>) -> Database {
        Database::builder(config).execution_handler(recorder(Arc::clone(log))).build().unwrap()
    }

    fn pg() -> Value {
        json!({"dialect": "postgresql", "uri": "postgresql://u:p@db/app"})
    }

    #[test]
    fn test_resolve_single() {
        let db = Database::builder(pg()).build().unwrap();
        assert_eq!(db.dialect(), Dialect::PostgreSQL);
        assert_eq!(db.name(), None);
        assert!(!db.is_connected());
    }

    #[test]
    fn test_resolve_multi_by_name_default_and_first() {
        let config = json!({
            "one": {"dialect": "sqlite", "path": "one.db"},
            "two": {"dialect": "mysql", "uri": "mysql://u@h/db"},
            "three": {"dialect": "postgresql", "uri": "postgresql://u@h/db", "default": true}
        });

        let db = Database::builder(config.clone()).name("two").build().unwrap();
        assert_eq!(db.name(), Some("two"));
        assert_eq!(db.dialect(), Dialect::MySQL);

        let db = Database::builder(config).build().unwrap();
        assert_eq!(db.name(), Some("three"));

        let no_default = json!({
            "one": {"dialect": "sqlite", "path": "one.db"},
            "two": {"dialect": "mysql", "uri": "mysql://u@h/db"}
        });
        let db = Database::builder(no_default.clone()).build().unwrap();
        assert_eq!(db.name(), Some("one"));

        let db = Database::builder(no_default.clone()).default_config_name("two").build().unwrap();
        assert_eq!(db.name(), Some("two"));

        let db = Database::builder(no_default)
            .default_config_name("two")
            .default_config(DatabaseConfig::sqlite("fallback.db"))
            .build()
            .unwrap();
        assert_eq!(db.name(), None);
        assert_eq!(db.config().path.as_deref(), Some(std::path::Path::new("fallback.db")));
    }

    #[test]
    fn test_resolve_unknown_name() {
        let config = json!({"one": {"dialect": "sqlite", "path": "one.db"}});
        let err = Database::builder(config).name("missing").build().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("'missing'"));
        assert!(err.message().contains("Available: one"));
    }

    #[test]
    fn test_invalid_config() {
        let err = Database::builder(json!({"dialect": "sqlite"})).build().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_from_config_validates() {
        assert!(Database::from_config(DatabaseConfig::sqlite("")).is_err());
        assert!(Database::from_config(DatabaseConfig::sqlite("a.db")).is_ok());
    }

    #[test]
    fn test_page_size_precedence() {
        let config = json!({
            "dialect": "sqlite",
            "path": "a.db",
            "paging": {"enabled": true, "page_size": 25}
        });
        assert_eq!(Database::builder(config.clone()).build().unwrap().page_size(), 25);
        let mut db = Database::builder(config).page_size(10).build().unwrap();
        assert_eq!(db.page_size(), 10);
        db.set_page_size(5);
        assert_eq!(db.page("SELECT 1", 0, None).unwrap(), "SELECT 1 LIMIT 5 OFFSET 0");
        assert_eq!(db.page("SELECT 1", 0, Some(0)).unwrap(), "SELECT 1 LIMIT 5 OFFSET 0");
        assert_eq!(db.page("SELECT 1", 5, Some(2)).unwrap(), "SELECT 1 LIMIT 2 OFFSET 5");
    }

    #[tokio::test]
    async fn test_execute_fetch_modes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = build(pg(), &log);

        let all = db.execute("SELECT id FROM t", None, QueryOptions::new()).await.unwrap();
        assert_eq!(all, QueryOutput::Data(json!([{"id": 1}, {"id": 2}, {"id": 3}])));

        let one = db.execute("SELECT id FROM t", None, QueryOptions::new().fetch(1)).await.unwrap();
        assert_eq!(one, QueryOutput::Data(json!({"id": 1})));

        // The stored result continues where the last fetch stopped
        assert_eq!(db.fetch(1).unwrap(), json!({"id": 2}));
        assert_eq!(db.fetch(0).unwrap(), json!([{"id": 3}]));
        assert_eq!(db.fetch(1).unwrap(), Value::Null);

        let two = db.execute("SELECT id FROM t", None, QueryOptions::new().fetch(2)).await.unwrap();
        assert_eq!(two, QueryOutput::Data(json!([{"id": 1}, {"id": 2}])));
    }

    #[test]
    fn test_fetch_without_result() {
        let mut db = Database::builder(pg()).build().unwrap();
        assert_eq!(db.fetch(0).unwrap_err().error_code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_fetch_return_object_and_tuple() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut config = pg();
        config["fetch_return"] = json!("object");
        let mut db = build(config.clone(), &log);

        let out = db.execute("SELECT id FROM t", None, QueryOptions::new().fetch(1)).await.unwrap();
        let QueryOutput::Object(mut result) = out else { panic!("expected a result set") };
        assert_eq!(result.remaining(), 2);
        assert_eq!(result.fetch_one(), Some(json!({"id": 2})));

        // fetch 0 always returns data
        let out = db.execute("SELECT id FROM t", None, QueryOptions::new()).await.unwrap();
        assert!(matches!(out, QueryOutput::Data(_)));

        config["fetch_return"] = json!("tuple");
        let mut db = build(config, &log);
        let out = db.execute("SELECT id FROM t", None, QueryOptions::new().fetch(2)).await.unwrap();
        assert_eq!(out.data(), Some(&json!([{"id": 1}, {"id": 2}])));
        assert_eq!(out.result_set().map(ResultSet::remaining), Some(1));
    }

    #[tokio::test]
    async fn test_paging_applied_by_config() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut config = pg();
        config["paging"] = json!({"enabled": true, "page_size": 20});
        let mut db = build(config, &log);

        db.execute("SELECT id FROM t", None, QueryOptions::new().offset(40)).await.unwrap();
        db.execute("SELECT id FROM t LIMIT 5", None, QueryOptions::new()).await.unwrap();
        db.execute("UPDATE t SET x = 1", None, QueryOptions::new()).await.unwrap();
        db.execute("CALL refresh()", None, QueryOptions::new()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "SELECT id FROM t LIMIT 20 OFFSET 40",
                "SELECT id FROM t LIMIT 5",
                "UPDATE t SET x = 1",
                "CALL refresh()",
            ]
        );
    }

    #[tokio::test]
    async fn test_paging_per_call_and_bare_offset() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = build(json!({"dialect": "mssql", "uri": "mssql://sa@db/app"}), &log);

        db.execute("SELECT id FROM t", None, QueryOptions::new().page_size(10).offset(20)).await.unwrap();
        db.execute("SELECT id FROM t ORDER BY id", None, QueryOptions::new().offset(5)).await.unwrap();
        db.execute("SELECT id FROM t", None, QueryOptions::new()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "SELECT id FROM t ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY",
                "SELECT id FROM t ORDER BY id OFFSET 5 ROWS",
                "SELECT id FROM t",
            ]
        );
    }

    #[tokio::test]
    async fn test_paging_without_page_size_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = build(pg(), &log);
        let err = db
            .execute("SELECT id FROM t", None, QueryOptions { page_size: Some(0), ..QueryOptions::new() })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PAGING_ERROR");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sorter_only_without_order_by() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = Database::builder(pg())
            .execution_handler(recorder(Arc::clone(&log)))
            .sorter(|q| format!("{q} ORDER BY id DESC"))
            .build()
            .unwrap();

        db.execute("SELECT id FROM t", None, QueryOptions::new().page_size(2)).await.unwrap();
        db.execute("SELECT id FROM t ORDER BY name", None, QueryOptions::new()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["SELECT id FROM t ORDER BY id DESC LIMIT 2 OFFSET 0", "SELECT id FROM t ORDER BY name"]
        );
    }

    #[tokio::test]
    async fn test_sanitizers_and_handlers() {
        let seen = Arc::new(Mutex::new(Params::new()));
        let seen_in_handler = Arc::clone(&seen);
        let mut db = Database::builder(pg())
            .sanitizer(crate::handlers::trim_strings())
            .result_handler(single_row(true))
            .execution_handler(move |_query, params, _fetch| {
                *seen_in_handler.lock().unwrap() = params.clone();
                Ok(ResultSet::new(vec!["n".to_string()], vec![vec![json!(1)]]))
            })
            .build()
            .unwrap();

        let upper: Sanitizer = Arc::new(|v| match v {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        });
        let p = params([("name", json!("  ada "))]);
        let out = db
            .execute("SELECT n FROM t WHERE name = :name", Some(&p), QueryOptions::new().sanitizer(upper))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap()["name"], json!("ADA"));
        assert_eq!(out, QueryOutput::Data(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_write_success_message() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut db = build(pg(), &log);
        let out = db.execute("DELETE FROM t", None, QueryOptions::new()).await.unwrap();
        assert_eq!(out, QueryOutput::Data(json!({"message": "success", "rows_affected": 2})));

        let mut db = Database::builder(pg())
            .execution_handler(recorder(Arc::clone(&log)))
            .success_handler(|_query, n| json!(format!("{n} rows changed")))
            .build()
            .unwrap();
        let out = db.execute("INSERT INTO t VALUES (1)", None, QueryOptions::new()).await.unwrap();
        assert_eq!(out.into_value(), json!("2 rows changed"));
    }

    #[tokio::test]
    async fn test_error_handler() {
        let mut db = Database::builder(pg())
            .execution_handler(|_q, _p, _f| Err(FacadeError::query_failed("boom")))
            .error_handler(|err| Ok(QueryOutput::Data(json!({"error": err.error_code()}))))
            .build()
            .unwrap();
        let out = db.execute("SELECT 1", None, QueryOptions::new()).await.unwrap();
        assert_eq!(out, QueryOutput::Data(json!({"error": "QUERY_FAILED"})));
    }

    #[tokio::test]
    async fn test_execute_sp_templates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = params([("id", json!(1)), ("flag", json!(true))]);

        let mut db = build(pg(), &log);
        db.execute_sp("refresh_user", Some(&p), 0).await.unwrap();
        let mut db = build(json!({"dialect": "mssql", "uri": "mssql://sa@db/app"}), &log);
        db.execute_sp("dbo.refresh_user", Some(&p), 0).await.unwrap();
        let mut db = build(json!({"dialect": "oracle", "uri": "oracle://u@db/app"}), &log);
        db.execute_sp("pkg.refresh_user", None, 0).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "CALL refresh_user(:id, :flag)",
                "EXEC dbo.refresh_user @id=:id, @flag=:flag",
                "BEGIN pkg.refresh_user(); END;",
            ]
        );

        let mut db = build(json!({"dialect": "sqlite", "path": "a.db"}), &log);
        let err = db.execute_sp("anything", None, 0).await.unwrap_err();
        assert!(err.message().contains("SQLite does not support stored procedures."));
    }

    #[test]
    fn test_session_shares_config_not_connection() {
        let db = Database::builder(pg()).page_size(7).build().unwrap();
        let session = db.session();
        assert_eq!(session.page_size(), 7);
        assert_eq!(session.config(), db.config());
        assert!(!session.is_connected());
    }

    #[test]
    fn test_output_into_value() {
        let rs = ResultSet::new(vec!["a".to_string()], vec![vec![json!(1)]]);
        assert_eq!(
            QueryOutput::Tuple(json!([]), rs.clone()).into_value(),
            json!({"data": [], "result": {"columns": ["a"], "rows": [[1]]}})
        );
        assert_eq!(QueryOutput::Object(rs).into_value(), json!({"columns": ["a"], "rows": [[1]]}));
    }
}
