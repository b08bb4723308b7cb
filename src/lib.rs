//! dbfacade - Configuration-Driven Database Façade
//!
//! dbfacade turns a declarative configuration document (one database or several named
//! ones) into a connected façade for running raw SQL against `PostgreSQL`, `MySQL`,
//! `MariaDB` and `SQLite`, with SQL templating for SQL Server and Oracle as well.
//!
//! # Core Principles
//! - Raw SQL with named parameters (`:name`), never interpolated
//! - Configuration is validated up front with every problem reported at once
//! - Dialect differences (paging, stored procedure calls) are handled by templates
//! - Lazy transactions, explicit or automatic commits
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`config`] - Configuration models, validation and file loading
//! - [`dialect`] - Dialects, paging and stored procedure templates
//! - [`sql`] - Query inspection and named parameter binding
//! - [`engine`] - Database engine trait and driver implementations
//! - [`handlers`] - Result handlers and parameter sanitizers
//! - [`database`] - The database façade
//! - [`output`] - JSON output envelopes used by the CLI

pub mod config;
pub mod database;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod output;
pub mod sql;

// Re-export commonly used types for convenience
pub use config::{
    load_config, redact_uri, validate_db_model, ConfigLocation, DatabaseConfig, DbModel,
    FetchReturn, ModelValidationErrors, MultiDatabaseConfig,
};
pub use database::{Database, DatabaseBuilder, QueryOptions, QueryOutput};
pub use dialect::Dialect;
pub use engine::{Connection, DatabaseEngine, ResultSet};
pub use error::{FacadeError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use sql::{params, Params};
