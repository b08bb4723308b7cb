//! dbfacade CLI Entry Point
//!
//! Subcommands:
//! - `validate` - Check a configuration document against the database models
//! - `uri` - Print the (redacted) connection string of the resolved database
//! - `page` - Render a paged query for the resolved dialect without connecting
//! - `query` - Execute a raw SQL statement
//! - `call` - Call a stored procedure
//!
//! All output to stdout is one JSON envelope. Logs go to stderr (`RUST_LOG` overrides
//! the level chosen by `--verbose`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use dbfacade::config::{get_default_db_config, DbModel};
use dbfacade::{
    load_config, validate_db_model, Database, ErrorEnvelope, FacadeError, Metadata, Params,
    QueryOptions, SuccessEnvelope,
};

/// dbfacade - Configuration-driven database façade
#[derive(Parser)]
#[command(name = "dbfacade")]
#[command(about = "Run raw SQL against databases described by a configuration file")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, YAML or TOML); defaults to $DBFACADE_CONFIG, then
    /// .dbfacade/config.* and the user config directory
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Database entry to use from a multi-database configuration
    #[arg(long, short, global = true)]
    name: Option<String>,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// Print the connection string with the password masked
    Uri,

    /// Render a paged query without executing it
    Page {
        /// SQL query
        sql: String,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Page size (defaults to paging.page_size)
        #[arg(long)]
        page_size: Option<u64>,
    },

    /// Execute a SQL statement
    Query {
        /// SQL statement with :name placeholders
        sql: String,

        /// Parameter as name=value; values are parsed as JSON, falling back to text
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Rows to fetch (0 for all)
        #[arg(long, default_value_t = 0)]
        fetch: usize,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Page the query with this page size
        #[arg(long)]
        page_size: Option<u64>,

        /// Commit before closing (otherwise uncommitted work is rolled back)
        #[arg(long)]
        commit: bool,
    },

    /// Call a stored procedure
    Call {
        /// Procedure name, optionally schema qualified
        procedure: String,

        /// Parameter as name=value; values are parsed as JSON, falling back to text
        #[arg(long = "param", short = 'p', value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Rows to fetch (0 for all)
        #[arg(long, default_value_t = 0)]
        fetch: usize,

        /// Commit before closing
        #[arg(long)]
        commit: bool,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Uri => "uri",
            Self::Page { .. } => "page",
            Self::Query { .. } => "query",
            Self::Call { .. } => "call",
        }
    }
}

fn parse_param(raw: &str) -> anyhow::Result<(String, Value)> {
    let (name, value) = raw.split_once('=').context("parameters must look like name=value")?;
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "parameter name is empty in '{raw}'");

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Command data and the number of rows it touched
struct Outcome {
    data: Value,
    rows: Option<u64>,
}

impl Outcome {
    fn data(data: Value) -> Self {
        Self { data, rows: None }
    }
}

fn validate(path: PathBuf, config: &Value, dialect: &mut String) -> dbfacade::Result<Outcome> {
    let data = match validate_db_model(config)? {
        DbModel::Single(db) => {
            *dialect = db.dialect.to_string();
            json!({"path": path, "model": "single", "databases": []})
        }
        DbModel::Multi(multi) => {
            if let Some((_, db)) = get_default_db_config(&multi).or_else(|| multi.first()) {
                *dialect = db.dialect.to_string();
            }
            json!({
                "path": path,
                "model": "multi",
                "databases": multi.names(),
                "default": get_default_db_config(&multi).map(|(name, _)| name),
            })
        }
    };
    Ok(Outcome::data(data))
}

fn open(cli: &Cli, config: Value, dialect: &mut String) -> dbfacade::Result<Database> {
    let mut builder = Database::builder(config);
    if let Some(name) = &cli.name {
        builder = builder.name(name);
    }
    let db = builder.build()?;
    *dialect = db.dialect().to_string();
    Ok(db)
}

async fn run(cli: &Cli, dialect: &mut String) -> dbfacade::Result<Outcome> {
    let (path, config) = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Validate => validate(path, &config, dialect),
        Commands::Uri => {
            let db = open(cli, config, dialect)?;
            Ok(Outcome::data(json!({"name": db.name(), "uri": db.redacted_uri()?})))
        }
        Commands::Page { sql, offset, page_size } => {
            let db = open(cli, config, dialect)?;
            Ok(Outcome::data(json!({"sql": db.page(sql, *offset, *page_size)?})))
        }
        Commands::Query { sql, params, fetch, offset, page_size, commit } => {
            let mut db = open(cli, config, dialect)?;
            let params: Params = params.iter().cloned().collect();
            let mut options = QueryOptions::new().fetch(*fetch).offset(*offset);
            options.page_size = *page_size;

            let output = db.execute(sql, Some(&params), options).await;
            finish(&mut db, output, *commit).await
        }
        Commands::Call { procedure, params, fetch, commit } => {
            let mut db = open(cli, config, dialect)?;
            let params: Params = params.iter().cloned().collect();
            let output = db.execute_sp(procedure, Some(&params), *fetch).await;
            finish(&mut db, output, *commit).await
        }
    }
}

/// Commit when asked, close the connection, and report the first error
async fn finish(
    db: &mut Database,
    output: dbfacade::Result<dbfacade::QueryOutput>,
    commit: bool,
) -> dbfacade::Result<Outcome> {
    let committed = match (&output, commit) {
        (Ok(_), true) => db.commit().await,
        _ => Ok(()),
    };
    let rows = db.result().map(dbfacade::ResultSet::row_count);
    let closed = db.close().await;

    let output = output?;
    committed?;
    closed?;

    Ok(Outcome { data: output.into_value(), rows })
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn print_error(dialect: &str, command: &str, err: &FacadeError) -> anyhow::Result<()> {
    let envelope = ErrorEnvelope::from_error(dialect, command, err);
    println!("{}", serde_json::to_string(&envelope).context("serializing error envelope")?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let started = Instant::now();
    let command = cli.command.name();
    let mut dialect = String::new();

    match run(&cli, &mut dialect).await {
        Ok(outcome) => {
            let elapsed = started.elapsed().as_millis() as u64;
            let meta = match outcome.rows {
                Some(rows) => Metadata::with_rows(elapsed, rows),
                None => Metadata::new(elapsed),
            };
            let envelope = SuccessEnvelope::new(dialect, command, outcome.data, meta);
            println!("{}", serde_json::to_string(&envelope).context("serializing output")?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(code = err.error_code(), "{command} failed");
            print_error(&dialect, command, &err)?;
            Ok(ExitCode::FAILURE)
        }
    }
}
