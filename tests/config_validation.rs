//! Configuration Validation Tests
//!
//! Loads configuration documents from every supported file format and checks that
//! validation failures reach callers (and the CLI error envelope) with every problem
//! and its location.

use dbfacade::config::{load_config_file, MULTI_MODEL, SINGLE_MODEL};
use dbfacade::{validate_db_model, Database, DbModel, Dialect, ErrorEnvelope, FacadeError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_same_document_in_every_format() {
    let dir = TempDir::new().unwrap();
    let files = [
        write(
            &dir,
            "config.json",
            r#"{"dialect": "postgresql", "connection_params": {"host": "db", "user": "app", "database": "orders"}}"#,
        ),
        write(
            &dir,
            "config.yaml",
            "dialect: postgresql\nconnection_params:\n  host: db\n  user: app\n  database: orders\n",
        ),
        write(
            &dir,
            "config.toml",
            "dialect = \"postgresql\"\n\n[connection_params]\nhost = \"db\"\nuser = \"app\"\ndatabase = \"orders\"\n",
        ),
    ];

    for file in files {
        let value = load_config_file(&file).unwrap();
        let DbModel::Single(config) = validate_db_model(&value).unwrap() else {
            panic!("{} should hold a single database", file.display());
        };
        assert_eq!(config.dialect, Dialect::PostgreSQL);
        assert_eq!(config.uri().unwrap(), "postgresql://app@db:5432/orders");
    }
}

#[test]
fn test_toml_multi_database() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "config.toml",
        r#"
[db.reporting]
dialect = "mysql"
uri = "mysql://report@replica/sales"

[db.primary]
dialect = "mysql"
uri = "mysql://app@primary/sales"
default = true
"#,
    );

    let value = load_config_file(&file).unwrap();
    let db = Database::builder(value.clone()).build().unwrap();
    assert_eq!(db.name(), Some("primary"));

    let db = Database::builder(value).name("reporting").build().unwrap();
    assert_eq!(db.uri().unwrap(), "mysql://report@replica/sales");
}

#[test]
fn test_every_problem_is_reported() {
    let config = json!({
        "dialect": "mysql",
        "paging": {"enabled": true},
        "use_odbc": true
    });

    let err = Database::builder(config).build().unwrap_err();
    let FacadeError::Validation(errors) = &err else { panic!("expected a validation error") };

    let single: Vec<String> =
        errors.errors_for(SINGLE_MODEL).unwrap().iter().map(|e| e.location()).collect();
    assert_eq!(single, vec!["paging -> page_size", "Root", "connection_params", "driver"]);
    assert!(errors.errors_for(MULTI_MODEL).is_some());

    let message = err.message();
    assert!(message.starts_with("The config does not match the model."));
    assert!(message.contains("Model: 'DatabaseModel':"));
    assert!(message.contains("Model: 'MultiDatabaseModel':"));
    assert!(message.contains(" - Location: paging -> page_size"));
}

#[test]
fn test_multi_entry_errors_are_prefixed() {
    let config = json!({
        "good": {"dialect": "sqlite", "path": "good.db"},
        "bad": {"dialect": "sqlite"},
        "worse": "not a mapping"
    });

    let err = validate_db_model(&config).unwrap_err();
    let locations: Vec<String> =
        err.errors_for(MULTI_MODEL).unwrap().iter().map(|e| e.location()).collect();
    assert_eq!(locations, vec!["bad -> path", "worse"]);
}

#[test]
fn test_validation_error_envelope() {
    let err = Database::builder(json!({"dialect": "sqlite"})).build().unwrap_err();
    let envelope = ErrorEnvelope::from_error("", "validate", &err);
    let value = serde_json::to_value(&envelope).unwrap();

    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["dialect"], json!(""));
    assert_eq!(value["error"]["code"], json!("VALIDATION_ERROR"));
    assert!(value["error"]["message"].as_str().unwrap().contains("Location: path"));
}

#[test]
fn test_password_from_environment() {
    std::env::set_var("DBFACADE_TEST_ORDERS_PASSWORD", "s3cr:t");
    let db = Database::builder(json!({
        "dialect": "postgresql",
        "connection_params": {
            "host": "db",
            "username": "app",
            "password_env": "DBFACADE_TEST_ORDERS_PASSWORD",
            "database": "orders"
        }
    }))
    .build()
    .unwrap();

    assert_eq!(db.uri().unwrap(), "postgresql://app:s3cr%3At@db:5432/orders");
    assert_eq!(db.redacted_uri().unwrap(), "postgresql://app:***@db:5432/orders");
}
