//! JSON Output Envelope Types
//!
//! The CLI prints one envelope per invocation on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "dialect": "...", "command": "...", "data": ..., "meta": {...}}`
//! - Error: `{"ok": false, "dialect": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `dialect` is empty when the failure happened before a configuration was resolved.

use serde::{Deserialize, Serialize};

use crate::error::FacadeError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Dialect of the resolved database
    pub dialect: String,

    /// Command that was executed (validate, uri, query, call)
    pub command: String,

    /// Command-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(
        dialect: impl Into<String>,
        command: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self { ok: true, dialect: dialect.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub dialect: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(dialect: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, dialect: dialect.into(), command: command.into(), error }
    }

    /// Build the envelope for a [`FacadeError`]
    pub fn from_error(
        dialect: impl Into<String>,
        command: impl Into<String>,
        err: &FacadeError,
    ) -> Self {
        Self::new(dialect, command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `VALIDATION_ERROR`, `PAGING_ERROR`)
    pub code: String,

    /// Human-readable message (no credentials)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Rows returned or affected (omitted for commands that do not touch rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
}

impl Metadata {
    #[must_use]
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows: None }
    }

    #[must_use]
    pub fn with_rows(execution_ms: u64, rows: u64) -> Self {
        Self { execution_ms, rows: Some(rows) }
    }
}
