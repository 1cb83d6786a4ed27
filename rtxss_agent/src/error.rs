//! Error taxonomy for the agent core.
//!
//! Invocation and parse errors never leave the sampler: they become `status`
//! events. Control errors are returned to the HTTP caller as-is so the message
//! tells the user what to do.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Non-zero exit, empty stdout, or the process could not be spawned
    /// (`exit_code` is `None` when there was no exit status).
    /// `stdout` is kept so a caller may still try to salvage it.
    #[error("command failed (exit code {}): {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
        stdout: String,
    },
}

impl InvocationError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Timeout { .. } => "timeout",
            InvocationError::ProcessFailed { .. } => "process_failed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("schema mismatch in {record} record: expected {expected} fields, found {found}")]
    SchemaMismatch {
        record: &'static str,
        expected: usize,
        found: usize,
    },
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::SchemaMismatch { .. } => "schema_mismatch",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// `value` is the requested wattage as received, which may not be a number at all.
    #[error("{value} is not a supported power limit (allowed: {allowed} W)")]
    InvalidValue { value: String, allowed: String },

    #[error("permission denied setting power limit; run the agent with elevated privileges ({detail})")]
    PermissionDenied { detail: String },

    #[error("failed to set power limit: {0}")]
    InvocationFailed(InvocationError),
}

impl ControlError {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::InvalidValue { .. } => "invalid_value",
            ControlError::PermissionDenied { .. } => "permission_denied",
            ControlError::InvocationFailed(_) => "invocation_failed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("update interval must be between {min}ms and {max}ms (got {got})")]
    IntervalOutOfRange { got: i64, min: u64, max: u64 },

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("missing value for {0}")]
    MissingValue(String),
}
