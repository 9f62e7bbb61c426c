//! Error types for the tbctl reconciler
//!
//! This module defines all error types used throughout the crate.

use std::fmt;
use thiserror::Error;

use crate::backend::BackendKind;

/// Result type alias for tbctl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a backend connectivity check failed
///
/// The three cases are reported separately so an operator can tell
/// "the relation has not supplied enough data yet" apart from
/// "the database refused us" and "the database answered badly".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityFailureKind {
    /// Connection info is present but incomplete or malformed
    FieldsMissing,
    /// The connection attempt itself failed
    ConnectFailed,
    /// Connected, but the schema query failed
    QueryFailed,
}

impl fmt::Display for ConnectivityFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldsMissing => f.write_str("fields missing"),
            Self::ConnectFailed => f.write_str("connect failed"),
            Self::QueryFailed => f.write_str("query failed"),
        }
    }
}

/// Core error type for tbctl
#[derive(Error, Debug)]
pub enum Error {
    /// Required relation fields are absent
    #[error("{backend} connection data unavailable: missing {}", .missing.join(", "))]
    BindingUnavailable {
        /// Backend whose relation is incomplete
        backend: BackendKind,
        /// Names of the missing fields
        missing: Vec<String>,
    },

    /// More than one backend is eligible at the same time
    #[error("Both PostgreSQL and Cassandra relations are present; remove one of them")]
    BackendConflict,

    /// Backend connection info is present but the check failed
    #[error("{backend} connectivity check failed ({kind}): {message}")]
    Connectivity {
        /// Backend that failed the check
        backend: BackendKind,
        /// Failure category
        kind: ConnectivityFailureKind,
        /// Detail from the driver or probe
        message: String,
    },

    /// Install command exited unsuccessfully
    #[error("Install failed: `{command}` exited with {}", exit_label(.code))]
    Install {
        /// Command line that was run
        command: String,
        /// Exit code, `None` if killed by a signal
        code: Option<i32>,
    },

    /// First-run bootstrap command exited unsuccessfully
    #[error("Bootstrap failed: `{command}` exited with {}", exit_label(.code))]
    Bootstrap {
        /// Command line that was run
        command: String,
        /// Exit code, `None` if killed by a signal
        code: Option<i32>,
    },

    /// Template or configuration write error
    #[error("Render error: {0}")]
    Render(String),

    /// Persisted context store errors
    #[error("Context store error: {0}")]
    ContextStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Condition prerequisite violation
    #[error("Condition error: {0}")]
    Condition(String),

    /// Managed service or port manager failure
    #[error("Service error: {0}")]
    Service(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl Error {
    /// Create a binding-unavailable error
    pub fn binding_unavailable<I, S>(backend: BackendKind, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::BindingUnavailable {
            backend,
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a connectivity error
    pub fn connectivity(
        backend: BackendKind,
        kind: ConnectivityFailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Connectivity {
            backend,
            kind,
            message: message.into(),
        }
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create a context store error
    pub fn context_store(msg: impl Into<String>) -> Self {
        Self::ContextStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a condition error
    pub fn condition(msg: impl Into<String>) -> Self {
        Self::Condition(msg.into())
    }

    /// Create a service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error only means "not ready yet"
    ///
    /// Such errors leave the unit blocked without being reported as a
    /// failed step; the next externally triggered pass simply tries again.
    pub fn is_blocking_only(&self) -> bool {
        matches!(
            self,
            Self::BindingUnavailable { .. } | Self::BackendConflict | Self::Connectivity { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
