//! Error types for tracepad-core.

use thiserror::Error;

/// Result type for tracepad-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tracepad-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The script failed to parse. Carries the first parser diagnostic.
    /// `line` is 1-based, `column` is a 0-based character offset.
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Toolchain error (no toolchain found, unusable executable).
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Dependency restore or project synthesis failed.
    #[error("build error: {0}")]
    Build(String),

    /// A child process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Console protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] tracepad::ProtocolError),

    /// JSON error outside the console protocol (cargo/rustc messages).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid operation (e.g., executing on a host that was shut down).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
