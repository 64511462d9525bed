//! Error types for the sandbox host
//!
//! Only failures of the host itself surface as `SandboxError`: a script engine
//! that cannot boot, a worker thread that died, a configuration file that does
//! not parse. Anything the executed snippet does wrong is folded into the
//! transcript instead and never reaches this type.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Script engine error: {0}")]
    Engine(String),
    #[error("Engine protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("Execution worker failed: {0}")]
    Worker(String),
    #[error("Lifecycle violation: cannot move from {from} to {to}")]
    Lifecycle { from: String, to: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio::task::JoinError> for SandboxError {
    fn from(err: tokio::task::JoinError) -> Self {
        SandboxError::Worker(err.to_string())
    }
}

/// Failure classes of an executed snippet.
///
/// All of them collapse into one error line plus `had_error`; the kind is kept
/// on the result for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// The source text is not syntactically valid.
    Compile,
    /// An exception escaped the synchronous run.
    Runtime,
    /// A timer or microtask callback threw during the flush window.
    Late,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
