//! Error taxonomy shared by every Ferry crate.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Local open/read/write/rename failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial or write failure on the transport.
    #[error("connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key length: expected 16, 24 or 32 bytes, got {0}")]
    Key(usize),

    #[error("encrypted stream truncated: need {expected} IV bytes, got {got}")]
    TruncatedStream { expected: usize, got: usize },

    /// Merge was handed chunk indices that are not exactly `0..n`.
    #[error("chunk order violation: expected index {expected}, found {found}")]
    OrderViolation { expected: usize, found: usize },

    #[error("conflict at {}: {reason}", path.display())]
    Conflict { path: PathBuf, reason: String },

    #[error("digest mismatch for {}: expected {expected}, got {actual}", path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("protocol handler error: {0}")]
    Protocol(String),

    #[error("{} has no dependency on {}", path.display(), dependency.display())]
    Dependency { path: PathBuf, dependency: PathBuf },
}

impl Error {
    /// Wrap a transport failure with the endpoint it was talking to.
    pub fn connection(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn conflict(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short taxonomy name, used as the `status` field in transfer logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Connection { .. } => "connection",
            Self::Key(_) => "key",
            Self::TruncatedStream { .. } => "truncated_stream",
            Self::OrderViolation { .. } => "order_violation",
            Self::Conflict { .. } => "conflict",
            Self::DigestMismatch { .. } => "digest_mismatch",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Protocol(_) => "protocol",
            Self::Dependency { .. } => "dependency",
        }
    }
}
