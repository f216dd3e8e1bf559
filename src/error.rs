//! Error types for the deploy host.
//!
//! Every per-connection failure ends up as a [`HostError`] inside a
//! `FileOutcome`; only bind and configuration errors leave `DeployHost::start`.

use std::io;
use std::path::PathBuf;

use crate::host::remote::TransformMode;

pub type Result<T> = std::result::Result<T, HostError>;

/// Coarse grouping of [`HostError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    /// Envelope is not UTF-8 JSON of the expected shape
    Envelope,
    Transform,
    Decompression,
    ValidationRejected,
    Filesystem,
    Bind,
    Config,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { expected: usize, received: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{mode} transformer failed: {cause:#}")]
    Transform {
        mode: TransformMode,
        cause: anyhow::Error,
    },

    #[error("failed to decompress file data: {0}")]
    Decompression(#[source] io::Error),

    #[error("invalid envelope: {0}")]
    Envelope(String),

    #[error("file '{name}' was rejected by the validator")]
    Rejected { name: String },

    #[error("validator failed for '{name}': {cause:#}")]
    Validation { name: String, cause: anyhow::Error },

    #[error("'{}' is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("path '{0}' escapes the root directory")]
    PathEscapesRoot(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("listener task failed: {0}")]
    Shutdown(String),
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::ConnectionClosed { .. } | HostError::Protocol(_) => ErrorKind::Protocol,
            HostError::Envelope(_) => ErrorKind::Envelope,
            HostError::Transform { .. } => ErrorKind::Transform,
            HostError::Decompression(_) => ErrorKind::Decompression,
            HostError::Rejected { .. } | HostError::Validation { .. } => {
                ErrorKind::ValidationRejected
            }
            HostError::NotAFile(_)
            | HostError::NotADirectory(_)
            | HostError::PathEscapesRoot(_)
            | HostError::Io { .. } => ErrorKind::Filesystem,
            HostError::Bind { .. } => ErrorKind::Bind,
            HostError::Shutdown(_) => ErrorKind::Shutdown,
            HostError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for an explicit validator "no", which is not a failure of the host.
    pub fn is_rejection(&self) -> bool {
        matches!(self, HostError::Rejected { .. })
    }
}
