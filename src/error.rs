//! Error taxonomy for the engine.

use std::path::PathBuf;

/// Result alias used by the public mediadex API.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors. Per-file I/O failures during a scan are recovered locally
/// (logged, counted, skipped) and never reach callers through this type;
/// state-machine violations are rejected synchronously with
/// [`EngineError::AlreadyInProgress`] / [`EngineError::InvalidState`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("scan already in progress for library '{0}'")]
    AlreadyInProgress(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("extraction failed: {0}")]
    Extract(String),
}

impl EngineError {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
