//! Error types for stencil-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a session store handle.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested session does not exist in the store.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// Iterator name not known to the session model.
    #[error("invalid value for iterator: {name}. Valid values: {valid}")]
    UnknownIterator { name: String, valid: String },

    /// Underlying I/O failure with annotated path.
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored session file could not be parsed.
    #[error("failed to parse session at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The store could not be opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading generation manifests.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure with annotated path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest JSON is malformed: includes file path and serde_json context.
    #[error("failed to parse manifest at {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The manifest file did not exist at the expected path.
    #[error("manifest not found at {path}")]
    ManifestNotFound { path: PathBuf },

    /// An error from the session store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
