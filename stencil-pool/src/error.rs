use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stencil_core::{PackageId, StoreError};
use stencil_renderer::{HelperLoadError, RenderError, TemplateSyntaxError};

use crate::runtime::RuntimeState;

/// Error surface for pool construction and batch dispatch.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse pool config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate job index {0} in batch")]
    DuplicateIndex(usize),

    #[error("worker pool has been shut down")]
    ShutDown,

    #[error("job queue closed")]
    QueueClosed,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PoolError {
    PoolError::Io {
        path: path.into(),
        source,
    }
}

/// A worker runtime could not reach `Ready`.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    #[error(transparent)]
    HelperLoad(#[from] HelperLoadError),

    #[error("store unavailable: {0}")]
    Store(String),

    #[error(transparent)]
    Partial(TemplateSyntaxError),

    #[error("runtime {id} is {state:?} and cannot accept jobs")]
    Unavailable { id: usize, state: RuntimeState },
}

impl From<StoreError> for InitError {
    fn from(err: StoreError) -> Self {
        InitError::Store(err.to_string())
    }
}

/// Failure of a single job. Never propagates to sibling jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    #[error("{error}")]
    TemplateSyntax { error: TemplateSyntaxError },

    #[error("render failed for package {package}: {message}")]
    Render { package: PackageId, message: String },

    #[error("{error}")]
    HelperLoad { error: HelperLoadError },

    #[error("job timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("store error: {message}")]
    Store { message: String },

    #[error("dispatch failed: {message}")]
    Dispatch { message: String },
}

impl JobError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout { .. })
    }
}

impl From<RenderError> for JobError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Syntax(error) => JobError::TemplateSyntax { error },
            RenderError::Execution { package, message, .. } => JobError::Render { package, message },
            RenderError::HelperLoad(error) => JobError::HelperLoad { error },
            RenderError::Store(e) => JobError::Store {
                message: e.to_string(),
            },
            RenderError::Engine(e) => JobError::Dispatch {
                message: stencil_renderer::error_chain(&e),
            },
            other => JobError::Dispatch {
                message: other.to_string(),
            },
        }
    }
}

impl From<InitError> for JobError {
    fn from(err: InitError) -> Self {
        match err {
            InitError::HelperLoad(error) => JobError::HelperLoad { error },
            InitError::Store(message) => JobError::Store { message },
            InitError::Partial(error) => JobError::TemplateSyntax { error },
            other @ InitError::Unavailable { .. } => JobError::Dispatch {
                message: other.to_string(),
            },
        }
    }
}
