//! Error types for stencil-renderer.

use std::borrow::Borrow;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stencil_core::{PackageId, StoreError};

/// A template source could not be parsed. Fatal to that package's jobs only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error(
    "template syntax error in {}{}: {message}",
    .path.display(),
    location(.line, .column)
)]
pub struct TemplateSyntaxError {
    pub path: PathBuf,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub message: String,
}

/// ` [line: L, column: C]` when both coordinates are known, otherwise empty.
fn location<P: Borrow<Option<usize>>>(line: P, column: P) -> String {
    match (*line.borrow(), *column.borrow()) {
        (Some(line), Some(column)) => format!(" [line: {line}, column: {column}]"),
        _ => String::new(),
    }
}

/// An external helper module failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("helper module '{module}' failed to load: {reason}")]
pub struct HelperLoadError {
    pub module: String,
    pub reason: String,
}

/// All errors that can arise from compiling or producing content.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Compile-time failure.
    #[error(transparent)]
    Syntax(#[from] TemplateSyntaxError),

    /// Execution-time failure of one template.
    #[error("failed to render package {package} ({path}): {message}")]
    Execution {
        package: PackageId,
        path: PathBuf,
        message: String,
    },

    /// Helper registration failure.
    #[error(transparent)]
    HelperLoad(#[from] HelperLoadError),

    /// Session store failure while building the context.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The engine rejected the render context or failed outside a template.
    #[error("template engine error: {0}")]
    Engine(#[from] tera::Error),

    /// JSON serialization error (building the render context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An override file could not be parsed.
    #[error("failed to parse override file {path}: {source}")]
    Override {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Filesystem error while reading template sources.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

/// Flatten an error and its sources into one message.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Extract `line:column` from an engine parse message (` --> 3:7`).
pub(crate) fn parse_location(message: &str) -> (Option<usize>, Option<usize>) {
    let Some(pos) = message.find("--> ") else {
        return (None, None);
    };
    let rest = &message[pos + 4..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == ':'))
        .unwrap_or(rest.len());
    let mut parts = rest[..end].split(':');
    let line = parts.next().and_then(|s| s.parse().ok());
    let column = parts.next().and_then(|s| s.parse().ok());
    (line, column)
}
