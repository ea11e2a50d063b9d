//! Error types for stencil-pipeline.

use thiserror::Error;

use stencil_core::{CoreError, StoreError};
use stencil_pool::PoolError;
use stencil_renderer::RenderError;

/// Batch-level failures. Per-job failures are reported inside
/// [`GenerationResult`](crate::GenerationResult) instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("manifest error: {0}")]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("render setup error: {0}")]
    Render(#[from] RenderError),

    #[error("planning task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
