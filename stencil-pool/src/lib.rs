//! # stencil-pool
//!
//! Parallel rendering over a fixed set of isolated worker runtimes.
//!
//! - [`runtime`]: [`WorkerRuntime`] lifecycle, lazy per-session initialization
//! - [`coordinator`]: [`WorkerPool`] batch dispatch, ordering, timeouts
//! - [`config`]: [`PoolConfig`] and the read-only [`SharedConfig`]
//! - [`error`]: [`PoolError`], [`JobError`], [`InitError`]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod runtime;
mod stats;

pub use config::{PoolConfig, SharedConfig, SharedConfigBuilder};
pub use coordinator::{RenderResult, WorkerPool};
pub use error::{InitError, JobError, PoolError};
pub use runtime::{Rendered, RuntimeState, WorkerRuntime};
pub use stats::PoolStats;
