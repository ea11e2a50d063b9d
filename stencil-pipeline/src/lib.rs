//! # stencil-pipeline
//!
//! Pipeline driver for stencil generation: turns template packages into
//! render jobs, runs them on a [`stencil_pool::WorkerPool`], and returns a
//! [`GenerationResult`] that separates successful, partially successful and
//! failed packages. Performs no file I/O on generated output.

pub mod driver;
pub mod error;
pub mod preview;
pub mod result;

pub use driver::{GenerateOptions, Generator};
pub use error::PipelineError;
pub use preview::{page, page_of, Page, DEFAULT_LINES_PER_PAGE};
pub use result::{GenerationResult, JobFailure, PackageOutcome, PackageResult};
