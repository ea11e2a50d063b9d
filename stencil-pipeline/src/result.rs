//! Structured generation results.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stencil_core::{Content, Fragment, PackageId, SessionId};
use stencil_pool::JobError;
use stencil_renderer::HelperCollision;

/// One failed job (or failed expansion, with no index) of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub index: Option<usize>,
    /// Iteration key of the failed job, when iterated.
    pub iteration: Option<String>,
    pub error: JobError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PackageOutcome {
    Success {
        fragments: Content,
    },
    /// Some iteration jobs failed; fragments hold the successful ones.
    Partial {
        fragments: Content,
        failures: Vec<JobFailure>,
    },
    Failed {
        failures: Vec<JobFailure>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageResult {
    pub package_id: PackageId,
    pub category: String,
    pub path: PathBuf,
    /// Jobs the package expanded into.
    pub jobs: usize,
    pub outcome: PackageOutcome,
}

impl PackageResult {
    pub fn fragments(&self) -> &[Fragment] {
        match &self.outcome {
            PackageOutcome::Success { fragments } | PackageOutcome::Partial { fragments, .. } => {
                fragments
            }
            PackageOutcome::Failed { .. } => &[],
        }
    }

    pub fn failures(&self) -> &[JobFailure] {
        match &self.outcome {
            PackageOutcome::Success { .. } => &[],
            PackageOutcome::Partial { failures, .. } | PackageOutcome::Failed { failures } => {
                failures
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PackageOutcome::Success { .. })
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.outcome, PackageOutcome::Partial { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PackageOutcome::Failed { .. })
    }

    pub fn status_label(&self) -> &'static str {
        match self.outcome {
            PackageOutcome::Success { .. } => "success",
            PackageOutcome::Partial { .. } => "partial",
            PackageOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything one `generate` call produced, packages in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub session_id: SessionId,
    pub generated_at: DateTime<Utc>,
    pub packages: Vec<PackageResult>,
    /// Helper collisions seen while initializing runtimes, de-duplicated.
    pub helper_diagnostics: Vec<HelperCollision>,
    pub duration_ms: u64,
}

impl GenerationResult {
    pub fn package(&self, id: &PackageId) -> Option<&PackageResult> {
        self.packages.iter().find(|p| &p.package_id == id)
    }

    pub fn has_failures(&self) -> bool {
        self.packages.iter().any(|p| !p.is_success())
    }

    /// Counts of (success, partial, failed) packages.
    pub fn summary(&self) -> (usize, usize, usize) {
        self.packages.iter().fold((0, 0, 0), |(s, p, f), pkg| match pkg.outcome {
            PackageOutcome::Success { .. } => (s + 1, p, f),
            PackageOutcome::Partial { .. } => (s, p + 1, f),
            PackageOutcome::Failed { .. } => (s, p, f + 1),
        })
    }
}
