//! Pool-wide counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub runtimes_created: AtomicUsize,
    pub initializations: AtomicUsize,
    pub init_failures: AtomicUsize,
    pub compiles: AtomicUsize,
    pub jobs_completed: AtomicUsize,
    pub jobs_failed: AtomicUsize,
    pub runtimes_reset: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, workers: usize) -> PoolStats {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        PoolStats {
            workers,
            runtimes_created: load(&self.runtimes_created),
            initializations: load(&self.initializations),
            init_failures: load(&self.init_failures),
            compiles: load(&self.compiles),
            jobs_completed: load(&self.jobs_completed),
            jobs_failed: load(&self.jobs_failed),
            runtimes_reset: load(&self.runtimes_reset),
        }
    }
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub runtimes_created: usize,
    /// Successful runtime initializations.
    pub initializations: usize,
    pub init_failures: usize,
    /// Template sources read and parsed across all runtimes.
    pub compiles: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    /// Runtimes discarded after finishing a job whose batch had already timed out.
    pub runtimes_reset: usize,
}
