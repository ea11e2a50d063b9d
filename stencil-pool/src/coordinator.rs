//! Worker pool coordinator.
//!
//! Jobs fan out over a shared queue to dedicated worker threads, each owning
//! one [`WorkerRuntime`]. Results flow back on a per-batch channel tagged with
//! the job index and are re-ordered before return, so output order matches
//! submission order no matter which worker finishes first.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use stencil_core::{Content, RenderJob};
use stencil_renderer::HelperCollision;

use crate::config::{PoolConfig, SharedConfig};
use crate::error::{JobError, PoolError};
use crate::runtime::WorkerRuntime;
use crate::stats::{Counters, PoolStats};

/// Outcome of one job, tagged with its batch index.
#[derive(Debug, Clone, Serialize)]
pub struct RenderResult {
    pub index: usize,
    pub outcome: Result<Content, JobError>,
    /// Worker that ran the job; `None` when it never ran.
    pub worker: Option<usize>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
    /// Helper collisions from a runtime initialization triggered by this job.
    pub collisions: Vec<HelperCollision>,
}

impl RenderResult {
    /// Result for a job that never reported back.
    pub fn unfinished(index: usize, error: JobError, elapsed: Duration) -> Self {
        Self {
            index,
            outcome: Err(error),
            worker: None,
            elapsed,
            collisions: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

// ---------------------------------------------------------------------------
// Queue plumbing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BatchControl {
    abandoned: AtomicBool,
}

impl BatchControl {
    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct Envelope {
    job: RenderJob,
    batch: Arc<BatchControl>,
    results: mpsc::UnboundedSender<RenderResult>,
}

enum JobQueue {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

impl JobQueue {
    async fn send(&self, envelope: Envelope) -> Result<(), PoolError> {
        match self {
            JobQueue::Bounded(tx) => tx.send(envelope).await.map_err(|_| PoolError::QueueClosed),
            JobQueue::Unbounded(tx) => tx.send(envelope).map_err(|_| PoolError::QueueClosed),
        }
    }
}

enum JobSource {
    Bounded(mpsc::Receiver<Envelope>),
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
}

impl JobSource {
    fn blocking_recv(&mut self) -> Option<Envelope> {
        match self {
            JobSource::Bounded(rx) => rx.blocking_recv(),
            JobSource::Unbounded(rx) => rx.blocking_recv(),
        }
    }
}

fn channel(capacity: Option<usize>) -> (JobQueue, JobSource) {
    match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap);
            (JobQueue::Bounded(tx), JobSource::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (JobQueue::Unbounded(tx), JobSource::Unbounded(rx))
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct WorkerPool {
    config: PoolConfig,
    queue: Option<JobQueue>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `config.workers` worker threads over `shared`.
    pub fn new(config: PoolConfig, shared: Arc<SharedConfig>) -> Result<Self, PoolError> {
        config.validate()?;
        let (queue, source) = channel(config.queue_capacity);
        let source = Arc::new(Mutex::new(source));
        let counters = Arc::new(Counters::default());

        let mut pool = Self {
            config: config.clone(),
            queue: Some(queue),
            workers: Vec::with_capacity(config.workers),
            counters: counters.clone(),
        };
        for id in 0..config.workers {
            let worker = Worker {
                id,
                shared: shared.clone(),
                source: source.clone(),
                counters: counters.clone(),
                init_retries: config.init_retries,
            };
            let handle = std::thread::Builder::new()
                .name(format!("stencil-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(|source| PoolError::Spawn { id, source })?;
            pool.workers.push(handle);
        }
        tracing::info!(
            workers = config.workers,
            queue_capacity = ?config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.workers.len())
    }

    /// Run a batch under the configured batch timeout.
    pub async fn submit(&self, jobs: Vec<RenderJob>) -> Result<Vec<RenderResult>, PoolError> {
        self.submit_with_timeout(jobs, self.config.batch_timeout()).await
    }

    /// Run a batch and return one result per job, ordered by job index.
    ///
    /// Jobs still unfinished at the deadline are reported as
    /// [`JobError::Timeout`]; a runtime that later finishes one of them is
    /// reset before it takes more work.
    pub async fn submit_with_timeout(
        &self,
        jobs: Vec<RenderJob>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RenderResult>, PoolError> {
        let queue = self.queue.as_ref().ok_or(PoolError::ShutDown)?;

        let mut pending = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !pending.insert(job.index) {
                return Err(PoolError::DuplicateIndex(job.index));
            }
        }
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let batch = Arc::new(BatchControl::default());
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let total = jobs.len();
        tracing::debug!(jobs = total, ?timeout, "submitting batch");

        let mut timed_out = false;
        for job in jobs {
            let envelope = Envelope {
                job,
                batch: batch.clone(),
                results: results_tx.clone(),
            };
            match deadline {
                Some(at) => match timeout_at(at, queue.send(envelope)).await {
                    Ok(sent) => sent?,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => queue.send(envelope).await?,
            }
        }
        drop(results_tx);

        let mut results = Vec::with_capacity(total);
        while !timed_out && !pending.is_empty() {
            let next = match deadline {
                Some(at) => match timeout_at(at, results_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => results_rx.recv().await,
            };
            match next {
                Some(result) => {
                    if pending.remove(&result.index) {
                        results.push(result);
                    }
                }
                None => break,
            }
        }

        // Results that landed before the deadline fired still count.
        while !pending.is_empty() {
            match results_rx.try_recv() {
                Ok(result) => {
                    if pending.remove(&result.index) {
                        results.push(result);
                    }
                }
                Err(_) => break,
            }
        }

        if !pending.is_empty() {
            batch.abandon();
            let elapsed = started.elapsed();
            let error = if timed_out {
                JobError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            } else {
                JobError::Dispatch {
                    message: "worker exited without reporting a result".into(),
                }
            };
            tracing::warn!(
                unfinished = pending.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                timed_out,
                "batch finished with unfinished jobs"
            );
            for index in pending {
                results.push(RenderResult::unfinished(index, error.clone(), elapsed));
            }
        }

        results.sort_by_key(|r| r.index);
        Ok(results)
    }

    /// Close the queue and wait for every worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.queue.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

struct Worker {
    id: usize,
    shared: Arc<SharedConfig>,
    source: Arc<Mutex<JobSource>>,
    counters: Arc<Counters>,
    init_retries: usize,
}

impl Worker {
    fn fresh_runtime(&self) -> WorkerRuntime {
        WorkerRuntime::with_counters(self.id, self.shared.clone(), self.counters.clone())
    }

    fn next(&self) -> Option<Envelope> {
        let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
        source.blocking_recv()
    }

    fn run(self) {
        let mut runtime = self.fresh_runtime();
        while let Some(envelope) = self.next() {
            if envelope.batch.is_abandoned() {
                tracing::debug!(worker = self.id, index = envelope.job.index, "skipping job from abandoned batch");
                continue;
            }

            let started = std::time::Instant::now();
            let (outcome, collisions) = self.execute(&mut runtime, &envelope.job);
            if outcome.is_ok() {
                Counters::bump(&self.counters.jobs_completed);
            } else {
                Counters::bump(&self.counters.jobs_failed);
            }

            let result = RenderResult {
                index: envelope.job.index,
                outcome,
                worker: Some(self.id),
                elapsed: started.elapsed(),
                collisions,
            };
            if envelope.batch.is_abandoned() || envelope.results.send(result).is_err() {
                tracing::warn!(
                    worker = self.id,
                    index = envelope.job.index,
                    "job finished after its batch timed out, resetting runtime"
                );
                runtime.reset();
                Counters::bump(&self.counters.runtimes_reset);
            }
        }
        runtime.terminate();
        tracing::debug!(worker = self.id, "worker exiting");
    }

    /// Run one job, replacing the runtime after failed initializations.
    fn execute(
        &self,
        runtime: &mut WorkerRuntime,
        job: &RenderJob,
    ) -> (Result<Content, JobError>, Vec<HelperCollision>) {
        let mut attempts = 0;
        loop {
            match catch_unwind(AssertUnwindSafe(|| runtime.render(job))) {
                Ok(Ok(rendered)) => return (rendered.outcome, rendered.collisions),
                Ok(Err(err)) => {
                    attempts += 1;
                    *runtime = self.fresh_runtime();
                    if attempts > self.init_retries {
                        return (Err(err.into()), Vec::new());
                    }
                    tracing::info!(
                        worker = self.id,
                        attempt = attempts,
                        "retrying initialization on a fresh runtime"
                    );
                }
                Err(_) => {
                    tracing::error!(worker = self.id, index = job.index, "runtime panicked, replacing it");
                    *runtime = self.fresh_runtime();
                    return (
                        Err(JobError::Dispatch {
                            message: format!("runtime {} panicked while rendering", self.id),
                        }),
                        Vec::new(),
                    );
                }
            }
        }
    }
}
