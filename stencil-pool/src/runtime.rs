//! Worker runtime: one isolated rendering environment.
//!
//! A runtime is bound to a single session at a time. It lazily connects to
//! the store, loads helper modules, and builds its base engine on the first
//! job; later jobs for the same session reuse the connection and the
//! compiled-template cache. Initialization is single-flight: concurrent
//! callers serialize on the runtime lock and only the first one initializes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use stencil_core::{Content, RenderJob, SessionId, SessionStore};
use stencil_renderer::{
    build_base, register_builtins, ContentProducer, HelperCollision, HelperContext,
    HelperRegistry, RenderError, TemplateCache,
};

use crate::config::SharedConfig;
use crate::error::{InitError, JobError};
use crate::stats::Counters;

/// Lifecycle of a [`WorkerRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Uninitialized,
    Initializing,
    Ready,
    Rendering,
    Failed,
    Terminated,
}

/// What one job produced on a runtime that reached `Ready`.
#[derive(Debug)]
pub struct Rendered {
    pub outcome: Result<Content, JobError>,
    /// Helper collisions recorded when the runtime initialized for this
    /// job's session. Reported on every job so a reused runtime keeps them.
    pub collisions: Vec<HelperCollision>,
}

struct Loaded {
    session: SessionId,
    store: Arc<dyn SessionStore>,
    cache: TemplateCache,
    collisions: Vec<HelperCollision>,
}

pub struct WorkerRuntime {
    id: usize,
    shared: Arc<SharedConfig>,
    counters: Arc<Counters>,
    inits: AtomicUsize,
    loaded: Mutex<Option<Loaded>>,
    state: Mutex<RuntimeState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WorkerRuntime {
    pub fn new(id: usize, shared: Arc<SharedConfig>) -> Self {
        Self::with_counters(id, shared, Arc::new(Counters::default()))
    }

    pub(crate) fn with_counters(id: usize, shared: Arc<SharedConfig>, counters: Arc<Counters>) -> Self {
        Counters::bump(&counters.runtimes_created);
        Self {
            id,
            shared,
            counters,
            inits: AtomicUsize::new(0),
            loaded: Mutex::new(None),
            state: Mutex::new(RuntimeState::Uninitialized),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> RuntimeState {
        *lock(&self.state)
    }

    fn set_state(&self, state: RuntimeState) {
        *lock(&self.state) = state;
    }

    /// Successful initializations of this runtime instance.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::Relaxed)
    }

    /// Templates compiled by the current cache.
    pub fn compile_count(&self) -> usize {
        lock(&self.loaded)
            .as_ref()
            .map(|l| l.cache.compile_count())
            .unwrap_or(0)
    }

    /// Render one job, initializing first if needed.
    ///
    /// `Err` means the runtime could not become `Ready`; it is left `Failed`
    /// and should be replaced. Job-level failures are in [`Rendered::outcome`].
    pub fn render(&self, job: &RenderJob) -> Result<Rendered, InitError> {
        let mut loaded = lock(&self.loaded);

        match self.state() {
            state @ (RuntimeState::Failed | RuntimeState::Terminated) => {
                return Err(InitError::Unavailable { id: self.id, state });
            }
            _ => {}
        }

        let bound = loaded.as_ref().map(|l| &l.session);
        if bound != Some(&job.session_id) {
            if let Some(previous) = bound {
                tracing::info!(
                    runtime = self.id,
                    from = %previous,
                    to = %job.session_id,
                    "rebinding runtime to new session"
                );
            }
            *loaded = None;
            self.set_state(RuntimeState::Initializing);
            match self.initialize(&job.session_id) {
                Ok(fresh) => {
                    Counters::bump(&self.counters.initializations);
                    self.inits.fetch_add(1, Ordering::Relaxed);
                    *loaded = Some(fresh);
                }
                Err(err) => {
                    Counters::bump(&self.counters.init_failures);
                    self.set_state(RuntimeState::Failed);
                    tracing::error!(runtime = self.id, error = %err, "runtime initialization failed");
                    return Err(err);
                }
            }
        }

        let Some(current) = loaded.as_mut() else {
            self.set_state(RuntimeState::Failed);
            return Err(InitError::Unavailable {
                id: self.id,
                state: RuntimeState::Failed,
            });
        };

        self.set_state(RuntimeState::Rendering);
        let before = current.cache.compile_count();
        let outcome = self.produce(current, job).map_err(JobError::from);
        let compiled = current.cache.compile_count() - before;
        if compiled > 0 {
            self.counters.compiles.fetch_add(compiled, Ordering::Relaxed);
        }
        self.set_state(RuntimeState::Ready);

        if let Err(err) = &outcome {
            tracing::warn!(
                runtime = self.id,
                package = %job.package.id,
                index = job.index,
                error = %err,
                "job failed"
            );
        }
        Ok(Rendered {
            outcome,
            collisions: current.collisions.clone(),
        })
    }

    fn initialize(&self, session: &SessionId) -> Result<Loaded, InitError> {
        tracing::debug!(runtime = self.id, session = %session, "initializing runtime");
        let store: Arc<dyn SessionStore> = Arc::from(self.shared.connector().open()?);

        let ctx = HelperContext {
            store: store.clone(),
            session_id: session.clone(),
            meta: self.shared.meta().clone(),
            manifest_package: self.shared.manifest_package().map(|p| p.id.clone()),
        };
        let mut registry = HelperRegistry::new();
        register_builtins(&mut registry, &ctx);
        for module in self.shared.helper_modules() {
            registry.load_module(module.as_ref(), &ctx)?;
        }

        let base = build_base(self.shared.partials(), &registry).map_err(|err| match err {
            RenderError::Syntax(syntax) => InitError::Partial(syntax),
            other => InitError::Store(other.to_string()),
        })?;

        let collisions = registry.collisions().to_vec();
        for c in &collisions {
            tracing::warn!(
                runtime = self.id,
                helper = %c.name,
                previous = %c.previous,
                replacement = %c.replacement,
                "helper registered twice, later registration wins"
            );
        }

        let loaded = Loaded {
            session: session.clone(),
            store,
            cache: TemplateCache::new(base),
            collisions,
        };
        Ok(loaded)
    }

    fn produce(&self, loaded: &mut Loaded, job: &RenderJob) -> Result<Content, RenderError> {
        let compiled = loaded.cache.compile(&job.package)?;
        let producer = ContentProducer::new(
            loaded.store.as_ref(),
            &self.shared.meta().resources,
            self.shared.overridable(),
        );
        producer.produce(
            &compiled,
            &job.session_id,
            &job.package,
            job.manifest_package.as_deref(),
            &job.iteration,
        )
    }

    /// Drop the session binding and cache; the next job reinitializes.
    pub fn reset(&self) {
        let mut loaded = lock(&self.loaded);
        *loaded = None;
        if self.state() != RuntimeState::Terminated {
            self.set_state(RuntimeState::Uninitialized);
        }
    }

    pub fn terminate(&self) {
        let mut loaded = lock(&self.loaded);
        *loaded = None;
        self.set_state(RuntimeState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_core::{IterationOptions, MemoryStore, Session, StoreConnector, StoreError, TemplatePackage};
    use stencil_renderer::{HelperLoadError, HelperModule};
    use tempfile::TempDir;

    struct CountingConnector {
        opens: AtomicUsize,
    }

    impl StoreConnector for CountingConnector {
        fn open(&self) -> Result<Box<dyn SessionStore>, StoreError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryStore::new([Session::new("s-1"), Session::new("s-2")])))
        }
    }

    struct Broken;

    impl HelperModule for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn initialize(&self, _: &mut HelperRegistry, _: &HelperContext) -> Result<(), HelperLoadError> {
            Err(HelperLoadError {
                module: "broken".into(),
                reason: "no initialize entry point".into(),
            })
        }
    }

    struct Shadow;

    impl HelperModule for Shadow {
        fn name(&self) -> &str {
            "shadow"
        }

        fn initialize(&self, registry: &mut HelperRegistry, _: &HelperContext) -> Result<(), HelperLoadError> {
            registry.register_function("session_label", |_: &std::collections::HashMap<String, serde_json::Value>| {
                Ok(serde_json::Value::from("shadowed"))
            });
            Ok(())
        }
    }

    fn job(pkg: &Arc<TemplatePackage>, session: &str, index: usize) -> RenderJob {
        RenderJob {
            session_id: SessionId::from(session),
            package: pkg.clone(),
            manifest_package: None,
            iteration: IterationOptions::default(),
            index,
        }
    }

    fn template(dir: &TempDir, body: &str) -> Arc<TemplatePackage> {
        let path = dir.path().join("t.tera");
        std::fs::write(&path, body).unwrap();
        Arc::new(TemplatePackage::single(path, "t"))
    }

    #[test]
    fn initializes_once_per_session_and_reuses_cache() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "{{ global.session_id }}");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let runtime = WorkerRuntime::new(0, SharedConfig::builder(connector.clone()).build());
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);

        for i in 0..3 {
            let out = runtime.render(&job(&pkg, "s-1", i)).unwrap();
            assert_eq!(out.outcome.unwrap()[0].content, "s-1");
        }
        assert_eq!(runtime.state(), RuntimeState::Ready);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.compile_count(), 1);

        let out = runtime.render(&job(&pkg, "s-2", 3)).unwrap();
        assert_eq!(out.outcome.unwrap()[0].content, "s-2");
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.init_count(), 2);
    }

    #[test]
    fn concurrent_first_jobs_initialize_once() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "x");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let runtime = Arc::new(WorkerRuntime::new(0, SharedConfig::builder(connector.clone()).build()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let runtime = runtime.clone();
                let pkg = pkg.clone();
                std::thread::spawn(move || runtime.render(&job(&pkg, "s-1", i)).map(|r| r.outcome.is_ok()))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().unwrap());
        }
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.init_count(), 1);
    }

    #[test]
    fn helper_load_failure_leaves_runtime_failed() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "x");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let shared = SharedConfig::builder(connector).helper_module(Arc::new(Broken)).build();
        let runtime = WorkerRuntime::new(0, shared);

        let err = runtime.render(&job(&pkg, "s-1", 0)).unwrap_err();
        assert!(matches!(err, InitError::HelperLoad(_)));
        assert_eq!(runtime.state(), RuntimeState::Failed);
        assert!(matches!(
            runtime.render(&job(&pkg, "s-1", 1)),
            Err(InitError::Unavailable { .. })
        ));
    }

    #[test]
    fn render_error_keeps_runtime_ready() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "{{ missing_value }}");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let runtime = WorkerRuntime::new(0, SharedConfig::builder(connector).build());

        let out = runtime.render(&job(&pkg, "s-1", 0)).unwrap();
        assert!(matches!(out.outcome, Err(JobError::Render { .. })));
        assert_eq!(runtime.state(), RuntimeState::Ready);
    }

    #[test]
    fn collisions_reported_on_every_job_of_a_bound_runtime() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "x");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let shared = SharedConfig::builder(connector)
            .helper_module(Arc::new(Shadow))
            .helper_module(Arc::new(Shadow))
            .build();
        let runtime = WorkerRuntime::new(0, shared);

        let first = runtime.render(&job(&pkg, "s-1", 0)).unwrap();
        let second = runtime.render(&job(&pkg, "s-1", 1)).unwrap();
        assert_eq!(runtime.init_count(), 1);
        assert!(!first.collisions.is_empty());
        assert_eq!(first.collisions, second.collisions);
    }

    #[test]
    fn reset_and_terminate() {
        let dir = TempDir::new().unwrap();
        let pkg = template(&dir, "x");
        let connector = Arc::new(CountingConnector { opens: AtomicUsize::new(0) });
        let runtime = WorkerRuntime::new(0, SharedConfig::builder(connector.clone()).build());
        runtime.render(&job(&pkg, "s-1", 0)).unwrap();
        runtime.reset();
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
        assert_eq!(runtime.compile_count(), 0);
        runtime.render(&job(&pkg, "s-1", 1)).unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);

        runtime.terminate();
        assert_eq!(runtime.state(), RuntimeState::Terminated);
        assert!(runtime.render(&job(&pkg, "s-1", 2)).is_err());
    }
}
