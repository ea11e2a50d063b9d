//! Pipeline driver: expands packages into jobs, runs them on the pool, and
//! regroups the ordered results per package.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use heck::ToSnakeCase;
use serde_json::{json, Value};

use stencil_core::{
    IterationOptions, Manifest, PackageType, RenderJob, SessionId, SessionStore, StoreConnector,
    StoreError, TemplatePackage,
};
use stencil_pool::{JobError, PoolConfig, RenderResult, SharedConfig, WorkerPool};
use stencil_renderer::{load_override, FileHelperModule, HelperCollision};

use crate::error::PipelineError;
use crate::result::{GenerationResult, JobFailure, PackageOutcome, PackageResult};

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Only render packages whose category is listed.
    pub generate_only: Option<Vec<String>>,
    /// Batch deadline; falls back to the pool's configured timeout.
    pub timeout: Option<Duration>,
    /// Dispatch one job at a time, in index order, instead of the whole batch.
    pub sequential: bool,
}

pub struct Generator {
    pool: WorkerPool,
    store: Arc<dyn SessionStore>,
    manifest_package: Option<Arc<TemplatePackage>>,
}

struct Plan {
    package: Arc<TemplatePackage>,
    /// (job index, iteration key) per expanded job.
    slots: Vec<(usize, Option<String>)>,
    expansion_error: Option<JobError>,
}

impl Generator {
    /// Build a generator and its worker pool from a loaded manifest.
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        manifest: &Manifest,
        config: PoolConfig,
    ) -> Result<Self, PipelineError> {
        let overridable = match &manifest.override_package {
            Some(pkg) => load_override(&pkg.path)?,
            None => json!({}),
        };
        let mut shared = SharedConfig::builder(connector.clone())
            .partials(manifest.read_partials()?)
            .meta(manifest.meta.clone())
            .overridable(overridable)
            .manifest_package(manifest.package.clone());
        for helper in &manifest.helpers {
            shared = shared.helper_module(Arc::new(FileHelperModule::new(&helper.path)));
        }
        tracing::info!(
            manifest = %manifest.package.category,
            templates = manifest.templates.len(),
            partials = manifest.partials.len(),
            helpers = manifest.helpers.len(),
            "loaded generation manifest"
        );
        Self::with_shared(connector, shared.build(), config)
    }

    /// Build a generator over an already assembled shared configuration.
    pub fn with_shared(
        connector: Arc<dyn StoreConnector>,
        shared: Arc<SharedConfig>,
        config: PoolConfig,
    ) -> Result<Self, PipelineError> {
        let manifest_package = shared.manifest_package().cloned();
        let pool = WorkerPool::new(config, shared)?;
        let store = Arc::from(connector.open()?);
        Ok(Self {
            pool,
            store,
            manifest_package,
        })
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Render `packages` for `session_id`.
    ///
    /// Only `SingleTemplate` packages produce output; others are ignored.
    /// Per-job failures land in the result; `Err` is reserved for problems
    /// that prevent the batch from running at all.
    pub async fn generate(
        &self,
        session_id: &SessionId,
        packages: &[Arc<TemplatePackage>],
        options: &GenerateOptions,
    ) -> Result<GenerationResult, PipelineError> {
        let started = Instant::now();
        let generated_at = chrono::Utc::now();
        let (plans, jobs) = self.plan(session_id, packages, options).await?;
        let job_count = jobs.len();
        tracing::info!(
            session = %session_id,
            packages = plans.len(),
            jobs = job_count,
            "generation started"
        );

        let timeout = options.timeout.or_else(|| self.pool.config().batch_timeout());
        let mut results = if options.sequential {
            self.run_sequentially(jobs, timeout).await?
        } else {
            self.pool.submit_with_timeout(jobs, timeout).await?
        };
        results.sort_by_key(|r| r.index);

        let helper_diagnostics = collect_diagnostics(&results);
        let mut by_index: BTreeMap<usize, RenderResult> =
            results.into_iter().map(|r| (r.index, r)).collect();
        let packages: Vec<PackageResult> = plans
            .into_iter()
            .map(|plan| assemble(plan, &mut by_index))
            .collect();

        let result = GenerationResult {
            session_id: session_id.clone(),
            generated_at,
            packages,
            helper_diagnostics,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let (ok, partial, failed) = result.summary();
        tracing::info!(
            session = %session_id,
            jobs = job_count,
            success = ok,
            partial,
            failed,
            duration_ms = result.duration_ms,
            "generation finished"
        );
        Ok(result)
    }

    /// Load the session and expand every package on a blocking thread, since
    /// store queries may hit the filesystem.
    async fn plan(
        &self,
        session_id: &SessionId,
        packages: &[Arc<TemplatePackage>],
        options: &GenerateOptions,
    ) -> Result<(Vec<Plan>, Vec<RenderJob>), PipelineError> {
        let store = self.store.clone();
        let manifest_package = self.manifest_package.clone();
        let session_id = session_id.clone();
        let packages = packages.to_vec();
        let generate_only = options.generate_only.clone();
        let planned = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            store.load_session(&session_id)?;
            Ok(expand_all(
                store.as_ref(),
                &session_id,
                &packages,
                generate_only.as_deref(),
                manifest_package.as_ref(),
            ))
        })
        .await??;
        Ok(planned)
    }

    /// Submit jobs one at a time in index order, sharing a single deadline.
    async fn run_sequentially(
        &self,
        jobs: Vec<RenderJob>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RenderResult>, PipelineError> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                let error = JobError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                results.push(RenderResult::unfinished(job.index, error, started.elapsed()));
                continue;
            }
            results.extend(self.pool.submit_with_timeout(vec![job], remaining).await?);
        }
        Ok(results)
    }

    /// Stop the worker pool.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

fn expand_all(
    store: &dyn SessionStore,
    session_id: &SessionId,
    packages: &[Arc<TemplatePackage>],
    generate_only: Option<&[String]>,
    manifest_package: Option<&Arc<TemplatePackage>>,
) -> (Vec<Plan>, Vec<RenderJob>) {
    let mut plans = Vec::new();
    let mut jobs = Vec::new();

    let selected = packages
        .iter()
        .filter(|p| p.package_type == PackageType::SingleTemplate)
        .filter(|p| match generate_only {
            Some(only) => only.contains(&p.category),
            None => true,
        });

    for package in selected {
        let mut plan = Plan {
            package: package.clone(),
            slots: Vec::new(),
            expansion_error: None,
        };
        match expand(store, session_id, package) {
            Ok(iterations) => {
                for iteration in iterations {
                    let index = jobs.len();
                    plan.slots.push((index, iteration.override_key.clone()));
                    jobs.push(RenderJob {
                        session_id: session_id.clone(),
                        package: package.clone(),
                        manifest_package: manifest_package.cloned(),
                        iteration,
                        index,
                    });
                }
            }
            Err(err) => {
                tracing::warn!(package = %package.id, error = %err, "iteration expansion failed");
                plan.expansion_error = Some(JobError::Store {
                    message: err.to_string(),
                });
            }
        }
        plans.push(plan);
    }
    (plans, jobs)
}

/// Iterations for one package: its explicit list, else its store iterator,
/// else a single default iteration.
fn expand(
    store: &dyn SessionStore,
    session_id: &SessionId,
    package: &TemplatePackage,
) -> Result<Vec<IterationOptions>, StoreError> {
    if !package.iterations.is_empty() {
        return Ok(package.iterations.clone());
    }
    let Some(iterator) = &package.iterator else {
        return Ok(vec![IterationOptions::default()]);
    };
    let items = store.iterate(session_id, iterator)?;
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, item)| IterationOptions::for_item(iteration_key(&item, i), item))
        .collect())
}

/// Key of an iterator item: its snake-cased `name`, else its `code`, else its position.
fn iteration_key(item: &Value, position: usize) -> String {
    if let Some(name) = item.get("name").and_then(Value::as_str) {
        let key = name.to_snake_case();
        if !key.is_empty() {
            return key;
        }
    }
    match item.get("code") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => position.to_string(),
    }
}

fn collect_diagnostics(results: &[RenderResult]) -> Vec<HelperCollision> {
    let mut seen: Vec<HelperCollision> = Vec::new();
    for collision in results.iter().flat_map(|r| r.collisions.iter()) {
        if !seen.contains(collision) {
            seen.push(collision.clone());
        }
    }
    seen
}

fn assemble(plan: Plan, results: &mut BTreeMap<usize, RenderResult>) -> PackageResult {
    let Plan {
        package,
        slots,
        expansion_error,
    } = plan;

    let mut fragments = Vec::new();
    let mut failures = Vec::new();
    let mut succeeded = 0;

    if let Some(error) = expansion_error {
        failures.push(JobFailure {
            index: None,
            iteration: None,
            error,
        });
    }

    for (index, key) in &slots {
        match results.remove(index).map(|r| r.outcome) {
            Some(Ok(content)) => {
                succeeded += 1;
                fragments.extend(content);
            }
            Some(Err(error)) => failures.push(JobFailure {
                index: Some(*index),
                iteration: key.clone(),
                error,
            }),
            None => failures.push(JobFailure {
                index: Some(*index),
                iteration: key.clone(),
                error: JobError::Dispatch {
                    message: "no result returned for job".into(),
                },
            }),
        }
    }

    let outcome = if failures.is_empty() {
        PackageOutcome::Success { fragments }
    } else if succeeded == 0 {
        PackageOutcome::Failed { failures }
    } else {
        PackageOutcome::Partial {
            fragments,
            failures,
        }
    };

    PackageResult {
        package_id: package.id.clone(),
        category: package.category.clone(),
        path: package.path.clone(),
        jobs: slots.len(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use stencil_core::Fragment;

    #[rstest]
    #[case(json!({ "name": "On/Off", "code": 6 }), "on_off")]
    #[case(json!({ "name": "", "code": 8 }), "8")]
    #[case(json!({ "code": "0x0300" }), "0x0300")]
    #[case(json!(42), "3")]
    fn iteration_keys(#[case] item: Value, #[case] expected: &str) {
        assert_eq!(iteration_key(&item, 3), expected);
    }

    #[test]
    fn expansion_assigns_consecutive_indices_to_selected_packages() {
        let store = stencil_core::MemoryStore::new([stencil_core::Session::new("s-1")]);
        let iterations = vec![
            IterationOptions::for_item("a", json!({})),
            IterationOptions::for_item("b", json!({})),
        ];
        let packages = vec![
            Arc::new(TemplatePackage::single("/t/one.tera", "one").with_iterations(iterations)),
            Arc::new(TemplatePackage::single("/t/skip.tera", "skip")),
            Arc::new(TemplatePackage::single("/t/two.tera", "two")),
        ];
        let only = vec!["one".to_string(), "two".to_string()];

        let (plans, jobs) = expand_all(&store, &SessionId::from("s-1"), &packages, Some(only.as_slice()), None);
        assert_eq!(plans.len(), 2);
        let indices: Vec<usize> = jobs.iter().map(|j| j.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(
            plans[0].slots,
            vec![(0usize, Some("a".to_string())), (1usize, Some("b".to_string()))]
        );
        assert_eq!(plans[1].slots, vec![(2usize, None)]);
    }

    fn ok(index: usize, text: &str) -> RenderResult {
        RenderResult {
            index,
            outcome: Ok(vec![Fragment::new(format!("f{index}"), text)]),
            worker: Some(0),
            elapsed: Duration::ZERO,
            collisions: Vec::new(),
        }
    }

    fn failed(index: usize) -> RenderResult {
        RenderResult {
            index,
            outcome: Err(JobError::Timeout { elapsed_ms: 5 }),
            worker: None,
            elapsed: Duration::ZERO,
            collisions: Vec::new(),
        }
    }

    fn plan(slots: &[usize]) -> Plan {
        Plan {
            package: Arc::new(TemplatePackage::single("/t/x.tera", "x")),
            slots: slots.iter().map(|i| (*i, Some(format!("k{i}")))).collect(),
            expansion_error: None,
        }
    }

    #[test]
    fn all_ok_is_success_in_slot_order() {
        let mut results: BTreeMap<_, _> = [(1, ok(1, "b")), (0, ok(0, "a"))].into_iter().collect();
        let pkg = assemble(plan(&[0, 1]), &mut results);
        assert!(pkg.is_success());
        let texts: Vec<_> = pkg.fragments().iter().map(|f| f.content.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
    }

    #[test]
    fn mixed_is_partial_with_failed_iteration() {
        let mut results: BTreeMap<_, _> = [(0, ok(0, "a")), (1, failed(1))].into_iter().collect();
        let pkg = assemble(plan(&[0, 1]), &mut results);
        assert!(pkg.is_partial());
        assert_eq!(pkg.failures()[0].iteration.as_deref(), Some("k1"));
        assert_eq!(pkg.fragments().len(), 1);
    }

    #[test]
    fn all_failed_or_missing_is_failed() {
        let mut results: BTreeMap<_, _> = [(0, failed(0))].into_iter().collect();
        let pkg = assemble(plan(&[0, 1]), &mut results);
        assert!(pkg.is_failed());
        assert_eq!(pkg.failures().len(), 2);
        assert!(matches!(pkg.failures()[1].error, JobError::Dispatch { .. }));
    }

    #[test]
    fn zero_jobs_is_success() {
        let pkg = assemble(plan(&[]), &mut BTreeMap::new());
        assert!(pkg.is_success());
        assert_eq!(pkg.jobs, 0);
    }
}
