//! Pool sizing and the read-only configuration every runtime is built from.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stencil_core::{MetaInfo, StoreConnector, TemplatePackage};
use stencil_renderer::HelperModule;

use crate::error::{io_err, PoolError};

/// Worker pool tuning, usually read from the `pool:` section of `stencil.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads, each owning one runtime.
    pub workers: usize,
    /// Bound on queued jobs. `None` queues without limit.
    pub queue_capacity: Option<usize>,
    /// Deadline for a whole batch. `None` waits indefinitely.
    pub batch_timeout_ms: Option<u64>,
    /// Fresh runtimes tried after a failed initialization before the job fails.
    pub init_retries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: None,
            batch_timeout_ms: None,
            init_retries: 1,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pool: PoolConfig,
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }

    /// Load the `pool:` section of a YAML config file.
    ///
    /// A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, PoolError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no pool config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| PoolError::Config {
            path: path.to_path_buf(),
            source: e,
        })?;
        file.pool.validate()?;
        Ok(file.pool)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Immutable inputs shared by every runtime in a pool.
///
/// Runtimes only ever read from this; all mutable state lives in the runtime.
pub struct SharedConfig {
    connector: Arc<dyn StoreConnector>,
    partials: Vec<(String, String)>,
    helper_modules: Vec<Arc<dyn HelperModule>>,
    meta: MetaInfo,
    overridable: Value,
    manifest_package: Option<Arc<TemplatePackage>>,
}

impl SharedConfig {
    pub fn builder(connector: Arc<dyn StoreConnector>) -> SharedConfigBuilder {
        SharedConfigBuilder {
            inner: SharedConfig {
                connector,
                partials: Vec::new(),
                helper_modules: Vec::new(),
                meta: MetaInfo::default(),
                overridable: Value::Object(Default::default()),
                manifest_package: None,
            },
        }
    }

    pub fn connector(&self) -> &dyn StoreConnector {
        self.connector.as_ref()
    }

    pub fn partials(&self) -> &[(String, String)] {
        &self.partials
    }

    pub fn helper_modules(&self) -> &[Arc<dyn HelperModule>] {
        &self.helper_modules
    }

    pub fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    pub fn overridable(&self) -> &Value {
        &self.overridable
    }

    pub fn manifest_package(&self) -> Option<&Arc<TemplatePackage>> {
        self.manifest_package.as_ref()
    }
}

pub struct SharedConfigBuilder {
    inner: SharedConfig,
}

impl SharedConfigBuilder {
    pub fn partial(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.inner.partials.push((name.into(), body.into()));
        self
    }

    pub fn partials(mut self, partials: impl IntoIterator<Item = (String, String)>) -> Self {
        self.inner.partials.extend(partials);
        self
    }

    pub fn helper_module(mut self, module: Arc<dyn HelperModule>) -> Self {
        self.inner.helper_modules.push(module);
        self
    }

    pub fn meta(mut self, meta: MetaInfo) -> Self {
        self.inner.meta = meta;
        self
    }

    pub fn overridable(mut self, values: Value) -> Self {
        self.inner.overridable = values;
        self
    }

    pub fn manifest_package(mut self, package: Arc<TemplatePackage>) -> Self {
        self.inner.manifest_package = Some(package);
        self
    }

    pub fn build(self) -> Arc<SharedConfig> {
        Arc::new(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = PoolConfig::load(&dir.path().join("stencil.yaml")).unwrap();
        assert_eq!(cfg.init_retries, 1);
        assert!(cfg.workers >= 1);
        assert_eq!(cfg.batch_timeout(), None);
    }

    #[test]
    fn pool_section_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stencil.yaml");
        std::fs::write(
            &path,
            "pool:\n  workers: 3\n  queue_capacity: 16\n  batch_timeout_ms: 2500\n",
        )
        .unwrap();
        let cfg = PoolConfig::load(&path).unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.queue_capacity, Some(16));
        assert_eq!(cfg.batch_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(cfg.init_retries, 1);
    }

    #[test]
    fn zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stencil.yaml");
        std::fs::write(&path, "pool:\n  workers: 0\n").unwrap();
        assert!(matches!(PoolConfig::load(&path), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = PoolConfig {
            queue_capacity: Some(0),
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
