pub mod generate;
pub mod preview;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use stencil_core::{Manifest, SessionId, YamlStoreConnector};
use stencil_pipeline::{GenerateOptions, GenerationResult, Generator};
use stencil_pool::PoolConfig;

/// Inputs shared by every command that renders.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Path to the `gen-templates.json` manifest.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Session store root (contains `sessions/<id>.yaml`).
    #[arg(long)]
    pub store: PathBuf,

    /// Session to render.
    #[arg(long)]
    pub session: String,

    /// Pool configuration file.
    #[arg(long, default_value = "stencil.yaml")]
    pub config: PathBuf,

    /// Override the configured number of workers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Batch deadline in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl SourceArgs {
    /// Load the manifest, build a generator, and render the selected templates.
    pub fn generate(&self, only: Option<Vec<String>>, sequential: bool) -> Result<GenerationResult> {
        let manifest = Manifest::load(&self.manifest)
            .with_context(|| format!("loading manifest {}", self.manifest.display()))?;
        let mut config = PoolConfig::load(&self.config)
            .with_context(|| format!("loading config {}", self.config.display()))?;
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("starting async runtime")?;

        let connector = Arc::new(YamlStoreConnector::new(&self.store));
        let generator = Generator::new(connector, &manifest, config).context("building generator")?;
        let options = GenerateOptions {
            generate_only: only,
            timeout: self.timeout_ms.map(std::time::Duration::from_millis),
            sequential,
        };
        let session = SessionId::from(self.session.as_str());
        let result = runtime
            .block_on(generator.generate(&session, &manifest.templates, &options))
            .with_context(|| format!("generation failed for session '{}'", self.session))?;
        generator.shutdown();
        Ok(result)
    }
}
