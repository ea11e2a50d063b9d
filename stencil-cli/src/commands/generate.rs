//! `stencil generate`: render every template and write its fragments.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use stencil_pipeline::{GenerationResult, PackageResult};

use super::SourceArgs;
use crate::writer::{atomic_write, fragment_path, WriteOptions, WriteResult};

/// Written to the output directory by `--gen-result-file`.
pub const GEN_RESULT_FILE: &str = "genResult.json";

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output directory for generated files.
    #[arg(long)]
    pub out: PathBuf,

    /// Only render templates in these categories.
    #[arg(long = "only", value_name = "CATEGORY")]
    pub only: Vec<String>,

    /// Show what would be written without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the generation result as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,

    /// Render one job at a time, in order, instead of fanning out to the pool.
    #[arg(long)]
    pub sequential: bool,

    /// Keep the previous version of every replaced file as `<name>~`.
    #[arg(long)]
    pub backup: bool,

    /// Also write the generation result as `genResult.json` in the output directory.
    #[arg(long)]
    pub gen_result_file: bool,
}

impl GenerateArgs {
    pub fn run(self) -> Result<()> {
        let only = (!self.only.is_empty()).then(|| self.only.clone());
        let result = self.source.generate(only, self.sequential)?;
        let options = WriteOptions {
            dry_run: self.dry_run,
            backup: self.backup,
        };

        let mut writes = Vec::new();
        for package in &result.packages {
            for fragment in package.fragments() {
                let path = fragment_path(&self.out, &fragment.name)
                    .with_context(|| format!("package '{}'", package.category))?;
                writes.push(atomic_write(&path, &fragment.content, options)?);
            }
        }
        if self.gen_result_file {
            let report = serde_json::to_string_pretty(&result)?;
            writes.push(atomic_write(&self.out.join(GEN_RESULT_FILE), &report, options)?);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_summary(&result, &writes, self.dry_run);
        }

        let (_, partial, failed) = result.summary();
        if partial + failed > 0 {
            bail!("{} package(s) partially failed, {} package(s) failed", partial, failed);
        }
        Ok(())
    }
}

fn print_summary(result: &GenerationResult, writes: &[WriteResult], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    for diag in &result.helper_diagnostics {
        println!(
            "{prefix}{} helper '{}' from {} replaced by {}",
            "⚠".yellow(),
            diag.name,
            diag.previous,
            diag.replacement
        );
    }
    for package in &result.packages {
        print_package(prefix, package);
    }
    for w in writes {
        match w {
            WriteResult::Written { path, backup: None } => println!("  ✎  {}", path.display()),
            WriteResult::Written {
                path,
                backup: Some(backup),
            } => println!("  ✎  {} (previous kept as {})", path.display(), backup.display()),
            WriteResult::WouldWrite { path } => println!("  ~  {}", path.display()),
            WriteResult::Unchanged { path } => println!("  ·  {}", path.display()),
        }
    }
    let (ok, partial, failed) = result.summary();
    println!(
        "{prefix}session '{}': {ok} ok, {partial} partial, {failed} failed in {} ms",
        result.session_id, result.duration_ms
    );
}

fn print_package(prefix: &str, package: &PackageResult) {
    let mark = if package.is_success() {
        "✓".green()
    } else if package.is_partial() {
        "◐".yellow()
    } else {
        "✗".red()
    };
    println!(
        "{prefix}{mark} '{}' {} ({} job(s), {} fragment(s))",
        package.category,
        package.status_label(),
        package.jobs,
        package.fragments().len()
    );
    for failure in package.failures() {
        let at = match (&failure.iteration, failure.index) {
            (Some(key), _) => format!("iteration '{key}'"),
            (None, Some(index)) => format!("job {index}"),
            (None, None) => "expansion".to_string(),
        };
        println!("    {at}: {}", failure.error);
    }
}
