//! Stencil: parallel template generation for stored device sessions.
//!
//! # Usage
//!
//! ```text
//! stencil generate --manifest <gen-templates.json> --store <dir> --session <id> --out <dir>
//!                  [--only <category>..] [--config stencil.yaml] [--dry-run] [--json]
//! stencil preview  --manifest <gen-templates.json> --store <dir> --session <id>
//!                  --template <category> [--fragment <name>] [--page <n>]
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

mod commands;
mod writer;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{generate::GenerateArgs, preview::PreviewArgs};

#[derive(Parser, Debug)]
#[command(
    name = "stencil",
    version,
    about = "Render code-generation templates against a stored session",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render templates and write their fragments to an output directory.
    Generate(GenerateArgs),

    /// Render one template and print a page of one of its fragments.
    Preview(PreviewArgs),
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => args.run(),
        Commands::Preview(args) => args.run(),
    }
}
