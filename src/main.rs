use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docweave::{
    AnthropicClient, CommandExtractor, DocweaveConfig, GenerationScheduler,
};

#[derive(Parser, Debug)]
#[command(name = "docweave", version, about = "Synthesize missing docstrings across a Python source tree")]
struct Args {
    /// Root of the source tree to document
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Path to a docweave.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Synthesize and report, but write nothing back to the tree
    #[arg(long)]
    dry_run: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("docweave=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docweave=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DocweaveConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let api_key = config
        .resolve_api_key()
        .context("No API key: set ANTHROPIC_API_KEY or api.api_key in docweave.toml")?;

    let client = Arc::new(AnthropicClient::new(
        api_key,
        config.api.model.clone(),
        config.api.max_tokens,
        config.api.temperature,
        config.api.timeout_seconds,
    ));
    let extractor = Arc::new(CommandExtractor::new(
        config.extractor.command.clone(),
        config.extractor.args.clone(),
    ));

    let scheduler = GenerationScheduler::new(extractor, client, &config.generation)
        .context("Failed to initialize scheduler")?
        .with_dry_run(args.dry_run);

    let report = scheduler
        .run(&args.root)
        .await
        .context("Docstring generation run failed")?;

    for pass in &report.passes {
        info!(
            pass = pass.pass,
            scheduled = pass.scheduled,
            documented = pass.documented,
            failed = pass.failed,
            "pass summary"
        );
    }

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }

    Ok(())
}
