//! Run Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use apiprobe_harness::SuiteRunner;

use super::SourceArgs;
use crate::output::{print_report, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Definitions run in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output directory for results
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Returns whether every selected definition passed
pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<bool> {
    let mut config = args.source.load_config()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    config.validate()?;

    let definitions = args.source.load_definitions()?;
    for definition in &definitions {
        definition.check_base_url(config.base_url.as_deref())?;
    }

    info!("Loaded {} definition(s) from {}", definitions.len(), args.source.specs.display());
    let runner = SuiteRunner::with_reqwest(config)?;
    let report = runner.run_all(&definitions).await;

    runner.write_results(&report)?;
    print_report(&report, format)?;

    Ok(report.success())
}
