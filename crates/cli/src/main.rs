//! apiprobe - Main Entry Point
//!
//! Exit codes: 0 when every selected definition passed, 1 when any failed,
//! 2 when the harness itself could not run (bad config, unreadable or
//! invalid definitions).

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use apiprobe_cli::commands::{list, run, validate, SourceArgs};
use apiprobe_cli::output::{print_error, OutputFormat};

/// apiprobe - REST API contract verification
#[derive(Parser)]
#[command(name = "apiprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and probes
    Run(run::RunArgs),

    /// Check definitions without sending any request
    Validate(SourceArgs),

    /// List definitions
    List(SourceArgs),
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn async_main(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Validate(args) => validate::execute(args),
        Commands::List(args) => list::execute(args, cli.format).map(|()| true),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(async_main(cli)));

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    }
}
