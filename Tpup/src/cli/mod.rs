//! TPUP CLI - Command-line interface for texture pack unpacking and repacking

pub mod commands;
pub mod progress;

use clap::Parser;
use commands::Commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tpup", version)]
#[command(about = "TPUP: texture pack unpacker and repacker", long_about = None)]
struct Cli {
    /// Show per-item debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Run the TPUP CLI.
///
/// Returns whether the command succeeded. A run that finished with item
/// errors returns `Ok(false)`.
pub fn run_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    cli.command.execute()
}

/// Install the fmt subscriber. `RUST_LOG` takes precedence over `-v`.
fn setup_logging(verbose: bool) {
    let default = if verbose { "tpup=debug" } else { "tpup=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
