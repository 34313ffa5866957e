//! aquascen CLI - scenario preparation and representative selection.
//!
//! The main entry point for the `aquascen` binary.

use anyhow::Result;
use clap::Parser;

use aquascen_cli::{Cli, Commands};
use aquascen_core::observability::init_logging;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    init_logging(cli.log_format.into());
    let config = cli.config();

    // Create runtime and execute
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Validate(args) => aquascen_cli::commands::validate::execute(&args, &config),
            Commands::Prepare(args) => aquascen_cli::commands::prepare::execute(&args, &config),
            Commands::Select(args) => aquascen_cli::commands::select::execute(&args, &config),
            Commands::Run(args) => aquascen_cli::commands::run::execute(args, &config).await,
        }
    })
}
