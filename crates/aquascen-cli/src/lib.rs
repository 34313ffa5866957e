//! # aquascen-cli
//!
//! Command-line interface for the aquascen scenario pipeline.
//!
//! ## Commands
//!
//! - `aquascen validate` - Check inputs end to end without writing anything
//! - `aquascen prepare` - Emit scenarios, crop summary and watershed recipes
//! - `aquascen select` - Select representative scenarios from model output
//! - `aquascen run` - Prepare, run the batch model, select, commit together
//!
//! ## Configuration
//!
//! Run options come from a JSON file (`--config` or `AQUASCEN_CONFIG`) and
//! the `AQUASCEN_*` overrides documented on
//! [`aquascen_core::config::RunConfig`]. Command flags override both.
//!
//! - `AQUASCEN_CONFIG` - Run configuration file
//! - `AQUASCEN_FORMAT` - Output format (`text`, `json`, `table`)
//! - `AQUASCEN_LOG_FORMAT` - Log format (`pretty`, `json`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use aquascen_core::config::RunConfig;
use aquascen_core::observability::LogFormat;

/// aquascen - aquatic exposure scenario pipeline.
#[derive(Debug, Parser)]
#[command(name = "aquascen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run configuration file (JSON).
    #[arg(long, short = 'c', env = "AQUASCEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output directory (overrides the configuration).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, env = "AQUASCEN_FORMAT", default_value = "text")]
    pub format: OutputFormat,

    /// Log format.
    #[arg(long, env = "AQUASCEN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            config_path: self.config.clone(),
            output_dir: self.output_dir.clone(),
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check overlay and lookup inputs without writing outputs.
    Validate(commands::validate::ValidateArgs),
    /// Emit scenarios, crop summary and (for watershed models) recipes.
    Prepare(commands::prepare::PrepareArgs),
    /// Select representative scenarios from batch model output.
    Select(commands::select::SelectArgs),
    /// Prepare, run the batch model and select in one step.
    Run(commands::run::RunArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Pretty-printed logs.
    #[default]
    Pretty,
    /// JSON structured logs.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Run configuration file.
    pub config_path: Option<PathBuf>,
    /// Output directory override.
    pub output_dir: Option<PathBuf>,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Loads the run configuration: file, environment, then CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any value is invalid.
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut run = RunConfig::load(self.config_path.as_deref()).with_context(|| {
            match &self.config_path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration from the environment".to_string(),
            }
        })?;
        if let Some(dir) = &self.output_dir {
            run.output_dir.clone_from(dir);
        }
        tracing::debug!(
            target_model = %run.target_model,
            id_scheme = %run.id_scheme,
            output_dir = %run.output_dir.display(),
            "run configuration loaded"
        );
        Ok(run)
    }
}
