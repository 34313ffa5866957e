//! Run command - prepare, run the batch model and select in one step.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use aquascen_core::scenario_key::TargetModel;
use aquascen_pipeline::runner::{BatchModelRunner, PrecomputedOutput, ProcessRunner};
use aquascen_pipeline::Pipeline;

use crate::commands::{load_inputs, print_files, print_selections, print_warnings};
use crate::{Config, OutputFormat};

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Target model (`model_A` or `model_B`).
    #[arg(long)]
    pub model: Option<TargetModel>,

    /// Batch model executable.
    #[arg(long, required_unless_present = "precomputed")]
    pub model_command: Option<PathBuf>,

    /// Argument passed to the model; `{scenarios}`, `{output}` and
    /// `{work_dir}` are substituted. Repeat for several arguments.
    #[arg(long = "model-arg", allow_hyphen_values = true)]
    pub model_args: Vec<String>,

    /// Output file name the model writes into its work directory.
    #[arg(long, default_value = "model_output.txt")]
    pub model_output_name: String,

    /// Kill the model after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Use an existing model output file instead of running the model.
    #[arg(long, conflicts_with = "model_command")]
    pub precomputed: Option<PathBuf>,
}

impl RunArgs {
    fn runner(&self) -> Result<Box<dyn BatchModelRunner>> {
        if let Some(path) = &self.precomputed {
            return Ok(Box::new(PrecomputedOutput::new(path)));
        }
        let program = self
            .model_command
            .as_ref()
            .context("Either --model-command or --precomputed is required")?;
        let mut runner = ProcessRunner::new(program)
            .with_args(self.model_args.iter().cloned())
            .with_output_name(self.model_output_name.clone());
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(Duration::from_secs(secs));
        }
        Ok(Box::new(runner))
    }
}

/// Execute the run command.
///
/// Outputs of both stages are committed together once the model has
/// succeeded and selection is complete.
///
/// # Errors
///
/// Returns an error if any stage fails, the model fails, or the run is
/// interrupted. Nothing is written in any of these cases.
pub async fn execute(args: RunArgs, config: &Config) -> Result<()> {
    let mut run = config.run_config()?;
    if let Some(model) = args.model {
        run.target_model = model;
    }
    let (overlay, rows) = load_inputs(&run)?;
    let pipeline = Pipeline::new(run).context("Invalid run configuration")?;
    let runner = args.runner()?;

    let report = pipeline
        .run(&overlay, rows, runner.as_ref())
        .await
        .with_context(|| format!("Run {} failed", pipeline.run_id()))?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "runId": report.run_id.to_string(),
                    "scenarios": report.scenarios,
                    "recipes": report.recipes,
                    "selections": report.selections,
                    "files": report.files,
                    "warnings": report.warnings,
                }))
                .context("Failed to serialize response")?
            );
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!("{}", "Run completed".green());
            println!();
            println!("  Run ID:    {}", report.run_id);
            println!("  Scenarios: {}", report.scenarios);
            if report.recipes > 0 {
                println!("  Recipes:   {}", report.recipes);
            }
            println!();
            print_selections(&report.selections, &config.format)?;
            print_files(&report.files);
        }
    }
    print_warnings(&report.warnings, &config.format);
    Ok(())
}
