//! Prepare command - emit scenarios and watershed recipes.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use aquascen_core::scenario_key::{IdScheme, TargetModel};
use aquascen_pipeline::Pipeline;

use crate::commands::{load_inputs, print_files, print_warnings};
use crate::{Config, OutputFormat};

/// Arguments for the prepare command.
#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Target model (`model_A` or `model_B`).
    #[arg(long)]
    pub model: Option<TargetModel>,

    /// Scenario id scheme (`deterministic_hash` or `sequential`).
    #[arg(long)]
    pub id_scheme: Option<IdScheme>,
}

/// Execute the prepare command.
///
/// # Errors
///
/// Returns an error if any input is invalid or the outputs cannot be
/// committed. Nothing is written in either case.
pub fn execute(args: &PrepareArgs, config: &Config) -> Result<()> {
    let mut run = config.run_config()?;
    if let Some(model) = args.model {
        run.target_model = model;
    }
    if let Some(scheme) = args.id_scheme {
        run.id_scheme = scheme;
    }
    let (overlay, rows) = load_inputs(&run)?;
    let pipeline = Pipeline::new(run).context("Invalid run configuration")?;

    let prepared = pipeline
        .prepare(&overlay, rows)
        .context("Scenario preparation failed")?;
    let warnings = prepared.metadata.warnings.clone();
    let scenarios = prepared.records.len();
    let recipes = prepared.recipes.as_ref().map_or(0, |r| r.recipes.len());
    let files = pipeline.commit(prepared.outputs).with_context(|| {
        format!(
            "Failed to write outputs to {}",
            pipeline.config().output_dir.display()
        )
    })?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "runId": pipeline.run_id().to_string(),
                    "targetModel": pipeline.config().target_model.to_string(),
                    "scenarios": scenarios,
                    "recipes": recipes,
                    "files": files,
                    "warnings": warnings,
                }))
                .context("Failed to serialize response")?
            );
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!("{}", "Scenarios prepared".green());
            println!();
            println!("  Run ID:       {}", pipeline.run_id());
            println!("  Target model: {}", pipeline.config().target_model);
            println!("  Scenarios:    {scenarios}");
            if pipeline.config().target_model.builds_recipes() {
                println!("  Recipes:      {recipes}");
            }
            print_files(&files);
        }
    }
    print_warnings(&warnings, &config.format);
    Ok(())
}
