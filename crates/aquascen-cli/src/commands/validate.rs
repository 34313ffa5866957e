//! Validate command - check inputs end to end without writing outputs.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use aquascen_core::scenario_key::{IdScheme, TargetModel};
use aquascen_pipeline::Pipeline;

use crate::commands::{load_inputs, print_warnings};
use crate::{Config, OutputFormat};

/// Arguments for the validate command.
#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Target model (`model_A` or `model_B`).
    #[arg(long)]
    pub model: Option<TargetModel>,

    /// Scenario id scheme (`deterministic_hash` or `sequential`).
    #[arg(long)]
    pub id_scheme: Option<IdScheme>,
}

/// Execute the validate command.
///
/// Runs overlay validation, the join, the emitter and (for watershed models)
/// the recipe builder in memory, then discards the result.
///
/// # Errors
///
/// Returns an error if the configuration or any input is invalid.
pub fn execute(args: &ValidateArgs, config: &Config) -> Result<()> {
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
        .context("Input validation failed")?;

    let counts = &prepared.metadata.counts;
    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "valid": true,
                    "runId": pipeline.run_id().to_string(),
                    "targetModel": pipeline.config().target_model.to_string(),
                    "counts": counts,
                    "warnings": prepared.metadata.warnings,
                }))
                .context("Failed to serialize response")?
            );
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!("{}", "Inputs are valid".green());
            println!();
            println!("  Target model: {}", pipeline.config().target_model);
            for (name, value) in counts {
                println!("  {name}: {value}");
            }
        }
    }
    print_warnings(&prepared.metadata.warnings, &config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: ValidateArgs,
        }

        let cli = TestCli::parse_from(["test", "--model", "model_B", "--id-scheme", "sequential"]);
        assert_eq!(cli.args.model, Some(TargetModel::Sam));
        assert_eq!(cli.args.id_scheme, Some(IdScheme::Sequential));
    }
}
