//! Select command - pick representative scenarios from model output.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use aquascen_core::config::PercentileMethod;
use aquascen_pipeline::Pipeline;

use crate::commands::{print_files, print_selections, print_warnings};
use crate::{Config, OutputFormat};

/// Arguments for the select command.
#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Batch model output file.
    #[arg()]
    pub output: PathBuf,

    /// Scenario file the model was run on (defaults to the one in the
    /// output directory).
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Target percentile (0 to 100).
    #[arg(long)]
    pub percentile: Option<f64>,

    /// Percentile method (`nearest_rank` or `area_weighted`).
    #[arg(long)]
    pub method: Option<PercentileMethod>,

    /// Also write the per-member ranking table.
    #[arg(long)]
    pub ranking: bool,
}

/// Execute the select command.
///
/// # Errors
///
/// Returns an error if the scenario file or the model output cannot be read,
/// if they disagree, or if a group cannot be selected.
pub fn execute(args: &SelectArgs, config: &Config) -> Result<()> {
    let mut run = config.run_config()?;
    if let Some(percentile) = args.percentile {
        run.percentile = percentile;
    }
    if let Some(method) = args.method {
        run.percentile_method = method;
    }
    run.write_ranking |= args.ranking;
    let pipeline = Pipeline::new(run).context("Invalid run configuration")?;

    let catalog = pipeline
        .load_catalog(args.scenarios.as_deref())
        .context("Failed to load emitted scenarios")?;
    let text = std::fs::read_to_string(&args.output)
        .with_context(|| format!("Failed to read model output {}", args.output.display()))?;
    let selected = pipeline
        .select(&catalog, &text, &args.output.display().to_string())
        .context("Scenario selection failed")?;
    let warnings = selected.metadata.warnings.clone();
    let results = selected.outcome.results;
    let files = pipeline.commit(selected.outputs).with_context(|| {
        format!(
            "Failed to write outputs to {}",
            pipeline.config().output_dir.display()
        )
    })?;

    print_selections(&results, &config.format)?;
    if !matches!(config.format, OutputFormat::Json) {
        print_files(&files);
    }
    print_warnings(&warnings, &config.format);
    Ok(())
}
