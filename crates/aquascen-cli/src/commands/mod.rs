//! CLI subcommand implementations.

pub mod prepare;
pub mod run;
pub mod select;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use aquascen_core::config::RunConfig;
use aquascen_core::metadata::RunWarning;
use aquascen_core::model::SelectionResult;
use aquascen_pipeline::adapters::{read_lookup_rows, CsvOverlayProvider};
use aquascen_pipeline::lookup::LookupRows;

use crate::OutputFormat;

/// Opens the overlay and reads the lookup tables named in the configuration.
///
/// # Errors
///
/// Returns an error if any lookup table cannot be read or parsed.
pub fn load_inputs(config: &RunConfig) -> Result<(CsvOverlayProvider, LookupRows)> {
    let overlay = CsvOverlayProvider::new(&config.inputs.overlay);
    let rows = read_lookup_rows(&config.inputs).context("Failed to read lookup tables")?;
    Ok((overlay, rows))
}

/// Prints warnings to stderr in text and table formats.
pub fn print_warnings(warnings: &[RunWarning], format: &OutputFormat) {
    if matches!(format, OutputFormat::Json) || warnings.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("{} {}", "Warnings:".yellow(), warnings.len());
    for warning in warnings {
        eprintln!("  {}", describe_warning(warning));
    }
}

fn describe_warning(warning: &RunWarning) -> String {
    match warning {
        RunWarning::SkewedWatershed {
            watershed_id,
            scenario_id,
            fraction,
            members,
        } => format!(
            "watershed {watershed_id}: {scenario_id} covers {:.1}% of {members} members",
            fraction * 100.0
        ),
        RunWarning::SmallGroup {
            group,
            endpoint,
            population,
            minimum,
        } => format!("{group} [{endpoint}]: {population} scenarios (minimum {minimum})"),
        RunWarning::IncompleteGroup {
            group,
            endpoint,
            missing,
        } => format!("{group} [{endpoint}]: {} scenarios without output", missing.len()),
    }
}

/// Prints committed file paths.
pub fn print_files(files: &[PathBuf]) {
    println!();
    println!("Files:");
    for file in files {
        println!("  {}", file.display());
    }
}

/// Prints selections in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_selections(results: &[SelectionResult], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(results).context("Failed to serialize selections")?
            );
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No selections");
                return Ok(());
            }
            for r in results {
                println!(
                    "  {} [{}] {} rank {}/{} value {} (threshold {})",
                    r.group,
                    r.endpoint,
                    r.scenario_id.green(),
                    r.rank,
                    r.population,
                    r.value,
                    r.threshold
                );
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct SelectionTableRow {
                #[tabled(rename = "Crop")]
                crop: String,
                #[tabled(rename = "Region")]
                region: String,
                #[tabled(rename = "Endpoint")]
                endpoint: String,
                #[tabled(rename = "Scenario")]
                scenario_id: String,
                #[tabled(rename = "Rank")]
                rank: String,
                #[tabled(rename = "Value")]
                value: String,
                #[tabled(rename = "Threshold")]
                threshold: String,
            }

            let rows: Vec<_> = results
                .iter()
                .map(|r| SelectionTableRow {
                    crop: format!("{} ({})", r.crop_name, r.group.crop_id),
                    region: r.group.region.clone(),
                    endpoint: r.endpoint.to_string(),
                    scenario_id: r.scenario_id.to_string(),
                    rank: format!("{}/{}", r.rank, r.population),
                    value: format!("{:.6}", r.value),
                    threshold: format!("{:.6}", r.threshold),
                })
                .collect();

            if rows.is_empty() {
                println!("No selections");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }
    Ok(())
}
