//! Per-crop scenario samples for the field-scale model.
//!
//! Each crop keeps `sample_pct` percent of its scenarios, never fewer than
//! `min_sample_size` (or the whole crop when it is smaller). Draws come from
//! one seeded generator walking the crops in crop id order over members
//! sorted by scenario id, so a seed reproduces the same files.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;

use aquascen_core::config::RunConfig;
use aquascen_core::error::{Error, Result};
use aquascen_core::model::ScenarioRecord;

use crate::adapters::OutputSet;
use crate::emitter::PwcScenarioRow;

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOptions {
    /// Share of each crop kept (0 to 100].
    pub pct: f64,
    /// Minimum sample size.
    pub min_size: usize,
    /// Generator seed.
    pub seed: u64,
}

impl SampleOptions {
    /// Options from a run configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            pct: config.sample_pct,
            min_size: config.min_sample_size,
            seed: config.sample_seed,
        }
    }
}

/// Sampled scenarios of one crop.
#[derive(Debug, Clone)]
pub struct CropSample<'a> {
    /// Crop id.
    pub crop_id: String,
    /// Crop name.
    pub crop_name: String,
    /// Number of scenarios of the crop.
    pub population: usize,
    /// Picked records, ordered by scenario id.
    pub records: Vec<&'a ScenarioRecord>,
}

/// Sample size for a crop of `population` scenarios.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn sample_size(population: usize, pct: f64, min_size: usize) -> usize {
    let share = (population as f64 * pct / 100.0).floor() as usize;
    share.max(min_size).min(population)
}

/// Draws one sample per crop, ordered by crop id.
#[must_use]
pub fn sample_by_crop<'a>(
    records: &'a [ScenarioRecord],
    options: &SampleOptions,
) -> Vec<CropSample<'a>> {
    let mut by_crop: BTreeMap<&str, Vec<&'a ScenarioRecord>> = BTreeMap::new();
    for r in records {
        by_crop.entry(r.key.crop_id.as_str()).or_default().push(r);
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    by_crop
        .into_iter()
        .map(|(crop_id, mut members)| {
            members.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
            let population = members.len();
            let size = sample_size(population, options.pct, options.min_size);
            let picked = if size < population {
                let mut indices = rand::seq::index::sample(&mut rng, population, size).into_vec();
                indices.sort_unstable();
                indices.into_iter().map(|i| members[i]).collect()
            } else {
                members
            };
            tracing::debug!(crop_id, population, sampled = picked.len(), "crop sampled");
            CropSample {
                crop_id: crop_id.to_string(),
                crop_name: picked
                    .first()
                    .map(|r| r.attributes.land_use.crop_name.clone())
                    .unwrap_or_default(),
                population,
                records: picked,
            }
        })
        .collect()
}

/// File name of a crop's sample. Characters outside `[A-Za-z0-9_-]` become
/// `_`.
#[must_use]
pub fn sample_file_name(crop_id: &str) -> String {
    let safe: String = crop_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("scenarios_pwc_crop{safe}.csv")
}

/// Serializes every sample into `outputs` in the field-scale schema.
///
/// # Errors
///
/// Returns [`Error::Internal`] if two crop ids map to the same file name and
/// [`Error::Serialization`] if a row cannot be written.
pub fn emit_samples(samples: &[CropSample<'_>], outputs: &mut OutputSet) -> Result<()> {
    let mut names = HashSet::new();
    for sample in samples {
        let name = sample_file_name(&sample.crop_id);
        if !names.insert(name.clone()) {
            return Err(Error::internal(format!(
                "crop '{}' collides with another crop on sample file {name}",
                sample.crop_id
            )));
        }
        outputs.add_csv(
            name,
            sample.records.iter().map(|r| PwcScenarioRow::from(*r)),
        )?;
    }
    tracing::info!(crops = samples.len(), "crop samples serialized");
    Ok(())
}
