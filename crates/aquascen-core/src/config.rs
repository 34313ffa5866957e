//! Run configuration.
//!
//! Loaded from a JSON file (every field optional, see [`RunConfig::default`]),
//! then overridden from `AQUASCEN_*` environment variables, then validated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical_json;
use crate::error::{Error, Result};
pub use crate::scenario_key::{IdScheme, TargetModel};

/// Percentile convention used by the selector.
///
/// Defaults to [`Self::NearestRank`], which depends only on endpoint values.
/// Workflows that weight scenarios by the area they represent should set
/// `area_weighted` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileMethod {
    /// Threshold is the value at rank `ceil(p * n / 100)`.
    #[default]
    NearestRank,
    /// Members are positioned by cumulative area, midpoint convention.
    AreaWeighted,
}

impl std::fmt::Display for PercentileMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NearestRank => write!(f, "nearest_rank"),
            Self::AreaWeighted => write!(f, "area_weighted"),
        }
    }
}

impl std::str::FromStr for PercentileMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "nearest_rank" => Ok(Self::NearestRank),
            "area_weighted" => Ok(Self::AreaWeighted),
            other => Err(Error::config(format!(
                "unknown percentile method '{other}' (expected nearest_rank or area_weighted)"
            ))),
        }
    }
}

/// Paths of the file-based inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    /// Overlay spatial index.
    pub overlay: PathBuf,
    /// Soil properties table.
    pub soils: PathBuf,
    /// Climate stations table.
    pub climate: PathBuf,
    /// Crop / land-use mapping table.
    pub land_use: PathBuf,
    /// Watershed metadata table.
    pub watersheds: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            overlay: PathBuf::from("inputs/overlay.csv"),
            soils: PathBuf::from("inputs/soils.csv"),
            climate: PathBuf::from("inputs/climate.csv"),
            land_use: PathBuf::from("inputs/land_use.csv"),
            watersheds: PathBuf::from("inputs/watersheds.csv"),
        }
    }
}

impl InputPaths {
    /// Resolves relative paths against `base`.
    #[must_use]
    pub fn relative_to(&self, base: &Path) -> Self {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        Self {
            overlay: join(&self.overlay),
            soils: join(&self.soils),
            climate: join(&self.climate),
            land_use: join(&self.land_use),
            watersheds: join(&self.watersheds),
        }
    }
}

/// Configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Model the scenarios are prepared for.
    pub target_model: TargetModel,
    /// Target percentile for representative selection (0 to 100).
    pub percentile: f64,
    /// Tolerance on the recipe fraction sum.
    pub epsilon_tolerance: f64,
    /// Scenario id derivation.
    pub id_scheme: IdScheme,
    /// Percentile convention. Defaults to `nearest_rank`; area weighting is
    /// opt-in.
    pub percentile_method: PercentileMethod,
    /// Groups smaller than this are flagged in run metadata.
    pub min_group_size: usize,
    /// Watersheds whose dominant member reaches this fraction are flagged.
    pub skew_warning_fraction: f64,
    /// Endpoint column names used when the model output has no header.
    pub endpoints: Vec<String>,
    /// Only select groups for these crops, when set.
    pub crop_filter: Option<Vec<String>>,
    /// Only select groups in these regions, when set.
    pub region_filter: Option<Vec<String>>,
    /// Also write the per-member ranking table.
    pub write_ranking: bool,
    /// Field-model crop samples keep this share of each crop's scenarios
    /// (0 to 100).
    pub sample_pct: f64,
    /// Lower bound on a crop sample; smaller crops are kept whole.
    pub min_sample_size: usize,
    /// Seed of the crop sampler.
    pub sample_seed: u64,
    /// Input file locations.
    pub inputs: InputPaths,
    /// Directory all outputs are committed into.
    pub output_dir: PathBuf,
}

/// Default selection percentile.
pub const DEFAULT_PERCENTILE: f64 = 90.0;
/// Default recipe fraction tolerance.
pub const DEFAULT_EPSILON: f64 = 1e-9;
/// Default share of each crop kept in its sample.
pub const DEFAULT_SAMPLE_PCT: f64 = 35.0;
/// Default minimum crop sample size.
pub const DEFAULT_MIN_SAMPLE_SIZE: usize = 1000;

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_model: TargetModel::default(),
            percentile: DEFAULT_PERCENTILE,
            epsilon_tolerance: DEFAULT_EPSILON,
            id_scheme: IdScheme::default(),
            percentile_method: PercentileMethod::default(),
            min_group_size: 10,
            skew_warning_fraction: 0.95,
            endpoints: vec!["acute".into(), "chronic".into(), "cancer".into()],
            crop_filter: None,
            region_filter: None,
            write_ranking: false,
            sample_pct: DEFAULT_SAMPLE_PCT,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            sample_seed: 0,
            inputs: InputPaths::default(),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl RunConfig {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or has unknown values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid config JSON: {e}")))
    }

    /// Reads a JSON configuration file. Relative input paths and the output
    /// directory are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, or the errors of
    /// [`Self::from_json_str`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            config.inputs = config.inputs.relative_to(base);
            if config.output_dir.is_relative() {
                config.output_dir = base.join(&config.output_dir);
            }
        }
        Ok(config)
    }

    /// Loads configuration: file (or defaults), environment overrides, then
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::from_file`], [`Self::apply_env`] or
    /// [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `AQUASCEN_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but unparsable.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(env_string)
    }

    /// Applies overrides from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but unparsable.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AQUASCEN_TARGET_MODEL") {
            self.target_model = v.parse()?;
        }
        if let Some(v) = lookup("AQUASCEN_PERCENTILE") {
            self.percentile = parse_f64("AQUASCEN_PERCENTILE", &v)?;
        }
        if let Some(v) = lookup("AQUASCEN_EPSILON_TOLERANCE") {
            self.epsilon_tolerance = parse_f64("AQUASCEN_EPSILON_TOLERANCE", &v)?;
        }
        if let Some(v) = lookup("AQUASCEN_ID_SCHEME") {
            self.id_scheme = v.parse()?;
        }
        if let Some(v) = lookup("AQUASCEN_PERCENTILE_METHOD") {
            self.percentile_method = v.parse()?;
        }
        if let Some(v) = lookup("AQUASCEN_SAMPLE_SEED") {
            self.sample_seed = v.trim().parse::<u64>().map_err(|e| {
                Error::config(format!(
                    "AQUASCEN_SAMPLE_SEED must be an integer, got '{v}': {e}"
                ))
            })?;
        }
        if let Some(v) = lookup("AQUASCEN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(Error::config(format!(
                "percentile must be within 0..=100, got {}",
                self.percentile
            )));
        }
        if !self.epsilon_tolerance.is_finite() || self.epsilon_tolerance <= 0.0 {
            return Err(Error::config(format!(
                "epsilon_tolerance must be finite and positive, got {}",
                self.epsilon_tolerance
            )));
        }
        if !(self.skew_warning_fraction > 0.0 && self.skew_warning_fraction <= 1.0) {
            return Err(Error::config(format!(
                "skew_warning_fraction must be within (0, 1], got {}",
                self.skew_warning_fraction
            )));
        }
        if !(self.sample_pct > 0.0 && self.sample_pct <= 100.0) {
            return Err(Error::config(format!(
                "sample_pct must be within (0, 100], got {}",
                self.sample_pct
            )));
        }
        if self.endpoints.is_empty() || self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::config("endpoints must be a non-empty list of names"));
        }
        Ok(())
    }

    /// SHA-256 fingerprint of the options that influence outputs.
    ///
    /// Paths are excluded so relocating inputs does not change the
    /// fingerprint. Floats are hashed through their shortest round-trip text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if canonicalization fails.
    pub fn fingerprint(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Preimage<'a> {
            target_model: &'static str,
            percentile: String,
            epsilon_tolerance: String,
            id_scheme: String,
            percentile_method: String,
            min_group_size: usize,
            skew_warning_fraction: String,
            endpoints: &'a [String],
            crop_filter: Option<&'a [String]>,
            region_filter: Option<&'a [String]>,
            sample_pct: String,
            min_sample_size: usize,
            sample_seed: u64,
        }

        let preimage = Preimage {
            target_model: self.target_model.config_name(),
            percentile: self.percentile.to_string(),
            epsilon_tolerance: self.epsilon_tolerance.to_string(),
            id_scheme: self.id_scheme.to_string(),
            percentile_method: self.percentile_method.to_string(),
            min_group_size: self.min_group_size,
            skew_warning_fraction: self.skew_warning_fraction.to_string(),
            endpoints: &self.endpoints,
            crop_filter: self.crop_filter.as_deref(),
            region_filter: self.region_filter.as_deref(),
            sample_pct: self.sample_pct.to_string(),
            min_sample_size: self.min_sample_size,
            sample_seed: self.sample_seed,
        };
        let canonical = canonical_json::to_canonical_bytes(&preimage)
            .map_err(|e| Error::serialization(format!("failed to canonicalize config: {e}")))?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&canonical))))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_f64(name: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::config(format!("{name} must be a number, got '{value}': {e}")))
}
