//! Semantic scenario identity.
//!
//! A scenario is identified by its [`CompositeKey`]: soil x climate zone (and
//! its resolved station) x land use x watershed x crop x target model. Scenario ids are a pure function
//! of that key (or, for the sequential scheme, of the sorted key set), so the
//! emitter and the output parser agree on ids without sharing state, and a
//! re-run over the same inputs reproduces every id.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical_json;
use crate::error::{ConsistencyViolation, Error, Result};
use crate::id::ScenarioId;

/// Version of the hashed key preimage. Bump when the key layout changes.
pub const SCENARIO_KEY_VERSION: u32 = 2;

/// Number of hex digits kept from the SHA-256 digest (96 bits).
pub const HASH_ID_HEX_LEN: usize = 24;

/// Minimum digit width of sequential ids.
pub const SEQUENTIAL_ID_MIN_WIDTH: usize = 6;

/// The model the scenarios are prepared for. Chosen once per run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TargetModel {
    /// Field-scale model (PWC). Scenario tables per crop, no recipes.
    #[default]
    #[serde(rename = "model_A", alias = "pwc")]
    Pwc,
    /// Watershed-scale model (SAM). Scenario table plus watershed recipes.
    #[serde(rename = "model_B", alias = "sam")]
    Sam,
}

impl TargetModel {
    /// Whether watershed recipes are built for this model.
    #[must_use]
    pub const fn builds_recipes(self) -> bool {
        matches!(self, Self::Sam)
    }

    /// Whether per-crop scenario samples are drawn for this model.
    #[must_use]
    pub const fn samples_crops(self) -> bool {
        matches!(self, Self::Pwc)
    }

    /// Short lowercase label used in file names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pwc => "pwc",
            Self::Sam => "sam",
        }
    }

    /// Configuration name (`model_A` / `model_B`).
    #[must_use]
    pub const fn config_name(self) -> &'static str {
        match self {
            Self::Pwc => "model_A",
            Self::Sam => "model_B",
        }
    }
}

impl fmt::Display for TargetModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl std::str::FromStr for TargetModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "model_A" | "model_a" | "pwc" => Ok(Self::Pwc),
            "model_B" | "model_b" | "sam" => Ok(Self::Sam),
            other => Err(Error::config(format!(
                "unknown target model '{other}' (expected model_A or model_B)"
            ))),
        }
    }
}

/// How scenario ids are derived from composite keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    /// Truncated SHA-256 of the canonical key. Stable across input sets.
    #[default]
    DeterministicHash,
    /// Position of the key in the sorted key set. Compact, but only stable
    /// for an identical key set.
    Sequential,
}

impl IdScheme {
    /// Whether `id` has the shape this scheme produces.
    #[must_use]
    pub fn accepts(self, id: &ScenarioId) -> bool {
        let body = id.body();
        match self {
            Self::DeterministicHash => {
                body.len() == HASH_ID_HEX_LEN && body.chars().all(|c| c.is_ascii_hexdigit())
            }
            Self::Sequential => {
                body.len() >= SEQUENTIAL_ID_MIN_WIDTH && body.chars().all(|c| c.is_ascii_digit())
            }
        }
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeterministicHash => write!(f, "deterministic_hash"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

impl std::str::FromStr for IdScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "deterministic_hash" => Ok(Self::DeterministicHash),
            "sequential" => Ok(Self::Sequential),
            other => Err(Error::config(format!(
                "unknown id scheme '{other}' (expected deterministic_hash or sequential)"
            ))),
        }
    }
}

/// Resolved composite key of a scenario.
///
/// Does NOT include the overlay unit id: two runs over re-tiled overlays that
/// resolve to the same key produce the same scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    /// Soil map unit id.
    pub soil_id: String,
    /// Climate zone id from the overlay.
    pub climate_id: String,
    /// Climate station resolved for the zone. Several zones may share one.
    pub station_id: String,
    /// Land-use class id.
    pub land_use_id: String,
    /// Watershed id.
    pub watershed_id: String,
    /// Crop id.
    pub crop_id: String,
    /// Target model.
    pub model: TargetModel,
}

#[derive(Serialize)]
struct KeyPreimage<'a> {
    version: u32,
    model: &'static str,
    soil: &'a str,
    climate: &'a str,
    station: &'a str,
    land_use: &'a str,
    watershed: &'a str,
    crop: &'a str,
}

impl CompositeKey {
    /// Human-readable canonical form used in logs and error reports.
    ///
    /// Format: `{model}/{watershed}/{soil}/{climate}/{station}/{land_use}/{crop}`
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}/{}",
            self.model.config_name(),
            self.watershed_id,
            self.soil_id,
            self.climate_id,
            self.station_id,
            self.land_use_id,
            self.crop_id
        )
    }

    /// Hash-derived scenario id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the key preimage cannot be
    /// canonicalized.
    pub fn hashed_id(&self) -> Result<ScenarioId> {
        let preimage = KeyPreimage {
            version: SCENARIO_KEY_VERSION,
            model: self.model.config_name(),
            soil: &self.soil_id,
            climate: &self.climate_id,
            station: &self.station_id,
            land_use: &self.land_use_id,
            watershed: &self.watershed_id,
            crop: &self.crop_id,
        };
        let canonical = canonical_json::to_canonical_bytes(&preimage).map_err(|e| {
            Error::serialization(format!("failed to canonicalize scenario key: {e}"))
        })?;

        let mut hasher = Sha256::new();
        hasher.update(format!("aquascen-scenario:v{SCENARIO_KEY_VERSION}:").as_bytes());
        hasher.update(&canonical);
        let digest = hex::encode(hasher.finalize());
        ScenarioId::from_body(&digest[..HASH_ID_HEX_LEN])
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Field-wise, so ids containing '/' cannot alias each other.
        self.model
            .cmp(&other.model)
            .then_with(|| self.watershed_id.cmp(&other.watershed_id))
            .then_with(|| self.soil_id.cmp(&other.soil_id))
            .then_with(|| self.climate_id.cmp(&other.climate_id))
            .then_with(|| self.station_id.cmp(&other.station_id))
            .then_with(|| self.land_use_id.cmp(&other.land_use_id))
            .then_with(|| self.crop_id.cmp(&other.crop_id))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Assigns scenario ids for one run under a fixed [`IdScheme`].
///
/// For the sequential scheme the assigner is built from the full key set so
/// that numbering does not depend on the order keys arrive in.
#[derive(Debug, Clone)]
pub struct ScenarioIdAssigner {
    scheme: IdScheme,
    sequence: BTreeMap<CompositeKey, usize>,
    width: usize,
}

impl ScenarioIdAssigner {
    /// Creates an assigner over the complete set of keys of the run.
    pub fn new<'a>(scheme: IdScheme, keys: impl IntoIterator<Item = &'a CompositeKey>) -> Self {
        let mut sequence = BTreeMap::new();
        if scheme == IdScheme::Sequential {
            for key in keys {
                sequence.entry(key.clone()).or_insert(0);
            }
            for (i, slot) in sequence.values_mut().enumerate() {
                *slot = i + 1;
            }
        }
        let width = sequence.len().to_string().len().max(SEQUENTIAL_ID_MIN_WIDTH);
        Self {
            scheme,
            sequence,
            width,
        }
    }

    /// The scheme in force.
    #[must_use]
    pub const fn scheme(&self) -> IdScheme {
        self.scheme
    }

    /// Returns the id of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a sequential assigner is asked for a key
    /// outside the set it was built from.
    pub fn id_for(&self, key: &CompositeKey) -> Result<ScenarioId> {
        match self.scheme {
            IdScheme::DeterministicHash => key.hashed_id(),
            IdScheme::Sequential => {
                let position = self.sequence.get(key).ok_or_else(|| {
                    Error::internal(format!("key {key} was not registered for numbering"))
                })?;
                ScenarioId::from_body(&format!("{position:0width$}", width = self.width))
            }
        }
    }

    /// Assigns ids to every key and fails if two distinct keys share an id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Consistency`] listing every collision, or the errors
    /// of [`Self::id_for`].
    pub fn assign_all(&self, keys: &[CompositeKey]) -> Result<Vec<ScenarioId>> {
        let ids = keys
            .iter()
            .map(|k| self.id_for(k))
            .collect::<Result<Vec<_>>>()?;

        let mut by_id: BTreeMap<&ScenarioId, BTreeSet<&CompositeKey>> = BTreeMap::new();
        for (id, key) in ids.iter().zip(keys) {
            by_id.entry(id).or_default().insert(key);
        }
        let violations: Vec<ConsistencyViolation> = by_id
            .into_iter()
            .filter(|(_, keys)| keys.len() > 1)
            .map(|(id, keys)| ConsistencyViolation::IdCollision {
                scenario_id: id.to_string(),
                keys: keys.into_iter().map(CompositeKey::canonical_string).collect(),
            })
            .collect();
        if violations.is_empty() {
            Ok(ids)
        } else {
            Err(Error::Consistency { violations })
        }
    }
}
