//! Data model shared by every pipeline stage.
//!
//! Inputs (`OverlayUnit`, lookup rows) are read-only; stage outputs
//! (`ScenarioRecord`, `WatershedRecipe`, `PwcOutputRecord`, `SelectionResult`)
//! are created once and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ScenarioId;
use crate::scenario_key::CompositeKey;

/// The lookup tables an overlay unit references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupTable {
    /// Soil properties keyed by soil id.
    Soil,
    /// Climate stations keyed by climate zone id.
    Climate,
    /// Crop / land-use mapping keyed by land-use id.
    LandUse,
    /// Watershed metadata keyed by watershed id.
    Watershed,
}

impl fmt::Display for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soil => write!(f, "soil"),
            Self::Climate => write!(f, "climate"),
            Self::LandUse => write!(f, "land-use"),
            Self::Watershed => write!(f, "watershed"),
        }
    }
}

/// An atomic polygon from the spatial overlay, as delivered by the provider.
///
/// Every field except `unit_id` may be absent in raw input; the spatial index
/// consumer turns this into a [`ValidatedUnit`] or reports why it cannot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayUnit {
    /// Polygon identifier.
    pub unit_id: String,
    /// Reference to the geometry held by the overlay provider.
    #[serde(default)]
    pub geometry_ref: Option<String>,
    /// Soil map unit id.
    #[serde(default)]
    pub soil_id: Option<String>,
    /// Climate zone id.
    #[serde(default)]
    pub climate_id: Option<String>,
    /// Land-use class id.
    #[serde(default)]
    pub land_use_id: Option<String>,
    /// Watershed (catchment) id.
    #[serde(default)]
    pub watershed_id: Option<String>,
    /// Area in square meters.
    #[serde(default)]
    pub area: Option<f64>,
}

/// Foreign keys of a validated unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeys {
    /// Soil map unit id.
    pub soil_id: String,
    /// Climate zone id.
    pub climate_id: String,
    /// Land-use class id.
    pub land_use_id: String,
    /// Watershed id.
    pub watershed_id: String,
}

/// An overlay unit whose keys are present and whose area is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedUnit {
    /// Polygon identifier.
    pub unit_id: String,
    /// Geometry reference.
    pub geometry_ref: String,
    /// Resolved-to-be foreign keys.
    pub keys: ForeignKeys,
    /// Positive, finite area.
    pub area: f64,
}

/// Soil properties row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilProperties {
    /// Soil map unit id.
    pub soil_id: String,
    /// Hydrologic soil group (A, B, C, D or dual classes).
    pub hydrologic_group: String,
    /// Organic carbon content of the surface horizon (%).
    pub organic_carbon_pct: f64,
    /// Sand content (%).
    pub sand_pct: f64,
    /// Clay content (%).
    pub clay_pct: f64,
    /// Representative slope (%).
    pub slope_pct: f64,
}

/// Climate station row. Several stations may serve the same climate zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateStation {
    /// Weather station id.
    pub station_id: String,
    /// Climate zone the station can serve.
    pub climate_id: String,
    /// Precomputed nearness of the station to the zone (smaller is nearer).
    pub distance: f64,
    /// State the station is located in.
    pub state: String,
    /// Mean annual precipitation (mm).
    pub precip_mm: f64,
    /// Mean annual air temperature (degrees C).
    pub temp_c: f64,
}

/// Crop / land-use mapping row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandUseMapping {
    /// Land-use class id.
    pub land_use_id: String,
    /// Crop (or crop group) id used for selection grouping.
    pub crop_id: String,
    /// Descriptive crop name.
    pub crop_name: String,
    /// Maximum rooting depth (cm).
    pub root_depth_cm: f64,
    /// Maximum canopy cover (%).
    pub max_cover_pct: f64,
    /// Whether the crop is irrigated.
    pub irrigated: bool,
}

/// Watershed metadata row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatershedMetadata {
    /// Watershed id referenced by overlay units.
    pub watershed_id: String,
    /// Routing reach id the watershed drains to.
    pub reach_id: String,
    /// Hydrologic region used for selection grouping.
    pub region: String,
}

/// The attribute bundle resolved for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAttributes {
    /// Soil row.
    pub soil: SoilProperties,
    /// Chosen climate station.
    pub climate: ClimateStation,
    /// Land-use row.
    pub land_use: LandUseMapping,
    /// Watershed row.
    pub watershed: WatershedMetadata,
}

/// One scenario, produced by the joiner from exactly one overlay unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    /// Deterministic id derived from `key`.
    pub scenario_id: ScenarioId,
    /// The overlay unit this record came from.
    pub unit_id: String,
    /// Resolved composite key.
    pub key: CompositeKey,
    /// Resolved attributes.
    pub attributes: ScenarioAttributes,
    /// Source area (square meters).
    pub area: f64,
}

impl ScenarioRecord {
    /// Selection group this scenario belongs to.
    #[must_use]
    pub fn group(&self) -> GroupKey {
        GroupKey::new(
            &self.attributes.land_use.crop_id,
            &self.attributes.watershed.region,
        )
    }
}

/// One member of a watershed recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    /// Member scenario.
    pub scenario_id: ScenarioId,
    /// Area contributed by the scenario.
    pub area: f64,
    /// Share of the watershed's total area.
    pub fraction: f64,
}

/// Area-weighted composition of a watershed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatershedRecipe {
    /// Watershed id.
    pub watershed_id: String,
    /// Routing reach id.
    pub reach_id: String,
    /// Entries ordered by descending fraction, then ascending scenario id.
    pub entries: Vec<RecipeEntry>,
    /// Total watershed area.
    pub total_area: f64,
    /// Sum of entry fractions (1 within epsilon).
    pub fraction_sum: f64,
}

/// Endpoint identity inside a batch model output: optional sorption
/// coefficient plus the endpoint column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    /// Sorption coefficient of the batch run, when encoded in the run id.
    pub koc: Option<u32>,
    /// Endpoint column name (e.g. `acute`).
    pub name: String,
}

impl EndpointKey {
    /// Creates an endpoint key.
    #[must_use]
    pub fn new(koc: Option<u32>, name: impl Into<String>) -> Self {
        Self {
            koc,
            name: name.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.koc {
            Some(koc) => write!(f, "koc{koc}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One parsed row of batch model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwcOutputRecord {
    /// Scenario the row belongs to.
    pub scenario_id: ScenarioId,
    /// Sorption coefficient parsed from the run id, if any.
    pub koc: Option<u32>,
    /// 1-based line number in the output file.
    pub line: usize,
    /// Endpoint values by column name.
    pub endpoints: BTreeMap<String, f64>,
}

/// Crop / region selection group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Crop id.
    pub crop_id: String,
    /// Region.
    pub region: String,
}

impl GroupKey {
    /// Creates a group key.
    #[must_use]
    pub fn new(crop_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            crop_id: crop_id.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crop {} / region {}", self.crop_id, self.region)
    }
}

/// The representative scenario chosen for one group and endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Crop / region group.
    pub group: GroupKey,
    /// Descriptive crop name.
    pub crop_name: String,
    /// Endpoint the ranking was computed on.
    pub endpoint: EndpointKey,
    /// Chosen scenario (always a member of the group).
    pub scenario_id: ScenarioId,
    /// 1-based rank of the chosen scenario in ascending value order.
    pub rank: usize,
    /// Endpoint value of the chosen scenario.
    pub value: f64,
    /// Percentile threshold value the choice was compared against.
    pub threshold: f64,
    /// Target percentile (0 to 100).
    pub percentile: f64,
    /// Number of scenarios in the group.
    pub population: usize,
}

/// Rank and percentile position of one group member (audit table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMember {
    /// Crop / region group.
    pub group: GroupKey,
    /// Endpoint.
    pub endpoint: EndpointKey,
    /// Member scenario.
    pub scenario_id: ScenarioId,
    /// 1-based rank in ascending value order.
    pub rank: usize,
    /// Endpoint value.
    pub value: f64,
    /// Scenario area.
    pub area: f64,
    /// Percentile position under the configured method.
    pub position: f64,
}
