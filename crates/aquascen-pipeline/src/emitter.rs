//! Scenario emitter.
//!
//! Serializes scenario records into the schema of the target model. The
//! schema is picked once per run from [`TargetModel`]; every record of the
//! run goes through the same row type.
//!
//! The emitted file can be read back into a [`ScenarioCatalog`], which is how
//! the selection stage learns each scenario's crop and region without sharing
//! state with the preparation stage.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use serde::{Deserialize, Serialize};

use aquascen_core::error::{Error, ParseIssue, Result};
use aquascen_core::id::ScenarioId;
use aquascen_core::model::{GroupKey, ScenarioRecord};
use aquascen_core::scenario_key::{CompositeKey, IdScheme, ScenarioIdAssigner, TargetModel};

use crate::adapters::OutputSet;

/// Crop summary file name.
pub const CROP_SUMMARY_FILE: &str = "crop_summary.csv";

/// Output schema of the scenario file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioSchema {
    /// Field-scale schema: crop and region first, full climate summary.
    Pwc,
    /// Watershed-scale schema: routing reach, no climate summary.
    Sam,
}

impl ScenarioSchema {
    /// Schema used for a target model.
    #[must_use]
    pub const fn for_model(model: TargetModel) -> Self {
        match model {
            TargetModel::Pwc => Self::Pwc,
            TargetModel::Sam => Self::Sam,
        }
    }

    /// Target model of the schema.
    #[must_use]
    pub const fn model(self) -> TargetModel {
        match self {
            Self::Pwc => TargetModel::Pwc,
            Self::Sam => TargetModel::Sam,
        }
    }

    /// Name of the scenario file.
    #[must_use]
    pub fn file_name(self) -> String {
        scenario_file_name(self.model())
    }

    /// Serializes every record as a headed CSV file into `outputs`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if a row cannot be written.
    pub fn emit(self, records: &[ScenarioRecord], outputs: &mut OutputSet) -> Result<()> {
        match self {
            Self::Pwc => outputs.add_csv(self.file_name(), records.iter().map(PwcScenarioRow::from)),
            Self::Sam => outputs.add_csv(self.file_name(), records.iter().map(SamScenarioRow::from)),
        }?;
        tracing::info!(rows = records.len(), file = %self.file_name(), "scenario file serialized");
        Ok(())
    }
}

/// File name of the scenario table for `model`.
#[must_use]
pub fn scenario_file_name(model: TargetModel) -> String {
    format!("scenarios_{}.csv", model.label())
}

/// Scenario row of the field-scale schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwcScenarioRow {
    /// Scenario id.
    pub scenario_id: String,
    /// Crop id.
    pub crop_id: String,
    /// Crop name.
    pub crop_name: String,
    /// Region.
    pub region: String,
    /// Soil id.
    pub soil_id: String,
    /// Climate zone id.
    pub climate_id: String,
    /// Weather station id.
    pub station_id: String,
    /// Land-use id.
    pub land_use_id: String,
    /// Watershed id.
    pub watershed_id: String,
    /// Hydrologic soil group.
    pub hydrologic_group: String,
    /// Organic carbon (%).
    pub organic_carbon_pct: f64,
    /// Sand (%).
    pub sand_pct: f64,
    /// Clay (%).
    pub clay_pct: f64,
    /// Slope (%).
    pub slope_pct: f64,
    /// Station state.
    pub station_state: String,
    /// Mean annual precipitation (mm).
    pub precip_mm: f64,
    /// Mean annual temperature (C).
    pub temp_c: f64,
    /// Root depth (cm).
    pub root_depth_cm: f64,
    /// Maximum cover (%).
    pub max_cover_pct: f64,
    /// Irrigated flag.
    pub irrigated: bool,
    /// Area (square meters).
    pub area: f64,
}

impl From<&ScenarioRecord> for PwcScenarioRow {
    fn from(r: &ScenarioRecord) -> Self {
        let a = &r.attributes;
        Self {
            scenario_id: r.scenario_id.to_string(),
            crop_id: r.key.crop_id.clone(),
            crop_name: a.land_use.crop_name.clone(),
            region: a.watershed.region.clone(),
            soil_id: r.key.soil_id.clone(),
            climate_id: r.key.climate_id.clone(),
            station_id: r.key.station_id.clone(),
            land_use_id: r.key.land_use_id.clone(),
            watershed_id: r.key.watershed_id.clone(),
            hydrologic_group: a.soil.hydrologic_group.clone(),
            organic_carbon_pct: a.soil.organic_carbon_pct,
            sand_pct: a.soil.sand_pct,
            clay_pct: a.soil.clay_pct,
            slope_pct: a.soil.slope_pct,
            station_state: a.climate.state.clone(),
            precip_mm: a.climate.precip_mm,
            temp_c: a.climate.temp_c,
            root_depth_cm: a.land_use.root_depth_cm,
            max_cover_pct: a.land_use.max_cover_pct,
            irrigated: a.land_use.irrigated,
            area: r.area,
        }
    }
}

/// Scenario row of the watershed-scale schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamScenarioRow {
    /// Scenario id.
    pub scenario_id: String,
    /// Soil id.
    pub soil_id: String,
    /// Climate zone id.
    pub climate_id: String,
    /// Weather station id.
    pub station_id: String,
    /// Land-use id.
    pub land_use_id: String,
    /// Watershed id.
    pub watershed_id: String,
    /// Crop id.
    pub crop_id: String,
    /// Crop name.
    pub crop_name: String,
    /// Routing reach id.
    pub reach_id: String,
    /// Region.
    pub region: String,
    /// Hydrologic soil group.
    pub hydrologic_group: String,
    /// Organic carbon (%).
    pub organic_carbon_pct: f64,
    /// Sand (%).
    pub sand_pct: f64,
    /// Clay (%).
    pub clay_pct: f64,
    /// Slope (%).
    pub slope_pct: f64,
    /// Root depth (cm).
    pub root_depth_cm: f64,
    /// Maximum cover (%).
    pub max_cover_pct: f64,
    /// Irrigated flag.
    pub irrigated: bool,
    /// Area (square meters).
    pub area: f64,
}

impl From<&ScenarioRecord> for SamScenarioRow {
    fn from(r: &ScenarioRecord) -> Self {
        let a = &r.attributes;
        Self {
            scenario_id: r.scenario_id.to_string(),
            soil_id: r.key.soil_id.clone(),
            climate_id: r.key.climate_id.clone(),
            station_id: r.key.station_id.clone(),
            land_use_id: r.key.land_use_id.clone(),
            watershed_id: r.key.watershed_id.clone(),
            crop_id: r.key.crop_id.clone(),
            crop_name: a.land_use.crop_name.clone(),
            reach_id: a.watershed.reach_id.clone(),
            region: a.watershed.region.clone(),
            hydrologic_group: a.soil.hydrologic_group.clone(),
            organic_carbon_pct: a.soil.organic_carbon_pct,
            sand_pct: a.soil.sand_pct,
            clay_pct: a.soil.clay_pct,
            slope_pct: a.soil.slope_pct,
            root_depth_cm: a.land_use.root_depth_cm,
            max_cover_pct: a.land_use.max_cover_pct,
            irrigated: a.land_use.irrigated,
            area: r.area,
        }
    }
}

/// One row of the crop summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropSummaryRow {
    /// Crop id.
    pub crop_id: String,
    /// Crop name.
    pub crop_name: String,
    /// Number of scenarios.
    pub scenarios: usize,
    /// Summed scenario area.
    pub total_area: f64,
    /// Scenarios kept in the crop's sample; equals `scenarios` when the
    /// model draws no samples.
    pub sample_size: usize,
}

/// Per-crop scenario counts and areas, ordered by crop id.
#[must_use]
pub fn crop_summary(records: &[ScenarioRecord]) -> Vec<CropSummaryRow> {
    let mut by_crop: BTreeMap<&str, CropSummaryRow> = BTreeMap::new();
    for r in records {
        let row = by_crop
            .entry(r.key.crop_id.as_str())
            .or_insert_with(|| CropSummaryRow {
                crop_id: r.key.crop_id.clone(),
                crop_name: r.attributes.land_use.crop_name.clone(),
                scenarios: 0,
                total_area: 0.0,
                sample_size: 0,
            });
        row.scenarios += 1;
        row.sample_size += 1;
        row.total_area += r.area;
    }
    by_crop.into_values().collect()
}

/// What the selection stage needs to know about an emitted scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Scenario id.
    pub scenario_id: ScenarioId,
    /// Composite key.
    pub key: CompositeKey,
    /// Crop / region group.
    pub group: GroupKey,
    /// Crop name.
    pub crop_name: String,
    /// Area.
    pub area: f64,
}

/// Columns shared by both schemas; extra columns are ignored when reading.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    scenario_id: String,
    soil_id: String,
    climate_id: String,
    station_id: String,
    land_use_id: String,
    watershed_id: String,
    crop_id: String,
    crop_name: String,
    region: String,
    area: f64,
}

/// Index of emitted scenarios by id.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    model: TargetModel,
    scheme: IdScheme,
    entries: BTreeMap<ScenarioId, CatalogEntry>,
}

impl ScenarioCatalog {
    /// Builds a catalog from in-memory records.
    #[must_use]
    pub fn from_records(records: &[ScenarioRecord], model: TargetModel, scheme: IdScheme) -> Self {
        let entries = records
            .iter()
            .map(|r| {
                (
                    r.scenario_id.clone(),
                    CatalogEntry {
                        scenario_id: r.scenario_id.clone(),
                        key: r.key.clone(),
                        group: r.group(),
                        crop_name: r.attributes.land_use.crop_name.clone(),
                        area: r.area,
                    },
                )
            })
            .collect();
        Self {
            model,
            scheme,
            entries,
        }
    }

    /// Reads an emitted scenario file and recomputes every id from its key
    /// columns.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] listing every malformed row or invalid id
    /// - [`Error::OutputMismatch`] listing every stored id that differs from
    ///   the id recomputed under `scheme`
    pub fn from_scenario_csv<R: Read>(
        reader: R,
        source_name: &str,
        model: TargetModel,
        scheme: IdScheme,
    ) -> Result<Self> {
        let rows: Vec<CatalogRow> = crate::adapters::csv_tables::read_csv_from(reader, source_name)?;

        let mut issues = Vec::new();
        let mut parsed = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            let line = i + 2;
            match row.scenario_id.parse::<ScenarioId>() {
                Ok(id) => parsed.push((line, id, row)),
                Err(_) => issues.push(ParseIssue::new(
                    line,
                    format!("invalid scenario id '{}'", row.scenario_id),
                )),
            }
        }
        if !issues.is_empty() {
            return Err(Error::Parse {
                source_name: source_name.to_string(),
                issues,
            });
        }

        let keys: Vec<CompositeKey> = parsed
            .iter()
            .map(|(_, _, row)| CompositeKey {
                soil_id: row.soil_id.clone(),
                climate_id: row.climate_id.clone(),
                station_id: row.station_id.clone(),
                land_use_id: row.land_use_id.clone(),
                watershed_id: row.watershed_id.clone(),
                crop_id: row.crop_id.clone(),
                model,
            })
            .collect();
        let assigner = ScenarioIdAssigner::new(scheme, &keys);
        let recomputed = assigner.assign_all(&keys)?;

        let mut drifted = Vec::new();
        let mut first_line: HashMap<ScenarioId, usize> = HashMap::new();
        let mut entries = BTreeMap::new();
        for ((line, stored, row), (key, expected)) in
            parsed.into_iter().zip(keys.into_iter().zip(recomputed))
        {
            if stored != expected {
                drifted.push(stored.to_string());
                continue;
            }
            if let Some(first) = first_line.insert(stored.clone(), line) {
                issues.push(ParseIssue::new(
                    line,
                    format!("scenario {stored} repeated (first at line {first})"),
                ));
                continue;
            }
            entries.insert(
                stored.clone(),
                CatalogEntry {
                    scenario_id: stored,
                    key,
                    group: GroupKey::new(row.crop_id, row.region),
                    crop_name: row.crop_name,
                    area: row.area,
                },
            );
        }

        if !drifted.is_empty() {
            drifted.sort();
            return Err(Error::OutputMismatch {
                source_name: source_name.to_string(),
                detail: format!("stored ids differ from ids recomputed with scheme {scheme}"),
                scenario_ids: drifted,
            });
        }
        if !issues.is_empty() {
            return Err(Error::Parse {
                source_name: source_name.to_string(),
                issues,
            });
        }

        tracing::info!(scenarios = entries.len(), source = source_name, "scenario catalog loaded");
        Ok(Self {
            model,
            scheme,
            entries,
        })
    }

    /// Target model of the catalog.
    #[must_use]
    pub const fn model(&self) -> TargetModel {
        self.model
    }

    /// Id scheme of the catalog.
    #[must_use]
    pub const fn scheme(&self) -> IdScheme {
        self.scheme
    }

    /// Entry by scenario id.
    #[must_use]
    pub fn get(&self, id: &ScenarioId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Whether the id was emitted.
    #[must_use]
    pub fn contains(&self, id: &ScenarioId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of scenarios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in scenario id order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Entries grouped by crop and region, each group in scenario id order.
    #[must_use]
    pub fn groups(&self) -> BTreeMap<GroupKey, Vec<&CatalogEntry>> {
        let mut groups: BTreeMap<GroupKey, Vec<&CatalogEntry>> = BTreeMap::new();
        for entry in self.entries.values() {
            groups.entry(entry.group.clone()).or_default().push(entry);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquascen_core::model::{
        ClimateStation, LandUseMapping, ScenarioAttributes, SoilProperties, WatershedMetadata,
    };

    fn record(soil: &str, crop: &str, area: f64, model: TargetModel) -> ScenarioRecord {
        let key = CompositeKey {
            soil_id: soil.into(),
            climate_id: "c1".into(),
            station_id: "st1".into(),
            land_use_id: format!("lu{crop}"),
            watershed_id: "w1".into(),
            crop_id: crop.into(),
            model,
        };
        ScenarioRecord {
            scenario_id: key.hashed_id().unwrap(),
            unit_id: format!("u-{soil}-{crop}"),
            key,
            attributes: ScenarioAttributes {
                soil: SoilProperties {
                    soil_id: soil.into(),
                    hydrologic_group: "C".into(),
                    organic_carbon_pct: 0.8,
                    sand_pct: 30.0,
                    clay_pct: 25.0,
                    slope_pct: 1.5,
                },
                climate: ClimateStation {
                    station_id: "st1".into(),
                    climate_id: "c1".into(),
                    distance: 1.0,
                    state: "OH".into(),
                    precip_mm: 950.0,
                    temp_c: 10.5,
                },
                land_use: LandUseMapping {
                    land_use_id: format!("lu{crop}"),
                    crop_id: crop.into(),
                    crop_name: format!("crop {crop}"),
                    root_depth_cm: 100.0,
                    max_cover_pct: 80.0,
                    irrigated: true,
                },
                watershed: WatershedMetadata {
                    watershed_id: "w1".into(),
                    reach_id: "r1".into(),
                    region: "05".into(),
                },
            },
            area,
        }
    }

    fn emitted(records: &[ScenarioRecord], schema: ScenarioSchema) -> Vec<u8> {
        let mut outputs = OutputSet::new();
        schema.emit(records, &mut outputs).unwrap();
        outputs.get(&schema.file_name()).unwrap().to_vec()
    }

    #[test]
    fn schema_is_chosen_by_model() {
        assert_eq!(ScenarioSchema::for_model(TargetModel::Pwc), ScenarioSchema::Pwc);
        assert_eq!(ScenarioSchema::Sam.file_name(), "scenarios_sam.csv");
    }

    #[test]
    fn pwc_schema_carries_climate_summary() {
        let bytes = emitted(&[record("s1", "10", 5.0, TargetModel::Pwc)], ScenarioSchema::Pwc);
        let text = String::from_utf8(bytes).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.starts_with("scenario_id,crop_id,crop_name,region,"));
        assert!(header.contains("precip_mm"));
        assert!(!header.contains("reach_id"));
    }

    #[test]
    fn sam_schema_omits_climate_summary() {
        let bytes = emitted(&[record("s1", "10", 5.0, TargetModel::Sam)], ScenarioSchema::Sam);
        let text = String::from_utf8(bytes).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.contains("reach_id"));
        assert!(!header.contains("precip_mm"));
    }

    #[test]
    fn catalog_round_trips_through_emitted_file() {
        for (model, schema) in [
            (TargetModel::Pwc, ScenarioSchema::Pwc),
            (TargetModel::Sam, ScenarioSchema::Sam),
        ] {
            let records = vec![record("s1", "10", 5.0, model), record("s2", "20", 7.0, model)];
            let bytes = emitted(&records, schema);
            let catalog = ScenarioCatalog::from_scenario_csv(
                bytes.as_slice(),
                "scenarios.csv",
                model,
                IdScheme::DeterministicHash,
            )
            .unwrap();
            assert_eq!(catalog.len(), 2);
            for r in &records {
                let entry = catalog.get(&r.scenario_id).unwrap();
                assert_eq!(entry.key, r.key);
                assert_eq!(entry.group, GroupKey::new(r.key.crop_id.clone(), "05"));
            }
        }
    }

    #[test]
    fn drifted_ids_are_rejected() {
        let records = vec![record("s1", "10", 5.0, TargetModel::Pwc)];
        let bytes = emitted(&records, ScenarioSchema::Pwc);
        let text = String::from_utf8(bytes)
            .unwrap()
            .replace(records[0].scenario_id.as_str(), "sc-000000000000000000000000");
        let err = ScenarioCatalog::from_scenario_csv(
            text.as_bytes(),
            "scenarios.csv",
            TargetModel::Pwc,
            IdScheme::DeterministicHash,
        )
        .unwrap_err();
        let Error::OutputMismatch { scenario_ids, .. } = err else {
            panic!("expected output mismatch");
        };
        assert_eq!(scenario_ids, ["sc-000000000000000000000000"]);
    }

    #[test]
    fn crop_summary_totals_by_crop() {
        let records = vec![
            record("s1", "10", 5.0, TargetModel::Pwc),
            record("s2", "10", 2.5, TargetModel::Pwc),
            record("s1", "20", 1.0, TargetModel::Pwc),
        ];
        let summary = crop_summary(&records);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].crop_id, "10");
        assert_eq!(summary[0].scenarios, 2);
        assert_eq!(summary[0].sample_size, 2);
        assert!((summary[0].total_area - 7.5).abs() < 1e-12);
    }

    #[test]
    fn catalog_groups_by_crop_and_region() {
        let records = vec![
            record("s1", "10", 5.0, TargetModel::Pwc),
            record("s2", "10", 2.5, TargetModel::Pwc),
            record("s1", "20", 1.0, TargetModel::Pwc),
        ];
        let catalog =
            ScenarioCatalog::from_records(&records, TargetModel::Pwc, IdScheme::DeterministicHash);
        let groups = catalog.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&GroupKey::new("10", "05")].len(), 2);
    }
}
