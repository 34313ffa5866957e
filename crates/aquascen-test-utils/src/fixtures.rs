//! Pre-built test fixtures.
//!
//! [`ScenarioFixture`] describes a small but complete landscape: two crops,
//! three watersheds in two regions, two climate zones served by three
//! stations, and one soil per unit. [`TestWorkspace`] writes it to disk in
//! the layout the CLI reads.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;

use aquascen_core::config::{InputPaths, RunConfig};
use aquascen_core::model::{
    ClimateStation, LandUseMapping, OverlayUnit, SoilProperties, WatershedMetadata,
};
use aquascen_core::scenario_key::{IdScheme, TargetModel};
use aquascen_pipeline::lookup::LookupRows;
use aquascen_pipeline::overlay::InMemoryOverlay;

/// Watersheds of the fixture: (watershed, reach, region).
pub const WATERSHEDS: [(&str, &str, &str); 3] = [
    ("w1", "r100", "07"),
    ("w2", "r200", "07"),
    ("w3", "r300", "10"),
];

/// Crops of the fixture: (land use, crop id, crop name).
pub const CROPS: [(&str, &str, &str); 2] = [("1", "10", "Corn"), ("5", "20", "Soybeans")];

/// A coherent overlay and lookup tables.
#[derive(Debug, Clone)]
pub struct ScenarioFixture {
    units: Vec<OverlayUnit>,
    rows: LookupRows,
}

impl ScenarioFixture {
    /// Builds `per_watershed` units in each watershed, alternating crops and
    /// climate zones, with varied areas.
    pub fn new(per_watershed: usize) -> Self {
        let mut units = Vec::new();
        for (w, (watershed_id, _, _)) in WATERSHEDS.iter().enumerate() {
            for i in 0..per_watershed {
                let n = w * per_watershed + i;
                let (land_use_id, _, _) = CROPS[i % CROPS.len()];
                #[allow(clippy::cast_precision_loss)]
                let area = 1_000.0 + ((n * 7_919) % 5_000) as f64;
                units.push(OverlayUnit {
                    unit_id: format!("u{n:04}"),
                    geometry_ref: Some(format!("poly/{n}")),
                    soil_id: Some(format!("s{n:04}")),
                    climate_id: Some(if i % 3 == 0 { "c2" } else { "c1" }.to_string()),
                    land_use_id: Some(land_use_id.to_string()),
                    watershed_id: Some((*watershed_id).to_string()),
                    area: Some(area),
                });
            }
        }
        let rows = lookup_rows(units.len());
        Self { units, rows }
    }

    /// Overlay units.
    pub fn units(&self) -> &[OverlayUnit] {
        &self.units
    }

    /// Mutable overlay units, for injecting defects.
    pub fn units_mut(&mut self) -> &mut Vec<OverlayUnit> {
        &mut self.units
    }

    /// Lookup rows.
    pub fn lookup_rows(&self) -> LookupRows {
        self.rows.clone()
    }

    /// Mutable lookup rows, for injecting defects.
    pub fn rows_mut(&mut self) -> &mut LookupRows {
        &mut self.rows
    }

    /// In-memory overlay provider over the units.
    pub fn overlay(&self) -> InMemoryOverlay {
        InMemoryOverlay::new(self.units.clone())
    }

    /// Points unit `index` at a climate zone no station serves.
    #[must_use]
    pub fn with_unknown_climate(mut self, index: usize) -> Self {
        self.units[index].climate_id = Some("c404".into());
        self
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether there are no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn lookup_rows(soils: usize) -> LookupRows {
    let groups = ["A", "B", "C", "D", "B/D"];
    LookupRows {
        soils: (0..soils)
            .map(|n| SoilProperties {
                soil_id: format!("s{n:04}"),
                hydrologic_group: groups[n % groups.len()].to_string(),
                organic_carbon_pct: 0.5 + (n % 7) as f64 * 0.25,
                sand_pct: 20.0 + (n % 11) as f64 * 5.0,
                clay_pct: 10.0 + (n % 5) as f64 * 4.0,
                slope_pct: 1.0 + (n % 9) as f64,
            })
            .collect(),
        stations: vec![
            station("st-a", "c1", 3.5, "IA", 850.0, 9.5),
            station("st-b", "c1", 12.0, "IA", 880.0, 9.8),
            station("st-c", "c2", 6.0, "MO", 1_050.0, 12.4),
        ],
        land_use: CROPS
            .iter()
            .map(|&(land_use_id, crop_id, crop_name)| LandUseMapping {
                land_use_id: land_use_id.to_string(),
                crop_id: crop_id.to_string(),
                crop_name: crop_name.to_string(),
                root_depth_cm: 110.0,
                max_cover_pct: 95.0,
                irrigated: false,
            })
            .collect(),
        watersheds: WATERSHEDS
            .iter()
            .map(|&(watershed_id, reach_id, region)| WatershedMetadata {
                watershed_id: watershed_id.to_string(),
                reach_id: reach_id.to_string(),
                region: region.to_string(),
            })
            .collect(),
    }
}

fn station(
    id: &str,
    climate: &str,
    distance: f64,
    state: &str,
    precip: f64,
    temp: f64,
) -> ClimateStation {
    ClimateStation {
        station_id: id.to_string(),
        climate_id: climate.to_string(),
        distance,
        state: state.to_string(),
        precip_mm: precip,
        temp_c: temp,
    }
}

/// A temporary directory holding fixture inputs and a run configuration.
pub struct TestWorkspace {
    dir: TempDir,
    config: RunConfig,
}

impl TestWorkspace {
    /// Writes the fixture's inputs as CSV and configures a run for `model`.
    pub fn new(fixture: &ScenarioFixture, model: TargetModel) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let inputs = InputPaths::default().relative_to(dir.path());
        std::fs::create_dir_all(dir.path().join("inputs")).unwrap();

        write_csv(&inputs.overlay, fixture.units());
        let rows = fixture.lookup_rows();
        write_csv(&inputs.soils, &rows.soils);
        write_csv(&inputs.climate, &rows.stations);
        write_csv(&inputs.land_use, &rows.land_use);
        write_csv(&inputs.watersheds, &rows.watersheds);

        let config = RunConfig {
            target_model: model,
            id_scheme: IdScheme::DeterministicHash,
            min_group_size: 2,
            inputs,
            output_dir: dir.path().join("outputs"),
            ..RunConfig::default()
        };
        Self { dir, config }
    }

    /// Workspace root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Mutable run configuration.
    pub fn config_mut(&mut self) -> &mut RunConfig {
        &mut self.config
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Path of a file in the output directory.
    pub fn output(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// Names of the entries in the output directory, sorted. Empty if the
    /// directory does not exist.
    pub fn output_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.output_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Writes the configuration as `run.json` at the workspace root and
    /// returns its path.
    pub fn write_config(&self) -> PathBuf {
        let path = self.dir.path().join("run.json");
        let json = serde_json::to_string_pretty(&self.config).unwrap();
        std::fs::write(&path, json).unwrap();
        path
    }
}

/// Writes serializable rows as a headed CSV file.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    for row in rows {
        writer.serialize(row).unwrap();
    }
    writer.flush().unwrap();
}
