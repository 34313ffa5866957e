//! Indexed environmental lookup tables.

use std::collections::HashMap;

use aquascen_core::error::{Error, Result, ValidationIssue, ValidationProblem};
use aquascen_core::id::compare_ids;
use aquascen_core::model::{
    ClimateStation, LandUseMapping, LookupTable, SoilProperties, WatershedMetadata,
};

/// Raw lookup rows as read from their sources.
#[derive(Debug, Clone, Default)]
pub struct LookupRows {
    /// Soil properties.
    pub soils: Vec<SoilProperties>,
    /// Climate stations.
    pub stations: Vec<ClimateStation>,
    /// Crop / land-use mapping.
    pub land_use: Vec<LandUseMapping>,
    /// Watershed metadata.
    pub watersheds: Vec<WatershedMetadata>,
}

/// Lookup tables indexed by primary key.
///
/// Stations are indexed by the climate zone they serve and kept sorted
/// nearest first, then by lowest station id, so the first candidate is the
/// one the joiner uses.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    soils: HashMap<String, SoilProperties>,
    stations: HashMap<String, Vec<ClimateStation>>,
    land_use: HashMap<String, LandUseMapping>,
    watersheds: HashMap<String, WatershedMetadata>,
}

impl LookupTables {
    /// Indexes raw rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every blank or duplicated primary
    /// key (for stations, the zone and station pair) and every unusable value
    /// (non-finite percentages, negative or non-finite station distances).
    pub fn build(rows: LookupRows) -> Result<Self> {
        let mut issues = Vec::new();

        for soil in &rows.soils {
            let numbers = [
                ("organic_carbon_pct", soil.organic_carbon_pct),
                ("sand_pct", soil.sand_pct),
                ("clay_pct", soil.clay_pct),
                ("slope_pct", soil.slope_pct),
            ];
            for (column, value) in numbers {
                if !value.is_finite() || value < 0.0 {
                    issues.push(invalid(LookupTable::Soil, &soil.soil_id, column));
                }
            }
        }
        for station in &rows.stations {
            if !station.distance.is_finite() || station.distance < 0.0 {
                issues.push(invalid(LookupTable::Climate, &station.station_id, "distance"));
            }
            if station.station_id.trim().is_empty() {
                issues.push(invalid(LookupTable::Climate, "<blank>", "station_id"));
            }
            if station.climate_id.trim().is_empty() {
                issues.push(invalid(LookupTable::Climate, &station.station_id, "climate_id"));
            }
        }
        for mapping in &rows.land_use {
            if mapping.crop_id.trim().is_empty() {
                issues.push(invalid(LookupTable::LandUse, &mapping.land_use_id, "crop_id"));
            }
        }
        for watershed in &rows.watersheds {
            if watershed.region.trim().is_empty() {
                issues.push(invalid(LookupTable::Watershed, &watershed.watershed_id, "region"));
            }
        }

        let soils = index(LookupTable::Soil, rows.soils, |r| r.soil_id.clone(), &mut issues);
        let land_use = index(
            LookupTable::LandUse,
            rows.land_use,
            |r| r.land_use_id.clone(),
            &mut issues,
        );
        let watersheds = index(
            LookupTable::Watershed,
            rows.watersheds,
            |r| r.watershed_id.clone(),
            &mut issues,
        );

        // A station may serve several zones, but only once per zone.
        let by_station = index(
            LookupTable::Climate,
            rows.stations,
            |r| format!("{}/{}", r.climate_id.trim(), r.station_id.trim()),
            &mut issues,
        );

        if !issues.is_empty() {
            return Err(Error::Validation { issues });
        }

        let mut stations: HashMap<String, Vec<ClimateStation>> = HashMap::new();
        for station in by_station.into_values() {
            stations
                .entry(station.climate_id.trim().to_string())
                .or_default()
                .push(station);
        }
        for candidates in stations.values_mut() {
            candidates.sort_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| compare_ids(&a.station_id, &b.station_id))
            });
        }

        let tables = Self {
            soils,
            stations,
            land_use,
            watersheds,
        };
        tracing::info!(
            soils = tables.soils.len(),
            climate_zones = tables.stations.len(),
            land_use = tables.land_use.len(),
            watersheds = tables.watersheds.len(),
            "lookup tables indexed"
        );
        Ok(tables)
    }

    /// Soil row by soil id.
    #[must_use]
    pub fn soil(&self, soil_id: &str) -> Option<&SoilProperties> {
        self.soils.get(soil_id)
    }

    /// Candidate stations of a climate zone, nearest first.
    #[must_use]
    pub fn stations_for(&self, climate_id: &str) -> &[ClimateStation] {
        self.stations.get(climate_id).map_or(&[], Vec::as_slice)
    }

    /// The station serving a climate zone: nearest, then lowest station id.
    #[must_use]
    pub fn nearest_station(&self, climate_id: &str) -> Option<&ClimateStation> {
        self.stations_for(climate_id).first()
    }

    /// Land-use row by land-use id.
    #[must_use]
    pub fn land_use(&self, land_use_id: &str) -> Option<&LandUseMapping> {
        self.land_use.get(land_use_id)
    }

    /// Watershed row by watershed id.
    #[must_use]
    pub fn watershed(&self, watershed_id: &str) -> Option<&WatershedMetadata> {
        self.watersheds.get(watershed_id)
    }
}

fn invalid(table: LookupTable, key: &str, column: &'static str) -> ValidationIssue {
    ValidationIssue::new(
        format!("{table}:{key}"),
        ValidationProblem::InvalidLookupValue { table, column },
    )
}

fn index<T, F>(
    table: LookupTable,
    rows: Vec<T>,
    key: F,
    issues: &mut Vec<ValidationIssue>,
) -> HashMap<String, T>
where
    F: Fn(&T) -> String,
{
    let mut out: HashMap<String, T> = HashMap::with_capacity(rows.len());
    let mut duplicates: Vec<String> = Vec::new();
    for row in rows {
        let k = key(&row).trim().to_string();
        if k.is_empty() {
            issues.push(ValidationIssue::new(
                format!("{table}:<blank>"),
                ValidationProblem::InvalidLookupValue {
                    table,
                    column: "id",
                },
            ));
            continue;
        }
        if out.contains_key(&k) {
            if !duplicates.contains(&k) {
                duplicates.push(k);
            }
            continue;
        }
        out.insert(k, row);
    }
    duplicates.sort_by(|a, b| compare_ids(a, b));
    for k in duplicates {
        issues.push(ValidationIssue::new(
            format!("{table}:{k}"),
            ValidationProblem::DuplicateLookupKey { table },
        ));
    }
    out
}
