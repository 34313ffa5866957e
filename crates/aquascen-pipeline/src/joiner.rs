//! Environmental attribute joiner.
//!
//! Resolves the four foreign keys of every validated unit against the lookup
//! tables, derives the composite key and assigns the scenario id. Units are
//! resolved in parallel; the output is sorted by scenario id.

use std::collections::BTreeMap;

use rayon::prelude::*;

use aquascen_core::error::{Error, MissingReference, Result, ValidationIssue, ValidationProblem};
use aquascen_core::id::compare_ids;
use aquascen_core::model::{LookupTable, ScenarioAttributes, ScenarioRecord, ValidatedUnit};
use aquascen_core::scenario_key::{CompositeKey, IdScheme, ScenarioIdAssigner, TargetModel};

use crate::lookup::LookupTables;

struct Resolved<'a> {
    unit: &'a ValidatedUnit,
    key: CompositeKey,
    attributes: ScenarioAttributes,
}

/// Joins validated units with the lookup tables.
///
/// # Errors
///
/// - [`Error::MissingReference`] listing every unresolved (unit, table, key)
/// - [`Error::Validation`] if two units resolve to the same composite key
/// - [`Error::Consistency`] if distinct keys map to the same scenario id
pub fn join(
    units: &[ValidatedUnit],
    tables: &LookupTables,
    model: TargetModel,
    scheme: IdScheme,
) -> Result<Vec<ScenarioRecord>> {
    let outcomes: Vec<std::result::Result<Resolved<'_>, Vec<MissingReference>>> = units
        .par_iter()
        .map(|unit| resolve(unit, tables, model))
        .collect();

    let mut resolved = Vec::with_capacity(outcomes.len());
    let mut missing = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(r) => resolved.push(r),
            Err(refs) => missing.extend(refs),
        }
    }
    if !missing.is_empty() {
        missing.sort();
        tracing::warn!(unresolved = missing.len(), "lookup join failed");
        return Err(Error::MissingReference {
            references: missing,
        });
    }

    reject_duplicate_keys(&resolved)?;

    let keys: Vec<CompositeKey> = resolved.iter().map(|r| r.key.clone()).collect();
    let assigner = ScenarioIdAssigner::new(scheme, &keys);
    let ids = assigner.assign_all(&keys)?;

    let mut records: Vec<ScenarioRecord> = resolved
        .into_iter()
        .zip(ids)
        .map(|(r, scenario_id)| ScenarioRecord {
            scenario_id,
            unit_id: r.unit.unit_id.clone(),
            key: r.key,
            attributes: r.attributes,
            area: r.unit.area,
        })
        .collect();
    records.par_sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));

    tracing::info!(scenarios = records.len(), model = %model, scheme = %scheme, "units joined");
    Ok(records)
}

fn resolve<'a>(
    unit: &'a ValidatedUnit,
    tables: &LookupTables,
    model: TargetModel,
) -> std::result::Result<Resolved<'a>, Vec<MissingReference>> {
    let keys = &unit.keys;
    let soil = tables.soil(&keys.soil_id);
    let station = tables.nearest_station(&keys.climate_id);
    let land_use = tables.land_use(&keys.land_use_id);
    let watershed = tables.watershed(&keys.watershed_id);

    match (soil, station, land_use, watershed) {
        (Some(soil), Some(station), Some(land_use), Some(watershed)) => {
            let key = CompositeKey {
                soil_id: soil.soil_id.trim().to_string(),
                climate_id: keys.climate_id.trim().to_string(),
                station_id: station.station_id.trim().to_string(),
                land_use_id: land_use.land_use_id.trim().to_string(),
                watershed_id: watershed.watershed_id.trim().to_string(),
                crop_id: land_use.crop_id.trim().to_string(),
                model,
            };
            Ok(Resolved {
                unit,
                key,
                attributes: ScenarioAttributes {
                    soil: soil.clone(),
                    climate: station.clone(),
                    land_use: land_use.clone(),
                    watershed: watershed.clone(),
                },
            })
        }
        _ => {
            let checks = [
                (LookupTable::Soil, &keys.soil_id, soil.is_some()),
                (LookupTable::Climate, &keys.climate_id, station.is_some()),
                (LookupTable::LandUse, &keys.land_use_id, land_use.is_some()),
                (LookupTable::Watershed, &keys.watershed_id, watershed.is_some()),
            ];
            Err(checks
                .into_iter()
                .filter(|(_, _, found)| !found)
                .map(|(table, key, _)| MissingReference {
                    unit_id: unit.unit_id.clone(),
                    table,
                    key: key.clone(),
                })
                .collect())
        }
    }
}

fn reject_duplicate_keys(resolved: &[Resolved<'_>]) -> Result<()> {
    let mut by_key: BTreeMap<&CompositeKey, Vec<&str>> = BTreeMap::new();
    for r in resolved {
        by_key.entry(&r.key).or_default().push(&r.unit.unit_id);
    }

    let mut issues = Vec::new();
    for mut unit_ids in by_key.into_values().filter(|ids| ids.len() > 1) {
        unit_ids.sort_by(|a, b| compare_ids(a, b));
        let first = unit_ids[0];
        for other in &unit_ids[1..] {
            issues.push(ValidationIssue::new(
                *other,
                ValidationProblem::DuplicateCompositeKey {
                    other_unit: first.to_string(),
                },
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupRows;
    use aquascen_core::model::{
        ClimateStation, ForeignKeys, LandUseMapping, SoilProperties, WatershedMetadata,
    };

    fn tables() -> LookupTables {
        LookupTables::build(LookupRows {
            soils: ["s1", "s2"]
                .iter()
                .map(|id| SoilProperties {
                    soil_id: (*id).into(),
                    hydrologic_group: "B".into(),
                    organic_carbon_pct: 1.2,
                    sand_pct: 40.0,
                    clay_pct: 20.0,
                    slope_pct: 2.0,
                })
                .collect(),
            stations: vec![
                ClimateStation {
                    station_id: "st2".into(),
                    climate_id: "c1".into(),
                    distance: 8.0,
                    state: "IA".into(),
                    precip_mm: 800.0,
                    temp_c: 9.0,
                },
                ClimateStation {
                    station_id: "st1".into(),
                    climate_id: "c1".into(),
                    distance: 2.0,
                    state: "IA".into(),
                    precip_mm: 820.0,
                    temp_c: 9.1,
                },
                ClimateStation {
                    station_id: "st1".into(),
                    climate_id: "c2".into(),
                    distance: 1.0,
                    state: "IA".into(),
                    precip_mm: 820.0,
                    temp_c: 9.1,
                },
            ],
            land_use: vec![LandUseMapping {
                land_use_id: "1".into(),
                crop_id: "10".into(),
                crop_name: "Corn".into(),
                root_depth_cm: 120.0,
                max_cover_pct: 90.0,
                irrigated: false,
            }],
            watersheds: vec![WatershedMetadata {
                watershed_id: "w1".into(),
                reach_id: "r1".into(),
                region: "07".into(),
            }],
        })
        .unwrap()
    }

    fn unit(id: &str, soil: &str, climate: &str) -> ValidatedUnit {
        ValidatedUnit {
            unit_id: id.into(),
            geometry_ref: format!("g-{id}"),
            keys: ForeignKeys {
                soil_id: soil.into(),
                climate_id: climate.into(),
                land_use_id: "1".into(),
                watershed_id: "w1".into(),
            },
            area: 10.0,
        }
    }

    #[test]
    fn join_resolves_nearest_station_and_sorts_by_id() {
        let records = join(
            &[unit("u1", "s1", "c1"), unit("u2", "s2", "c1")],
            &tables(),
            TargetModel::Sam,
            IdScheme::DeterministicHash,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].scenario_id < records[1].scenario_id);
        for r in &records {
            assert_eq!(r.key.station_id, "st1");
            assert_eq!(r.key.crop_id, "10");
            assert_eq!(r.attributes.watershed.region, "07");
        }
    }

    #[test]
    fn every_missing_reference_is_reported() {
        let mut bad = unit("u9", "s404", "c404");
        bad.keys.watershed_id = "w404".into();
        let err = join(
            &[unit("u1", "s1", "c1"), bad, unit("u3", "s1", "c999")],
            &tables(),
            TargetModel::Pwc,
            IdScheme::DeterministicHash,
        )
        .unwrap_err();
        let Error::MissingReference { references } = err else {
            panic!("expected missing reference");
        };
        assert_eq!(references.len(), 4);
        assert!(references.contains(&MissingReference {
            unit_id: "u3".into(),
            table: LookupTable::Climate,
            key: "c999".into(),
        }));
        assert!(references
            .iter()
            .any(|r| r.unit_id == "u9" && r.table == LookupTable::Watershed));
    }

    #[test]
    fn units_with_same_key_are_rejected() {
        let err = join(
            &[unit("u1", "s1", "c1"), unit("u2", "s1", "c1")],
            &tables(),
            TargetModel::Pwc,
            IdScheme::DeterministicHash,
        )
        .unwrap_err();
        let Error::Validation { issues } = err else {
            panic!("expected validation error");
        };
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subject, "u2");
        assert_eq!(
            issues[0].problem,
            ValidationProblem::DuplicateCompositeKey {
                other_unit: "u1".into()
            }
        );
    }

    #[test]
    fn zones_sharing_a_station_stay_distinct() {
        let records = join(
            &[unit("u1", "s1", "c1"), unit("u2", "s1", "c2")],
            &tables(),
            TargetModel::Pwc,
            IdScheme::DeterministicHash,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].scenario_id, records[1].scenario_id);
        assert!(records.iter().all(|r| r.key.station_id == "st1"));

        let zones: Vec<&str> = records.iter().map(|r| r.key.climate_id.as_str()).collect();
        assert!(zones.contains(&"c1") && zones.contains(&"c2"));
    }

    #[test]
    fn ids_do_not_depend_on_unit_order() {
        let forward = join(
            &[unit("u1", "s1", "c1"), unit("u2", "s2", "c1")],
            &tables(),
            TargetModel::Sam,
            IdScheme::Sequential,
        )
        .unwrap();
        let backward = join(
            &[unit("u2", "s2", "c1"), unit("u1", "s1", "c1")],
            &tables(),
            TargetModel::Sam,
            IdScheme::Sequential,
        )
        .unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward[0].scenario_id.as_str(), "sc-000001");
        assert_eq!(forward[0].unit_id, "u1");
    }
}
