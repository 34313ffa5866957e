//! Property-based tests for aquascen-pipeline invariants.
//!
//! These tests use proptest to verify that scenario identity, recipe
//! fractions and representative selection hold across randomly generated
//! overlays and model outputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;

use aquascen_core::config::PercentileMethod;
use aquascen_core::model::{
    ClimateStation, LandUseMapping, OverlayUnit, PwcOutputRecord, ScenarioRecord, SoilProperties,
    WatershedMetadata,
};
use aquascen_core::scenario_key::{IdScheme, TargetModel};
use aquascen_pipeline::adapters::OutputSet;
use aquascen_pipeline::emitter::{ScenarioCatalog, ScenarioSchema};
use aquascen_pipeline::joiner::join;
use aquascen_pipeline::lookup::{LookupRows, LookupTables};
use aquascen_pipeline::overlay::validate_overlay;
use aquascen_pipeline::recipe::build_recipes;
use aquascen_pipeline::selector::{select, SelectorOptions};

/// One generated unit: (land-use class index, watershed index, area).
fn arb_units() -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
    prop::collection::vec((0usize..2, 0usize..4, 0.001f64..1.0e6), 1..40)
}

fn arb_scheme() -> impl Strategy<Value = IdScheme> {
    prop::sample::select(vec![IdScheme::DeterministicHash, IdScheme::Sequential])
}

fn lookup_rows(n_soils: usize) -> LookupRows {
    LookupRows {
        soils: (0..n_soils)
            .map(|i| SoilProperties {
                soil_id: format!("s{i}"),
                hydrologic_group: "C".into(),
                organic_carbon_pct: 1.5,
                sand_pct: 30.0,
                clay_pct: 25.0,
                slope_pct: 4.0,
            })
            .collect(),
        stations: vec![
            ClimateStation {
                station_id: "near".into(),
                climate_id: "c1".into(),
                distance: 2.0,
                state: "IL".into(),
                precip_mm: 950.0,
                temp_c: 11.0,
            },
            ClimateStation {
                station_id: "far".into(),
                climate_id: "c1".into(),
                distance: 20.0,
                state: "IN".into(),
                precip_mm: 1000.0,
                temp_c: 11.5,
            },
        ],
        land_use: [("1", "10", "Corn"), ("2", "20", "Soybeans")]
            .into_iter()
            .map(|(lu, crop, name)| LandUseMapping {
                land_use_id: lu.into(),
                crop_id: crop.into(),
                crop_name: name.into(),
                root_depth_cm: 100.0,
                max_cover_pct: 85.0,
                irrigated: false,
            })
            .collect(),
        watersheds: (0..4)
            .map(|i| WatershedMetadata {
                watershed_id: format!("w{i}"),
                reach_id: format!("r{i}"),
                region: format!("0{}", i % 2),
            })
            .collect(),
    }
}

fn overlay(layout: &[(usize, usize, f64)]) -> Vec<OverlayUnit> {
    layout.iter()
        .enumerate()
        .map(|(i, &(lu, ws, area))| OverlayUnit {
            unit_id: format!("u{i}"),
            geometry_ref: Some(format!("g{i}")),
            soil_id: Some(format!("s{i}")),
            climate_id: Some("c1".into()),
            land_use_id: Some((lu + 1).to_string()),
            watershed_id: Some(format!("w{ws}")),
            area: Some(area),
        })
        .collect()
}

fn prepare(units: &[OverlayUnit], model: TargetModel, scheme: IdScheme) -> Vec<ScenarioRecord> {
    let validated = validate_overlay(units).unwrap();
    let tables = LookupTables::build(lookup_rows(units.len())).unwrap();
    join(&validated, &tables, model, scheme).unwrap()
}

fn output_rows(records: &[ScenarioRecord], values: &[f64]) -> Vec<PwcOutputRecord> {
    records
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (r, &v))| PwcOutputRecord {
            scenario_id: r.scenario_id.clone(),
            koc: Some(100),
            line: i + 1,
            endpoints: BTreeMap::from([("acute".to_string(), v)]),
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The same overlay yields the same ids regardless of unit order.
    #[test]
    fn scenario_ids_ignore_unit_order(layout in arb_units(), scheme in arb_scheme()) {
        let units = overlay(&layout);
        let mut reversed = units.clone();
        reversed.reverse();

        let a = prepare(&units, TargetModel::Sam, scheme);
        let b = prepare(&reversed, TargetModel::Sam, scheme);
        prop_assert_eq!(a.len(), units.len());

        let by_unit = |records: &[ScenarioRecord]| -> HashMap<String, String> {
            records
                .iter()
                .map(|r| (r.unit_id.clone(), r.scenario_id.to_string()))
                .collect()
        };
        prop_assert_eq!(by_unit(&a), by_unit(&b));
        prop_assert!(a.windows(2).all(|w| w[0].scenario_id < w[1].scenario_id));
        prop_assert!(a.iter().all(|r| scheme.accepts(&r.scenario_id)));
    }

    /// Every watershed's fractions sum to one and each lies in (0, 1].
    #[test]
    fn recipe_fractions_sum_to_one(layout in arb_units()) {
        let records = prepare(&overlay(&layout), TargetModel::Sam, IdScheme::DeterministicHash);
        let set = build_recipes(&records, 1e-9, 0.95).unwrap();

        let members: usize = set.recipes.iter().map(|r| r.entries.len()).sum();
        prop_assert_eq!(members, records.len());
        for recipe in &set.recipes {
            prop_assert!((recipe.fraction_sum - 1.0).abs() <= 1e-9);
            for entry in &recipe.entries {
                prop_assert!(entry.fraction > 0.0 && entry.fraction <= 1.0);
            }
            prop_assert!(recipe
                .entries
                .windows(2)
                .all(|w| w[0].fraction >= w[1].fraction));
        }
    }

    /// The representative is the smallest value at or above the percentile
    /// threshold, and it does not depend on output row order.
    #[test]
    fn selection_picks_smallest_value_at_threshold(
        layout in arb_units(),
        values in prop::collection::vec(0.0f64..1000.0, 40),
        percentile in 1.0f64..=100.0,
        area_weighted in any::<bool>(),
    ) {
        let records = prepare(&overlay(&layout), TargetModel::Pwc, IdScheme::Sequential);
        let catalog = ScenarioCatalog::from_records(&records, TargetModel::Pwc, IdScheme::Sequential);
        let rows = output_rows(&records, &values);
        let endpoints = vec!["acute".to_string()];
        let options = SelectorOptions {
            percentile,
            method: if area_weighted {
                PercentileMethod::AreaWeighted
            } else {
                PercentileMethod::NearestRank
            },
            min_group_size: 1,
            ..SelectorOptions::default()
        };

        let outcome = select(&rows, &endpoints, &catalog, &options).unwrap();
        let mut reversed = rows.clone();
        reversed.reverse();
        let again = select(&reversed, &endpoints, &catalog, &options).unwrap();
        prop_assert_eq!(&outcome.results, &again.results);

        let value_of: HashMap<String, f64> = rows
            .iter()
            .map(|r| (r.scenario_id.to_string(), r.endpoints["acute"]))
            .collect();
        for result in &outcome.results {
            // (value, scenario id, area), ordered by value then id.
            let mut group: Vec<(f64, String, f64)> = records
                .iter()
                .filter(|r| r.group() == result.group)
                .map(|r| (value_of[r.scenario_id.as_str()], r.scenario_id.to_string(), r.area))
                .collect();
            group.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            let n = group.len();
            prop_assert_eq!(n, result.population);

            let index = if area_weighted {
                let total: f64 = group.iter().map(|m| m.2).sum();
                let mut cumulative = 0.0;
                group
                    .iter()
                    .position(|m| {
                        cumulative += m.2;
                        (cumulative - 0.5 * m.2) / total * 100.0 >= percentile
                    })
                    .unwrap_or(n - 1)
            } else {
                let rank = (percentile * n as f64 / 100.0).ceil() as usize;
                rank.clamp(1, n) - 1
            };
            let threshold = group[index].0;
            prop_assert_eq!(result.threshold, threshold);

            let expected = group.iter().find(|m| m.0 >= threshold).unwrap();
            prop_assert_eq!(result.value, expected.0);
            prop_assert_eq!(result.scenario_id.as_str(), expected.1.as_str());
        }
    }

    /// The emitted scenario file reads back into the catalog it came from.
    #[test]
    fn emitted_scenarios_reload_into_catalog(layout in arb_units(), scheme in arb_scheme()) {
        for model in [TargetModel::Pwc, TargetModel::Sam] {
            let records = prepare(&overlay(&layout), model, scheme);
            let schema = ScenarioSchema::for_model(model);
            let mut outputs = OutputSet::new();
            schema.emit(&records, &mut outputs).unwrap();

            let bytes = outputs.get(&schema.file_name()).unwrap();
            let reloaded =
                ScenarioCatalog::from_scenario_csv(bytes, "scenarios.csv", model, scheme).unwrap();
            let original = ScenarioCatalog::from_records(&records, model, scheme);
            prop_assert_eq!(reloaded.len(), original.len());
            for entry in original.entries() {
                let found = reloaded.get(&entry.scenario_id).unwrap();
                prop_assert_eq!(&found.group, &entry.group);
                prop_assert_eq!(&found.key, &entry.key);
            }
        }
    }
}
