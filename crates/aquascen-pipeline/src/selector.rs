//! Representative scenario selector.
//!
//! Model output rows are grouped by crop and region (through the scenario
//! catalog) and by endpoint. Within each group the representative scenario is
//! the one with the smallest endpoint value at or above the target
//! percentile of the group's distribution, or the group maximum when nothing
//! qualifies. Equal values resolve to the smallest scenario id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use aquascen_core::config::{PercentileMethod, RunConfig};
use aquascen_core::error::{Error, Result};
use aquascen_core::id::ScenarioId;
use aquascen_core::metadata::RunWarning;
use aquascen_core::model::{EndpointKey, GroupKey, PwcOutputRecord, RankedMember, SelectionResult};

use crate::emitter::{CatalogEntry, ScenarioCatalog};

/// Selection file name.
pub const SELECTION_FILE: &str = "selection.csv";
/// Ranking file name.
pub const RANKING_FILE: &str = "selection_ranking.csv";

/// Selection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorOptions {
    /// Target percentile (0 to 100).
    pub percentile: f64,
    /// Percentile convention.
    pub method: PercentileMethod,
    /// Groups smaller than this raise a warning.
    pub min_group_size: usize,
    /// Restrict selection to these crops.
    pub crop_filter: Option<BTreeSet<String>>,
    /// Restrict selection to these regions.
    pub region_filter: Option<BTreeSet<String>>,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

impl SelectorOptions {
    /// Options taken from the run configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            percentile: config.percentile,
            method: config.percentile_method,
            min_group_size: config.min_group_size,
            crop_filter: config
                .crop_filter
                .as_ref()
                .map(|v| v.iter().cloned().collect()),
            region_filter: config
                .region_filter
                .as_ref()
                .map(|v| v.iter().cloned().collect()),
        }
    }

    fn includes(&self, group: &GroupKey) -> bool {
        self.crop_filter
            .as_ref()
            .map_or(true, |f| f.contains(&group.crop_id))
            && self
                .region_filter
                .as_ref()
                .map_or(true, |f| f.contains(&group.region))
    }
}

/// Everything the selector produced.
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    /// One result per group and endpoint, ordered by group then endpoint.
    pub results: Vec<SelectionResult>,
    /// Every group member with its rank and percentile position.
    pub ranking: Vec<RankedMember>,
    /// Small and incomplete groups.
    pub warnings: Vec<RunWarning>,
}

#[derive(Debug, Clone)]
struct Member {
    scenario_id: ScenarioId,
    value: f64,
    area: f64,
}

struct GroupTask<'a> {
    group: GroupKey,
    crop_name: &'a str,
    endpoint: EndpointKey,
    catalog_members: &'a [&'a CatalogEntry],
    members: Vec<Member>,
}

/// Selects one representative scenario per crop / region group and endpoint.
///
/// # Errors
///
/// - [`Error::OutputMismatch`] if a record's scenario is not in the catalog
/// - [`Error::Selection`] listing every catalog group without model output
///   for an expected endpoint
///
/// Expected endpoints are `endpoint_names` for every koc present in the
/// output (or without a koc when the output has no rows), so an empty output
/// leaves every group empty.
pub fn select(
    records: &[PwcOutputRecord],
    endpoint_names: &[String],
    catalog: &ScenarioCatalog,
    options: &SelectorOptions,
) -> Result<SelectionOutcome> {
    let groups: BTreeMap<GroupKey, Vec<&CatalogEntry>> = catalog
        .groups()
        .into_iter()
        .filter(|(group, _)| options.includes(group))
        .collect();

    let mut kocs: BTreeSet<Option<u32>> = records.iter().map(|r| r.koc).collect();
    if kocs.is_empty() {
        kocs.insert(None);
    }
    let mut endpoints: BTreeSet<EndpointKey> = kocs
        .iter()
        .flat_map(|koc| {
            endpoint_names
                .iter()
                .map(move |name| EndpointKey::new(*koc, name.clone()))
        })
        .collect();
    let mut members: HashMap<(GroupKey, EndpointKey), Vec<Member>> = HashMap::new();
    let mut unknown = BTreeSet::new();
    for record in records {
        let Some(entry) = catalog.get(&record.scenario_id) else {
            unknown.insert(record.scenario_id.to_string());
            continue;
        };
        for (name, value) in &record.endpoints {
            let endpoint = EndpointKey::new(record.koc, name.clone());
            endpoints.insert(endpoint.clone());
            if !options.includes(&entry.group) {
                continue;
            }
            members
                .entry((entry.group.clone(), endpoint))
                .or_default()
                .push(Member {
                    scenario_id: entry.scenario_id.clone(),
                    value: *value,
                    area: entry.area,
                });
        }
    }
    if !unknown.is_empty() {
        return Err(Error::OutputMismatch {
            source_name: "model output".into(),
            detail: "scenario ids missing from the catalog".into(),
            scenario_ids: unknown.into_iter().collect(),
        });
    }

    let mut tasks = Vec::new();
    let mut empty = Vec::new();
    for (group, catalog_members) in &groups {
        let crop_name = catalog_members
            .first()
            .map_or("", |e| e.crop_name.as_str());
        for endpoint in &endpoints {
            match members.remove(&(group.clone(), endpoint.clone())) {
                Some(found) => tasks.push(GroupTask {
                    group: group.clone(),
                    crop_name,
                    endpoint: endpoint.clone(),
                    catalog_members,
                    members: found,
                }),
                None => empty.push(format!("{group} [{endpoint}]")),
            }
        }
    }
    if !empty.is_empty() {
        return Err(Error::Selection {
            detail: "groups without model output".into(),
            groups: empty,
        });
    }

    let per_group: Vec<(SelectionResult, Vec<RankedMember>, Vec<RunWarning>)> = tasks
        .into_par_iter()
        .map(|task| select_group(task, options))
        .collect();

    let mut outcome = SelectionOutcome::default();
    for (result, ranking, warnings) in per_group {
        outcome.results.push(result);
        outcome.ranking.extend(ranking);
        outcome.warnings.extend(warnings);
    }

    tracing::info!(
        groups = groups.len(),
        endpoints = endpoints.len(),
        selections = outcome.results.len(),
        warnings = outcome.warnings.len(),
        "representative scenarios selected"
    );
    Ok(outcome)
}

fn select_group(
    task: GroupTask<'_>,
    options: &SelectorOptions,
) -> (SelectionResult, Vec<RankedMember>, Vec<RunWarning>) {
    let GroupTask {
        group,
        crop_name,
        endpoint,
        catalog_members,
        mut members,
    } = task;

    members.sort_by(|a, b| {
        a.value
            .total_cmp(&b.value)
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
    });
    let n = members.len();

    let positions = match options.method {
        PercentileMethod::NearestRank => rank_positions(n),
        PercentileMethod::AreaWeighted => {
            area_positions(&members.iter().map(|m| m.area).collect::<Vec<_>>())
        }
    };
    let (threshold, chosen) = match options.method {
        PercentileMethod::NearestRank => {
            let threshold = members[nearest_rank_index(options.percentile, n)].value;
            (threshold, first_at_or_above(&members, threshold))
        }
        PercentileMethod::AreaWeighted => {
            let index = positions
                .iter()
                .position(|&p| p >= options.percentile)
                .unwrap_or(n - 1);
            let threshold = members[index].value;
            (threshold, first_at_or_above(&members, threshold))
        }
    };

    let pick = &members[chosen];
    let result = SelectionResult {
        group: group.clone(),
        crop_name: crop_name.to_string(),
        endpoint: endpoint.clone(),
        scenario_id: pick.scenario_id.clone(),
        rank: chosen + 1,
        value: pick.value,
        threshold,
        percentile: options.percentile,
        population: n,
    };

    let ranking = members
        .iter()
        .zip(&positions)
        .enumerate()
        .map(|(i, (m, &position))| RankedMember {
            group: group.clone(),
            endpoint: endpoint.clone(),
            scenario_id: m.scenario_id.clone(),
            rank: i + 1,
            value: m.value,
            area: m.area,
            position,
        })
        .collect();

    let mut warnings = Vec::new();
    if n < options.min_group_size {
        warnings.push(RunWarning::SmallGroup {
            group: group.to_string(),
            endpoint: endpoint.to_string(),
            population: n,
            minimum: options.min_group_size,
        });
    }
    let present: BTreeSet<&ScenarioId> = members.iter().map(|m| &m.scenario_id).collect();
    let missing: Vec<String> = catalog_members
        .iter()
        .filter(|e| !present.contains(&e.scenario_id))
        .map(|e| e.scenario_id.to_string())
        .collect();
    if !missing.is_empty() {
        warnings.push(RunWarning::IncompleteGroup {
            group: group.to_string(),
            endpoint: endpoint.to_string(),
            missing,
        });
    }

    (result, ranking, warnings)
}

/// Index of the first member whose value is at least `threshold`, or the
/// last member. `members` must be sorted by value, then scenario id.
fn first_at_or_above(members: &[Member], threshold: f64) -> usize {
    members
        .iter()
        .position(|m| m.value >= threshold)
        .unwrap_or(members.len() - 1)
}

/// 0-based index of the nearest-rank percentile in a sorted sample of `n`.
///
/// Rank is `ceil(p * n / 100)` clamped to `1..=n`.
#[must_use]
pub fn nearest_rank_index(percentile: f64, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = (percentile * n as f64 / 100.0).ceil().max(1.0) as usize;
    rank.min(n) - 1
}

/// Percent rank of each position in a sorted sample of `n`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rank_positions(n: usize) -> Vec<f64> {
    (1..=n).map(|rank| rank as f64 / n as f64 * 100.0).collect()
}

/// Area-weighted percentile position of each member, in the given order.
///
/// Position is the cumulative area at the member's midpoint, as a percentage
/// of the total area.
#[must_use]
pub fn area_positions(areas: &[f64]) -> Vec<f64> {
    let total: f64 = areas.iter().sum();
    let mut cumulative = 0.0;
    areas
        .iter()
        .map(|&area| {
            cumulative += area;
            (cumulative - 0.5 * area) / total * 100.0
        })
        .collect()
}

/// Selection table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRow {
    /// Crop id.
    pub crop_id: String,
    /// Crop name.
    pub crop_name: String,
    /// Region.
    pub region: String,
    /// Sorption coefficient, blank when the output had none.
    pub koc: Option<u32>,
    /// Endpoint name.
    pub endpoint: String,
    /// Chosen scenario.
    pub scenario_id: String,
    /// 1-based rank.
    pub rank: usize,
    /// Endpoint value.
    pub value: f64,
    /// Percentile threshold.
    pub threshold: f64,
    /// Target percentile.
    pub percentile: f64,
    /// Group population.
    pub population: usize,
}

impl From<&SelectionResult> for SelectionRow {
    fn from(r: &SelectionResult) -> Self {
        Self {
            crop_id: r.group.crop_id.clone(),
            crop_name: r.crop_name.clone(),
            region: r.group.region.clone(),
            koc: r.endpoint.koc,
            endpoint: r.endpoint.name.clone(),
            scenario_id: r.scenario_id.to_string(),
            rank: r.rank,
            value: r.value,
            threshold: r.threshold,
            percentile: r.percentile,
            population: r.population,
        }
    }
}

/// Ranking table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    /// Crop id.
    pub crop_id: String,
    /// Region.
    pub region: String,
    /// Sorption coefficient.
    pub koc: Option<u32>,
    /// Endpoint name.
    pub endpoint: String,
    /// Member scenario.
    pub scenario_id: String,
    /// 1-based rank.
    pub rank: usize,
    /// Endpoint value.
    pub value: f64,
    /// Scenario area.
    pub area: f64,
    /// Percentile position.
    pub position: f64,
}

impl From<&RankedMember> for RankingRow {
    fn from(m: &RankedMember) -> Self {
        Self {
            crop_id: m.group.crop_id.clone(),
            region: m.group.region.clone(),
            koc: m.endpoint.koc,
            endpoint: m.endpoint.name.clone(),
            scenario_id: m.scenario_id.to_string(),
            rank: m.rank,
            value: m.value,
            area: m.area,
            position: m.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquascen_core::model::{
        ClimateStation, LandUseMapping, ScenarioAttributes, ScenarioRecord, SoilProperties,
        WatershedMetadata,
    };
    use aquascen_core::scenario_key::{CompositeKey, IdScheme, TargetModel};

    fn record(n: usize, crop: &str, region: &str, area: f64) -> ScenarioRecord {
        ScenarioRecord {
            scenario_id: ScenarioId::from_body(&format!("{n:06}")).unwrap(),
            unit_id: format!("u{n}"),
            key: CompositeKey {
                soil_id: format!("s{n}"),
                climate_id: "c1".into(),
                station_id: "st1".into(),
                land_use_id: crop.into(),
                watershed_id: format!("w-{region}"),
                crop_id: crop.into(),
                model: TargetModel::Pwc,
            },
            attributes: ScenarioAttributes {
                soil: SoilProperties {
                    soil_id: format!("s{n}"),
                    hydrologic_group: "B".into(),
                    organic_carbon_pct: 1.0,
                    sand_pct: 40.0,
                    clay_pct: 20.0,
                    slope_pct: 2.0,
                },
                climate: ClimateStation {
                    station_id: "st1".into(),
                    climate_id: "c1".into(),
                    distance: 1.0,
                    state: "IA".into(),
                    precip_mm: 800.0,
                    temp_c: 9.0,
                },
                land_use: LandUseMapping {
                    land_use_id: crop.into(),
                    crop_id: crop.into(),
                    crop_name: format!("crop {crop}"),
                    root_depth_cm: 100.0,
                    max_cover_pct: 80.0,
                    irrigated: false,
                },
                watershed: WatershedMetadata {
                    watershed_id: format!("w-{region}"),
                    reach_id: "r".into(),
                    region: region.into(),
                },
            },
            area,
        }
    }

    fn output(n: usize, koc: Option<u32>, acute: f64) -> PwcOutputRecord {
        PwcOutputRecord {
            scenario_id: ScenarioId::from_body(&format!("{n:06}")).unwrap(),
            koc,
            line: n,
            endpoints: [("acute".to_string(), acute)].into_iter().collect(),
        }
    }

    fn catalog(records: &[ScenarioRecord]) -> ScenarioCatalog {
        ScenarioCatalog::from_records(records, TargetModel::Pwc, IdScheme::Sequential)
    }

    fn acute() -> Vec<String> {
        vec!["acute".to_string()]
    }

    fn options(percentile: f64) -> SelectorOptions {
        SelectorOptions {
            percentile,
            min_group_size: 1,
            ..SelectorOptions::default()
        }
    }

    #[test]
    fn ninetieth_percentile_of_one_to_ten_is_nine() {
        let records: Vec<_> = (1..=10).map(|n| record(n, "10", "07", 1.0)).collect();
        // Scenario n carries value 11 - n so ids and values disagree in order.
        let outputs: Vec<_> = (1..=10)
            .map(|n| output(n, None, f64::from(11 - u32::try_from(n).unwrap())))
            .collect();

        let outcome = select(&outputs, &acute(), &catalog(&records), &options(90.0)).unwrap();
        assert_eq!(outcome.results.len(), 1);
        let result = &outcome.results[0];
        assert!((result.value - 9.0).abs() < f64::EPSILON);
        assert_eq!(result.scenario_id.as_str(), "sc-000002");
        assert_eq!(result.rank, 9);
        assert_eq!(result.population, 10);
        assert!((result.threshold - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_resolve_to_smallest_scenario_id() {
        let records: Vec<_> = (1..=4).map(|n| record(n, "10", "07", 1.0)).collect();
        let outputs = vec![
            output(4, None, 5.0),
            output(3, None, 5.0),
            output(1, None, 1.0),
            output(2, None, 2.0),
        ];
        let outcome = select(&outputs, &acute(), &catalog(&records), &options(75.0)).unwrap();
        assert_eq!(outcome.results[0].scenario_id.as_str(), "sc-000003");
    }

    #[test]
    fn groups_split_by_crop_region_and_koc() {
        let records = vec![
            record(1, "10", "07", 1.0),
            record(2, "10", "07", 1.0),
            record(3, "20", "07", 1.0),
        ];
        let outputs = vec![
            output(1, Some(10), 1.0),
            output(2, Some(10), 2.0),
            output(3, Some(10), 3.0),
        ];
        let mut outputs_k1000 = outputs.clone();
        for o in &mut outputs_k1000 {
            o.koc = Some(1000);
        }
        let all: Vec<_> = outputs.into_iter().chain(outputs_k1000).collect();

        let outcome = select(&all, &acute(), &catalog(&records), &options(50.0)).unwrap();
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.results[0].group, GroupKey::new("10", "07"));
        assert_eq!(outcome.results[0].endpoint, EndpointKey::new(Some(10), "acute"));
        assert_eq!(outcome.results[1].endpoint, EndpointKey::new(Some(1000), "acute"));
        assert_eq!(outcome.ranking.len(), 6);
    }

    #[test]
    fn empty_group_is_a_selection_error() {
        let records = vec![record(1, "10", "07", 1.0), record(2, "20", "05", 1.0)];
        let outputs = vec![output(1, None, 1.0)];
        let err = select(&outputs, &acute(), &catalog(&records), &options(90.0)).unwrap_err();
        let Error::Selection { groups, .. } = err else {
            panic!("expected selection error");
        };
        assert_eq!(groups, ["crop 20 / region 05 [acute]"]);
    }

    #[test]
    fn empty_output_leaves_every_group_empty() {
        let records = vec![record(1, "10", "07", 1.0), record(2, "20", "05", 1.0)];
        let err = select(&[], &acute(), &catalog(&records), &options(90.0)).unwrap_err();
        let Error::Selection { groups, .. } = err else {
            panic!("expected selection error");
        };
        assert_eq!(
            groups,
            ["crop 10 / region 07 [acute]", "crop 20 / region 05 [acute]"]
        );
    }

    #[test]
    fn endpoint_without_values_is_an_empty_group() {
        let records = vec![record(1, "10", "07", 1.0)];
        let outputs = vec![output(1, Some(10), 1.0)];
        let names = vec!["acute".to_string(), "chronic".to_string()];
        let err = select(&outputs, &names, &catalog(&records), &options(90.0)).unwrap_err();
        let Error::Selection { groups, .. } = err else {
            panic!("expected selection error");
        };
        assert_eq!(groups.len(), 1);
        assert!(groups[0].contains("chronic"), "{groups:?}");
    }

    #[test]
    fn filters_limit_selected_groups() {
        let records = vec![record(1, "10", "07", 1.0), record(2, "20", "05", 1.0)];
        let outputs = vec![output(1, None, 1.0)];
        let opts = SelectorOptions {
            crop_filter: Some(["10".to_string()].into_iter().collect()),
            ..options(90.0)
        };
        let outcome = select(&outputs, &acute(), &catalog(&records), &opts).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].group.crop_id, "10");
    }

    #[test]
    fn small_and_incomplete_groups_warn() {
        let records: Vec<_> = (1..=3).map(|n| record(n, "10", "07", 1.0)).collect();
        let outputs = vec![output(1, None, 1.0), output(2, None, 2.0)];
        let opts = SelectorOptions {
            min_group_size: 5,
            ..options(90.0)
        };
        let outcome = select(&outputs, &acute(), &catalog(&records), &opts).unwrap();
        let kinds: Vec<&str> = outcome.warnings.iter().map(RunWarning::kind).collect();
        assert_eq!(kinds, ["small_group", "incomplete_group"]);
        let RunWarning::IncompleteGroup { missing, .. } = &outcome.warnings[1] else {
            unreachable!()
        };
        assert_eq!(missing, &["sc-000003"]);
    }

    #[test]
    fn area_weighted_positions_use_midpoints() {
        let positions = area_positions(&[10.0, 30.0, 60.0]);
        let expected = [5.0, 25.0, 70.0];
        for (got, want) in positions.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn area_weighted_selection_follows_area() {
        let records = vec![
            record(1, "10", "07", 10.0),
            record(2, "10", "07", 30.0),
            record(3, "10", "07", 60.0),
        ];
        let outputs = vec![output(1, None, 1.0), output(2, None, 2.0), output(3, None, 3.0)];
        let opts = SelectorOptions {
            method: PercentileMethod::AreaWeighted,
            ..options(50.0)
        };
        let outcome = select(&outputs, &acute(), &catalog(&records), &opts).unwrap();
        assert_eq!(outcome.results[0].scenario_id.as_str(), "sc-000003");

        let high = SelectorOptions {
            method: PercentileMethod::AreaWeighted,
            ..options(95.0)
        };
        let outcome = select(&outputs, &acute(), &catalog(&records), &high).unwrap();
        assert_eq!(outcome.results[0].scenario_id.as_str(), "sc-000003");
        assert_eq!(outcome.results[0].rank, 3);
    }

    #[test]
    fn nearest_rank_index_clamps() {
        assert_eq!(nearest_rank_index(0.0, 10), 0);
        assert_eq!(nearest_rank_index(90.0, 10), 8);
        assert_eq!(nearest_rank_index(100.0, 10), 9);
        assert_eq!(nearest_rank_index(50.0, 1), 0);
        assert_eq!(nearest_rank_index(91.0, 10), 9);
    }
}
