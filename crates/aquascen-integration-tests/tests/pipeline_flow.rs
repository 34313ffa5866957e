//! End-to-end runs: preparation, the batch model and selection together.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;

use aquascen_core::metadata::{RunMetadata, StageKind};
use aquascen_core::scenario_key::{IdScheme, TargetModel};
use aquascen_pipeline::adapters::{read_csv_rows, read_lookup_rows, CsvOverlayProvider};
use aquascen_pipeline::recipe::RecipeRow;
use aquascen_pipeline::runner::ProcessRunner;
use aquascen_pipeline::Pipeline;
use aquascen_test_utils::{
    assert_outputs_exactly, assert_recipes_consistent, assert_selections_in_group,
    init_test_logging, ScenarioFixture, SimulatedModelRunner, TestWorkspace,
};

fn read_metadata(ws: &TestWorkspace, name: &str) -> RunMetadata {
    let text = std::fs::read_to_string(ws.output(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn csv_provider(ws: &TestWorkspace) -> CsvOverlayProvider {
    CsvOverlayProvider::new(&ws.config().inputs.overlay)
}

#[tokio::test]
async fn watershed_run_commits_every_output() {
    init_test_logging();
    let fixture = ScenarioFixture::new(6);
    let ws = TestWorkspace::new(&fixture, TargetModel::Sam);
    let pipeline = Pipeline::new(ws.config().clone()).unwrap();
    let rows = read_lookup_rows(&ws.config().inputs).unwrap();
    let runner = SimulatedModelRunner::with_seed(42);

    let report = pipeline.run(&csv_provider(&ws), rows, &runner).await.unwrap();

    assert_eq!(runner.calls(), 1);
    assert_eq!(report.scenarios, 18);
    assert_eq!(report.recipes, 3);
    // 2 crops x 2 regions x 3 endpoints
    assert_eq!(report.selections.len(), 12);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_outputs_exactly(
        ws.output_dir(),
        &[
            "crop_summary.csv",
            "prepare_metadata.json",
            "recipe_map.csv",
            "recipes.csv",
            "scenarios_sam.csv",
            "selection.csv",
            "selection_metadata.json",
        ],
    );

    let catalog = pipeline.load_catalog(None).unwrap();
    assert_eq!(catalog.len(), 18);
    assert_selections_in_group(&report.selections, &catalog);

    let recipe_rows: Vec<RecipeRow> = read_csv_rows(&ws.output("recipes.csv")).unwrap();
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for row in &recipe_rows {
        *sums.entry(row.watershed_id.clone()).or_default() += row.fraction;
    }
    assert_eq!(sums.len(), 3);
    for (watershed, sum) in sums {
        assert!((sum - 1.0).abs() < 1e-9, "{watershed}: {sum}");
    }

    let prepare = read_metadata(&ws, "prepare_metadata.json");
    assert_eq!(prepare.run_id, report.run_id);
    assert_eq!(prepare.stage, StageKind::Prepare);
    assert_eq!(prepare.counts["scenarios"], 18);
    assert_eq!(prepare.target_model, "model_B");
    assert!(prepare.files.contains(&"recipe_map.csv".to_string()));

    let selection = read_metadata(&ws, "selection_metadata.json");
    assert_eq!(selection.run_id, report.run_id);
    assert_eq!(selection.counts["selections"], 12);
    assert_eq!(selection.config_fingerprint, prepare.config_fingerprint);
}

#[tokio::test]
async fn field_run_selects_per_koc_and_skips_recipes() {
    let fixture = ScenarioFixture::new(4);
    let mut ws = TestWorkspace::new(&fixture, TargetModel::Pwc);
    ws.config_mut().write_ranking = true;
    let pipeline = Pipeline::new(ws.config().clone()).unwrap();
    let runner = SimulatedModelRunner::with_seed(7).with_kocs([10, 1000]);

    let report = pipeline
        .run(&fixture.overlay(), fixture.lookup_rows(), &runner)
        .await
        .unwrap();

    assert_eq!(report.recipes, 0);
    // 4 groups x 2 kocs x 3 endpoints
    assert_eq!(report.selections.len(), 24);
    assert!(report
        .selections
        .iter()
        .all(|s| matches!(s.endpoint.koc, Some(10 | 1000))));
    assert_outputs_exactly(
        ws.output_dir(),
        &[
            "crop_summary.csv",
            "prepare_metadata.json",
            "scenarios_pwc.csv",
            "scenarios_pwc_crop10.csv",
            "scenarios_pwc_crop20.csv",
            "selection.csv",
            "selection_metadata.json",
            "selection_ranking.csv",
        ],
    );
}

#[test]
fn repeated_preparation_is_byte_identical() {
    let fixture = ScenarioFixture::new(5);
    for scheme in [IdScheme::DeterministicHash, IdScheme::Sequential] {
        let mut ws = TestWorkspace::new(&fixture, TargetModel::Sam);
        ws.config_mut().id_scheme = scheme;

        let first = Pipeline::new(ws.config().clone())
            .unwrap()
            .prepare(&fixture.overlay(), fixture.lookup_rows())
            .unwrap();
        let second = Pipeline::new(ws.config().clone())
            .unwrap()
            .prepare(&csv_provider(&ws), read_lookup_rows(&ws.config().inputs).unwrap())
            .unwrap();
        let recipes = first.recipes.as_ref().unwrap();
        assert_recipes_consistent(&recipes.recipes, ws.config().epsilon_tolerance);

        for name in ["scenarios_sam.csv", "recipes.csv", "recipe_map.csv", "crop_summary.csv"] {
            assert_eq!(
                first.outputs.get(name),
                second.outputs.get(name),
                "{name} differs under {scheme}"
            );
        }
        assert_ne!(first.metadata.run_id, second.metadata.run_id);
    }
}

#[test]
fn field_preparation_samples_each_crop_reproducibly() {
    let fixture = ScenarioFixture::new(30);
    let mut ws = TestWorkspace::new(&fixture, TargetModel::Pwc);
    ws.config_mut().sample_pct = 20.0;
    ws.config_mut().min_sample_size = 5;
    ws.config_mut().sample_seed = 2024;

    let prepare = || {
        Pipeline::new(ws.config().clone())
            .unwrap()
            .prepare(&fixture.overlay(), fixture.lookup_rows())
            .unwrap()
    };
    let first = prepare();
    let second = prepare();
    for name in ["scenarios_pwc_crop10.csv", "scenarios_pwc_crop20.csv"] {
        let bytes = first.outputs.get(name).unwrap();
        assert_eq!(Some(bytes), second.outputs.get(name), "{name} differs");
        // 45 scenarios per crop, 20% kept, plus the header.
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 10);
    }

    Pipeline::new(ws.config().clone())
        .unwrap()
        .commit(first.outputs)
        .unwrap();
    let metadata = read_metadata(&ws, "prepare_metadata.json");
    assert_eq!(metadata.sample_seed, Some(2024));
    assert_eq!(metadata.counts["sampled_scenarios"], 18);
}

#[test]
fn stages_run_separately_agree_on_scenario_ids() {
    let fixture = ScenarioFixture::new(4);
    let mut ws = TestWorkspace::new(&fixture, TargetModel::Pwc);
    ws.config_mut().id_scheme = IdScheme::Sequential;

    let prepare = Pipeline::new(ws.config().clone()).unwrap();
    let prepared = prepare
        .prepare(&fixture.overlay(), fixture.lookup_rows())
        .unwrap();
    let ids: Vec<String> = prepared
        .records
        .iter()
        .map(|r| r.scenario_id.to_string())
        .collect();
    prepare.commit(prepared.outputs).unwrap();

    // The model echoes scenario ids; a fresh run reads them back.
    let output = SimulatedModelRunner::with_seed(3).headerless().render(&ids);
    let select = Pipeline::new(ws.config().clone()).unwrap();
    assert_ne!(select.run_id(), prepare.run_id());
    let catalog = select.load_catalog(None).unwrap();
    let selected = select.select(&catalog, &output, "model_output.txt").unwrap();

    assert_eq!(selected.outcome.results.len(), 12);
    assert_selections_in_group(&selected.outcome.results, &catalog);
    select.commit(selected.outputs).unwrap();
    assert!(ws.output("selection.csv").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn external_process_output_drives_selection() {
    let fixture = ScenarioFixture::new(4);
    let ws = TestWorkspace::new(&fixture, TargetModel::Pwc);
    let pipeline = Pipeline::new(ws.config().clone()).unwrap();
    // Headerless rows: line number, scenario id, three endpoint values.
    let runner = ProcessRunner::new("sh").with_args([
        "-c",
        "awk -F, 'NR > 1 { print NR - 1, $1, NR, NR * 2, NR * 3 }' \"$0\" > \"$1\"",
        "{scenarios}",
        "{output}",
    ]);

    let report = pipeline
        .run(&fixture.overlay(), fixture.lookup_rows(), &runner)
        .await
        .unwrap();

    assert_eq!(report.selections.len(), 12);
    for selection in &report.selections {
        assert!(selection.value >= selection.threshold);
        assert!(selection.endpoint.koc.is_none());
    }
    assert!(ws.output("selection.csv").is_file());
}
