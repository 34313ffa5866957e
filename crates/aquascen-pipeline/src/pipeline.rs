//! Stage orchestration.
//!
//! `prepare` and `select` build their outputs entirely in memory and return
//! them as an [`OutputSet`]; nothing is written until [`Pipeline::commit`].
//! [`Pipeline::run`] chains both stages around the external model and
//! commits everything in one step after the model succeeded.

use std::path::{Path, PathBuf};

use tracing::Instrument;

use aquascen_core::config::RunConfig;
use aquascen_core::error::{Error, Result};
use aquascen_core::id::RunId;
use aquascen_core::metadata::{RunMetadata, RunWarning, StageKind};
use aquascen_core::model::{ScenarioRecord, SelectionResult};
use aquascen_core::observability::{model_run_span, stage_span};

use crate::adapters::OutputSet;
use crate::emitter::{self, ScenarioCatalog, ScenarioSchema, CROP_SUMMARY_FILE};
use crate::joiner;
use crate::lookup::{LookupRows, LookupTables};
use crate::output_parser;
use crate::overlay::{validate_overlay, SpatialOverlayProvider};
use crate::recipe::{self, RecipeSet, RECIPES_FILE, RECIPE_MAP_FILE};
use crate::runner::{BatchModelRunner, ModelRunRequest};
use crate::sampler::{self, SampleOptions};
use crate::selector::{self, RankingRow, SelectionOutcome, SelectionRow, SelectorOptions};

/// Preparation metadata file name.
pub const PREPARE_METADATA_FILE: &str = "prepare_metadata.json";
/// Selection metadata file name.
pub const SELECTION_METADATA_FILE: &str = "selection_metadata.json";

/// Result of the preparation stage, not yet committed.
#[derive(Debug)]
pub struct Prepared {
    /// Scenario records ordered by scenario id.
    pub records: Vec<ScenarioRecord>,
    /// Watershed recipes, for targets that use them.
    pub recipes: Option<RecipeSet>,
    /// Catalog of the emitted scenarios.
    pub catalog: ScenarioCatalog,
    /// Serialized outputs.
    pub outputs: OutputSet,
    /// Stage metadata (also serialized into `outputs`).
    pub metadata: RunMetadata,
}

/// Result of the selection stage, not yet committed.
#[derive(Debug)]
pub struct Selected {
    /// Selections, ranking and warnings.
    pub outcome: SelectionOutcome,
    /// Serialized outputs.
    pub outputs: OutputSet,
    /// Stage metadata (also serialized into `outputs`).
    pub metadata: RunMetadata,
}

/// Summary of a full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run id.
    pub run_id: RunId,
    /// Number of scenarios emitted.
    pub scenarios: usize,
    /// Number of watershed recipes built.
    pub recipes: usize,
    /// Representative scenarios.
    pub selections: Vec<SelectionResult>,
    /// Every warning of both stages.
    pub warnings: Vec<RunWarning>,
    /// Committed files.
    pub files: Vec<PathBuf>,
}

/// A configured pipeline run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: RunConfig,
    run_id: RunId,
    fingerprint: String,
}

impl Pipeline {
    /// Creates a pipeline with a fresh run id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: RunConfig) -> Result<Self> {
        Self::with_run_id(config, RunId::generate())
    }

    /// Creates a pipeline with a given run id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_run_id(config: RunConfig, run_id: RunId) -> Result<Self> {
        config.validate()?;
        let fingerprint = config.fingerprint()?;
        Ok(Self {
            config,
            run_id,
            fingerprint,
        })
    }

    /// Run id.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    fn metadata(&self, stage: StageKind) -> RunMetadata {
        RunMetadata::start(
            self.run_id,
            stage,
            self.fingerprint.clone(),
            self.config.target_model.config_name(),
            &self.config.id_scheme.to_string(),
        )
    }

    /// Validates the overlay, joins it with the lookup tables and serializes
    /// the scenario file. Field targets also get per-crop samples; watershed
    /// targets get recipes.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; nothing is written either way.
    pub fn prepare(
        &self,
        provider: &dyn SpatialOverlayProvider,
        rows: LookupRows,
    ) -> Result<Prepared> {
        let span = stage_span("prepare", &self.run_id);
        let _guard = span.enter();
        let mut metadata = self.metadata(StageKind::Prepare);
        let model = self.config.target_model;

        let units = provider.units()?;
        tracing::info!(provider = provider.name(), units = units.len(), "overlay loaded");
        let validated = validate_overlay(&units)?;
        let tables = LookupTables::build(rows)?;
        let records = joiner::join(&validated, &tables, model, self.config.id_scheme)?;

        let mut outputs = OutputSet::new();
        let schema = ScenarioSchema::for_model(model);
        schema.emit(&records, &mut outputs)?;
        let mut summary = emitter::crop_summary(&records);
        if model.samples_crops() {
            let options = SampleOptions::from_config(&self.config);
            let samples = sampler::sample_by_crop(&records, &options);
            sampler::emit_samples(&samples, &mut outputs)?;
            for row in &mut summary {
                row.sample_size = samples
                    .iter()
                    .find(|s| s.crop_id == row.crop_id)
                    .map_or(0, |s| s.records.len());
            }
            metadata.count(
                "sampled_scenarios",
                samples.iter().map(|s| s.records.len()).sum(),
            );
            metadata.sample_seed = Some(options.seed);
        }
        outputs.add_csv(CROP_SUMMARY_FILE, &summary)?;

        let recipes = if model.builds_recipes() {
            let set = recipe::build_recipes(
                &records,
                self.config.epsilon_tolerance,
                self.config.skew_warning_fraction,
            )?;
            let (recipe_rows, map) = recipe::flatten(&set.recipes);
            outputs.add_csv(RECIPES_FILE, &recipe_rows)?;
            outputs.add_csv(RECIPE_MAP_FILE, &map)?;
            metadata.count("watersheds", set.recipes.len());
            metadata.count("recipe_rows", recipe_rows.len());
            metadata.warn_all(set.warnings.iter().cloned());
            Some(set)
        } else {
            None
        };

        metadata.count("units", validated.len());
        metadata.count("scenarios", records.len());
        metadata.count("crops", summary.len());
        self.seal(&mut metadata, &mut outputs, PREPARE_METADATA_FILE)?;

        let catalog = ScenarioCatalog::from_records(&records, model, self.config.id_scheme);
        Ok(Prepared {
            records,
            recipes,
            catalog,
            outputs,
            metadata,
        })
    }

    /// Parses model output against `catalog` and selects representatives.
    ///
    /// # Errors
    ///
    /// Returns parse, mismatch or selection errors; nothing is written.
    pub fn select(
        &self,
        catalog: &ScenarioCatalog,
        output_text: &str,
        source_name: &str,
    ) -> Result<Selected> {
        let span = stage_span("select", &self.run_id);
        let _guard = span.enter();
        let mut metadata = self.metadata(StageKind::Select);

        let parsed =
            output_parser::parse_output(output_text, source_name, &self.config.endpoints, catalog)?;
        let outcome = selector::select(
            &parsed.records,
            &parsed.endpoints,
            catalog,
            &SelectorOptions::from_config(&self.config),
        )?;

        let mut outputs = OutputSet::new();
        outputs.add_csv(
            selector::SELECTION_FILE,
            outcome.results.iter().map(SelectionRow::from),
        )?;
        if self.config.write_ranking {
            outputs.add_csv(
                selector::RANKING_FILE,
                outcome.ranking.iter().map(RankingRow::from),
            )?;
        }

        metadata.count("output_rows", parsed.records.len());
        metadata.count("endpoints", parsed.endpoints.len());
        metadata.count("selections", outcome.results.len());
        metadata.warn_all(outcome.warnings.iter().cloned());
        self.seal(&mut metadata, &mut outputs, SELECTION_METADATA_FILE)?;

        Ok(Selected {
            outcome,
            outputs,
            metadata,
        })
    }

    /// Reads the committed scenario file of the configured model back into
    /// a catalog, recomputing every id.
    ///
    /// # Errors
    ///
    /// Returns I/O, parse or drift errors.
    pub fn load_catalog(&self, path: Option<&Path>) -> Result<ScenarioCatalog> {
        let default_path = self
            .config
            .output_dir
            .join(emitter::scenario_file_name(self.config.target_model));
        let path = path.unwrap_or(&default_path);
        let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
        ScenarioCatalog::from_scenario_csv(
            file,
            &path.display().to_string(),
            self.config.target_model,
            self.config.id_scheme,
        )
    }

    /// Commits outputs into the configured output directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if any file cannot be staged or renamed.
    pub fn commit(&self, outputs: OutputSet) -> Result<Vec<PathBuf>> {
        outputs.commit(&self.config.output_dir)
    }

    /// Prepares scenarios, runs the external model, selects representatives
    /// and commits every output of both stages together.
    ///
    /// # Errors
    ///
    /// Returns the first stage, model or commit error. If the model fails or
    /// the run is cancelled, no output file is committed.
    pub async fn run(
        &self,
        provider: &dyn SpatialOverlayProvider,
        rows: LookupRows,
        runner: &dyn BatchModelRunner,
    ) -> Result<RunReport> {
        let prepared = self.prepare(provider, rows)?;

        let out_dir = &self.config.output_dir;
        std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
        let work = tempfile::Builder::new()
            .prefix(".aquascen-model-")
            .tempdir_in(out_dir)
            .map_err(|e| Error::io(out_dir, e))?;

        let scenario_name = emitter::scenario_file_name(self.config.target_model);
        let scenario_bytes = prepared
            .outputs
            .get(&scenario_name)
            .ok_or_else(|| Error::internal(format!("{scenario_name} was not serialized")))?;
        let scenario_file = work.path().join(&scenario_name);
        std::fs::write(&scenario_file, scenario_bytes).map_err(|e| Error::io(&scenario_file, e))?;

        let request = ModelRunRequest {
            run_id: self.run_id,
            model: self.config.target_model,
            scenario_file,
            work_dir: work.path().to_path_buf(),
        };
        let output_path = runner
            .run(&request)
            .instrument(model_run_span(runner.name(), &self.run_id))
            .await?;
        let output_text =
            std::fs::read_to_string(&output_path).map_err(|e| Error::io(&output_path, e))?;

        let selected = self.select(
            &prepared.catalog,
            &output_text,
            &output_path.display().to_string(),
        )?;

        let mut warnings = prepared.metadata.warnings.clone();
        warnings.extend(selected.metadata.warnings.iter().cloned());
        let scenarios = prepared.records.len();
        let recipes = prepared.recipes.as_ref().map_or(0, |r| r.recipes.len());

        let mut outputs = prepared.outputs;
        outputs.extend(selected.outputs);
        let files = self.commit(outputs)?;

        Ok(RunReport {
            run_id: self.run_id,
            scenarios,
            recipes,
            selections: selected.outcome.results,
            warnings,
            files,
        })
    }

    fn seal(
        &self,
        metadata: &mut RunMetadata,
        outputs: &mut OutputSet,
        name: &str,
    ) -> Result<()> {
        metadata.files = outputs.file_names();
        metadata.files.push(name.to_string());
        metadata.finish();
        outputs.add_json(name, &*metadata)?;
        tracing::info!(
            stage = %metadata.stage,
            files = metadata.files.len(),
            warnings = metadata.warnings.len(),
            "stage outputs serialized"
        );
        Ok(())
    }
}
