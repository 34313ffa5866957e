//! Run metadata written next to every committed output set.
//!
//! Warnings are non-fatal anomalies. They are logged when raised and always
//! persisted here; they never abort the run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RunId;

/// Pipeline stage a metadata file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Overlay validation, join, emission and recipe building.
    Prepare,
    /// Output parsing and representative selection.
    Select,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Select => write!(f, "select"),
        }
    }
}

/// A non-fatal anomaly recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// One scenario dominates a watershed recipe.
    SkewedWatershed {
        /// Watershed id.
        watershed_id: String,
        /// Dominant scenario.
        scenario_id: String,
        /// Its area fraction.
        fraction: f64,
        /// Number of recipe members.
        members: usize,
    },
    /// A selection group has fewer members than configured.
    SmallGroup {
        /// Group key rendered as text.
        group: String,
        /// Endpoint rendered as text.
        endpoint: String,
        /// Members in the group.
        population: usize,
        /// Configured minimum.
        minimum: usize,
    },
    /// Emitted scenarios of a group have no model output for an endpoint.
    IncompleteGroup {
        /// Group key rendered as text.
        group: String,
        /// Endpoint rendered as text.
        endpoint: String,
        /// Scenarios without output rows.
        missing: Vec<String>,
    },
}

impl RunWarning {
    /// Short name of the warning kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SkewedWatershed { .. } => "skewed_watershed",
            Self::SmallGroup { .. } => "small_group",
            Self::IncompleteGroup { .. } => "incomplete_group",
        }
    }

    /// Emits the warning through `tracing`.
    pub fn log(&self) {
        match self {
            Self::SkewedWatershed {
                watershed_id,
                scenario_id,
                fraction,
                members,
            } => tracing::warn!(
                watershed_id = %watershed_id,
                scenario_id = %scenario_id,
                fraction,
                members,
                "watershed recipe dominated by a single scenario"
            ),
            Self::SmallGroup {
                group,
                endpoint,
                population,
                minimum,
            } => tracing::warn!(
                group = %group,
                endpoint = %endpoint,
                population,
                minimum,
                "selection group smaller than configured minimum"
            ),
            Self::IncompleteGroup {
                group,
                endpoint,
                missing,
            } => tracing::warn!(
                group = %group,
                endpoint = %endpoint,
                missing = missing.len(),
                "emitted scenarios without model output"
            ),
        }
    }
}

/// Summary of one committed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run id (not part of any scenario identity).
    pub run_id: RunId,
    /// Stage described.
    pub stage: StageKind,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the outputs were committed.
    pub finished_at: DateTime<Utc>,
    /// Fingerprint of the configuration in force.
    pub config_fingerprint: String,
    /// Target model label.
    pub target_model: String,
    /// Scenario id scheme.
    pub id_scheme: String,
    /// Named counts (units, scenarios, watersheds, groups, ...).
    pub counts: BTreeMap<String, usize>,
    /// Files committed, relative to the output directory.
    pub files: Vec<String>,
    /// Every warning raised during the stage.
    pub warnings: Vec<RunWarning>,
    /// Seed of the crop sampler, when crop samples were drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_seed: Option<u64>,
}

impl RunMetadata {
    /// Starts metadata for a stage; `finished_at` is set by [`Self::finish`].
    #[must_use]
    pub fn start(
        run_id: RunId,
        stage: StageKind,
        config_fingerprint: String,
        target_model: &str,
        id_scheme: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            stage,
            started_at: now,
            finished_at: now,
            config_fingerprint,
            target_model: target_model.to_string(),
            id_scheme: id_scheme.to_string(),
            counts: BTreeMap::new(),
            files: Vec::new(),
            warnings: Vec::new(),
            sample_seed: None,
        }
    }

    /// Records a named count.
    pub fn count(&mut self, name: &str, value: usize) {
        self.counts.insert(name.to_string(), value);
    }

    /// Records warnings, logging each.
    pub fn warn_all(&mut self, warnings: impl IntoIterator<Item = RunWarning>) {
        for warning in warnings {
            warning.log();
            self.warnings.push(warning);
        }
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }
}
