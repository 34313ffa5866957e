//! Deterministic stand-in for the external batch model.
//!
//! [`SimulatedModelRunner`] reads the scenario file it is handed and writes
//! an output file in the batch model's format, with endpoint values drawn
//! from a seeded RNG. Failure modes reproduce what a real model run can do
//! wrong.
//!
//! # Example
//!
//! ```rust,ignore
//! use aquascen_test_utils::simulation::{SimulatedFailure, SimulatedModelRunner};
//!
//! let runner = SimulatedModelRunner::with_seed(7).with_kocs([10, 1000]);
//! let broken = SimulatedModelRunner::with_seed(7).failing(SimulatedFailure::Exit);
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aquascen_core::error::{Error, Result};
use aquascen_pipeline::runner::{BatchModelRunner, ModelRunRequest};

/// Output file written into the work directory.
pub const SIMULATED_OUTPUT: &str = "simulated_output.txt";

/// Ways the simulated model run goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// The model exits non-zero.
    Exit,
    /// The run is interrupted.
    Cancel,
    /// The output contains a scenario that was never emitted.
    UnknownScenario,
    /// The first scenario has no output rows.
    MissingScenario,
    /// One endpoint value is not a number.
    Malformed,
}

/// Simulated batch model.
#[derive(Debug)]
pub struct SimulatedModelRunner {
    seed: u64,
    kocs: Vec<u32>,
    endpoints: Vec<String>,
    header: bool,
    failure: Option<SimulatedFailure>,
    calls: AtomicUsize,
}

impl SimulatedModelRunner {
    /// Creates a runner with one koc of 100, the default endpoints and a
    /// header line.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            kocs: vec![100],
            endpoints: vec!["acute".into(), "chronic".into(), "cancer".into()],
            header: true,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Runs every scenario once per koc value.
    #[must_use]
    pub fn with_kocs(mut self, kocs: impl IntoIterator<Item = u32>) -> Self {
        self.kocs = kocs.into_iter().collect();
        self
    }

    /// Sets endpoint names.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Omits the header line; rows then use bare scenario ids.
    #[must_use]
    pub fn headerless(mut self) -> Self {
        self.header = false;
        self
    }

    /// Makes every run fail in the given way.
    #[must_use]
    pub fn failing(mut self, failure: SimulatedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Number of times the model was run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Renders output text for the given scenario ids.
    pub fn render(&self, scenario_ids: &[String]) -> String {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut ids: Vec<String> = scenario_ids.to_vec();
        if self.failure == Some(SimulatedFailure::MissingScenario) && !ids.is_empty() {
            ids.remove(0);
        }
        if self.failure == Some(SimulatedFailure::UnknownScenario) {
            ids.push(unknown_like(scenario_ids));
        }

        let mut text = String::new();
        if self.header {
            let _ = writeln!(text, "line_num run_id {}", self.endpoints.join(" "));
        }
        let mut line = 0;
        for &koc in &self.kocs {
            for id in &ids {
                line += 1;
                let run_id = if self.header {
                    format!("sim_koc{koc}_{id}_0")
                } else {
                    id.clone()
                };
                let _ = write!(text, "{line} {run_id}");
                for (i, _) in self.endpoints.iter().enumerate() {
                    if self.failure == Some(SimulatedFailure::Malformed) && line == 1 && i == 0 {
                        text.push_str(" NaN");
                    } else {
                        let _ = write!(text, " {:.6}", rng.gen_range(0.0..100.0));
                    }
                }
                text.push('\n');
            }
            if !self.header {
                // Bare ids cannot carry a koc; one pass only.
                break;
            }
        }
        text
    }
}

/// An id with the same shape as the emitted ones that none of them has.
fn unknown_like(ids: &[String]) -> String {
    let sequential = ids
        .first()
        .and_then(|id| id.strip_prefix("sc-"))
        .is_some_and(|body| body.bytes().all(|b| b.is_ascii_digit()));
    if sequential {
        "sc-999999".to_string()
    } else {
        format!("sc-{}", "f".repeat(24))
    }
}

fn read_scenario_ids(path: &std::path::Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| Error::ExternalJob {
        message: format!("simulated model cannot open {}: {e}", path.display()),
    })?;
    let column = reader
        .headers()
        .map_err(|e| Error::ExternalJob {
            message: format!("simulated model cannot read header: {e}"),
        })?
        .iter()
        .position(|h| h == "scenario_id")
        .ok_or_else(|| Error::ExternalJob {
            message: "scenario file has no scenario_id column".into(),
        })?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::ExternalJob {
            message: format!("simulated model cannot read row: {e}"),
        })?;
        if let Some(id) = record.get(column) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

#[async_trait]
impl BatchModelRunner for SimulatedModelRunner {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn run(&self, request: &ModelRunRequest) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(SimulatedFailure::Exit) => {
                return Err(Error::ExternalJob {
                    message: "simulated model exited with status 1".into(),
                })
            }
            Some(SimulatedFailure::Cancel) => {
                return Err(Error::Cancelled {
                    stage: "model run".into(),
                })
            }
            _ => {}
        }

        let ids = read_scenario_ids(&request.scenario_file)?;
        let output = request.work_dir.join(SIMULATED_OUTPUT);
        std::fs::write(&output, self.render(&ids)).map_err(|e| Error::io(&output, e))?;
        tracing::debug!(scenarios = ids.len(), kocs = self.kocs.len(), "simulated model run");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        vec!["sc-000001".into(), "sc-000002".into()]
    }

    #[test]
    fn render_is_deterministic_per_seed() {
        let a = SimulatedModelRunner::with_seed(3).render(&ids());
        let b = SimulatedModelRunner::with_seed(3).render(&ids());
        let c = SimulatedModelRunner::with_seed(4).render(&ids());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn render_writes_one_row_per_scenario_and_koc() {
        let text = SimulatedModelRunner::with_seed(1)
            .with_kocs([10, 1000])
            .render(&ids());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "line_num run_id acute chronic cancer");
        assert_eq!(lines.len(), 5);
        assert!(lines[4].starts_with("4 sim_koc1000_sc-000002_0 "));
    }

    #[test]
    fn unknown_scenario_matches_id_shape() {
        assert_eq!(unknown_like(&ids()), "sc-999999");
        assert_eq!(
            unknown_like(&["sc-3fa29c0d11aa9be0c2d4e5f6".to_string()]),
            "sc-ffffffffffffffffffffffff"
        );
    }

    #[tokio::test]
    async fn exit_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SimulatedModelRunner::with_seed(1).failing(SimulatedFailure::Exit);
        let request = ModelRunRequest {
            run_id: aquascen_core::id::RunId::generate(),
            model: aquascen_core::scenario_key::TargetModel::Pwc,
            scenario_file: dir.path().join("scenarios_pwc.csv"),
            work_dir: dir.path().to_path_buf(),
        };
        assert!(matches!(runner.run(&request).await, Err(Error::ExternalJob { .. })));
        assert_eq!(runner.calls(), 1);
        assert!(!dir.path().join(SIMULATED_OUTPUT).exists());
    }
}
