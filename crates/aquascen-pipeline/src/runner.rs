//! External batch model execution.
//!
//! The fate-and-transport model runs out of process. The pipeline hands it
//! the scenario file and waits for the output file; nothing downstream is
//! committed until the runner returns successfully.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use aquascen_core::error::{Error, Result};
use aquascen_core::id::RunId;
use aquascen_core::scenario_key::TargetModel;

/// What the runner is asked to do.
#[derive(Debug, Clone)]
pub struct ModelRunRequest {
    /// Run this model execution belongs to.
    pub run_id: RunId,
    /// Target model.
    pub model: TargetModel,
    /// Scenario file to feed the model.
    pub scenario_file: PathBuf,
    /// Scratch directory the model may write into.
    pub work_dir: PathBuf,
}

/// Executes the external batch model.
#[async_trait]
pub trait BatchModelRunner: Send + Sync {
    /// Short runner name for logs.
    fn name(&self) -> &str;

    /// Runs the model and returns the path of its output file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalJob`] if the model fails, or
    /// [`Error::Cancelled`] if the run was interrupted.
    async fn run(&self, request: &ModelRunRequest) -> Result<PathBuf>;
}

/// Runs the model as a child process.
///
/// Arguments may contain the placeholders `{scenarios}`, `{output}` and
/// `{work_dir}`. The child is killed if the run is cancelled with Ctrl-C or
/// exceeds the timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    output_name: String,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Creates a runner for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output_name: "model_output.txt".into(),
            timeout: None,
        }
    }

    /// Sets the argument template.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output file name expected inside the work directory.
    #[must_use]
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    /// Sets a wall-clock limit.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn expand(&self, request: &ModelRunRequest, output: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{scenarios}", &request.scenario_file.display().to_string())
                    .replace("{output}", &output.display().to_string())
                    .replace("{work_dir}", &request.work_dir.display().to_string())
            })
            .collect()
    }

    async fn wait(&self, child: &mut tokio::process::Child) -> Result<std::process::ExitStatus> {
        let status = child.wait();
        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, status).await.map_err(|_| {
                Error::ExternalJob {
                    message: format!("model did not finish within {}s", limit.as_secs()),
                }
            })?,
            None => status.await,
        };
        waited.map_err(|e| Error::ExternalJob {
            message: format!("failed to wait for model process: {e}"),
        })
    }
}

#[async_trait]
impl BatchModelRunner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, request: &ModelRunRequest) -> Result<PathBuf> {
        let output = request.work_dir.join(&self.output_name);
        let args = self.expand(request, &output);
        tracing::info!(program = %self.program.display(), args = ?args, "starting model process");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExternalJob {
                message: format!("failed to start {}: {e}", self.program.display()),
            })?;

        let status = tokio::select! {
            status = self.wait(&mut child) => status?,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupt received, stopping model process");
                return Err(Error::Cancelled { stage: "model run".into() });
            }
        };

        if !status.success() {
            return Err(Error::ExternalJob {
                message: format!("model exited with {status}"),
            });
        }
        if !output.is_file() {
            return Err(Error::ExternalJob {
                message: format!("model produced no output at {}", output.display()),
            });
        }
        Ok(output)
    }
}

/// Uses an output file produced outside the pipeline.
#[derive(Debug, Clone)]
pub struct PrecomputedOutput {
    path: PathBuf,
}

impl PrecomputedOutput {
    /// Creates a runner returning `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BatchModelRunner for PrecomputedOutput {
    fn name(&self) -> &str {
        "precomputed"
    }

    async fn run(&self, _request: &ModelRunRequest) -> Result<PathBuf> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(Error::ExternalJob {
                message: format!("precomputed output {} does not exist", self.path.display()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> ModelRunRequest {
        ModelRunRequest {
            run_id: RunId::generate(),
            model: TargetModel::Pwc,
            scenario_file: dir.join("scenarios_pwc.csv"),
            work_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn placeholders_are_expanded() {
        let runner = ProcessRunner::new("model").with_args(["-i", "{scenarios}", "-o", "{output}"]);
        let req = request(Path::new("/work"));
        let args = runner.expand(&req, Path::new("/work/out.txt"));
        assert_eq!(args, ["-i", "/work/scenarios_pwc.csv", "-o", "/work/out.txt"]);
    }

    #[tokio::test]
    async fn precomputed_output_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let runner = PrecomputedOutput::new(&path);
        assert!(matches!(
            runner.run(&request(dir.path())).await,
            Err(Error::ExternalJob { .. })
        ));

        std::fs::write(&path, "1 sc-000001 1 2 3\n").unwrap();
        assert_eq!(runner.run(&request(dir.path())).await.unwrap(), path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_is_an_external_job_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sh").with_args(["-c", "exit 3"]);
        let err = runner.run(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ExternalJob { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sh")
            .with_args(["-c", "echo '1 sc-000001 1 2 3' > \"$0\"", "{output}"]);
        let out = runner.run(&request(dir.path())).await.unwrap();
        assert!(std::fs::read_to_string(out).unwrap().contains("sc-000001"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(100));
        let err = runner.run(&request(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
