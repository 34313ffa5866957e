//! Observability infrastructure for aquascen.
//!
//! Structured logging with one span per pipeline stage, so every event a
//! stage emits carries the stage name and the run id.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::id::RunId;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for batch schedulers and log collectors).
    Json,
    /// Pretty-printed logs (for interactive runs).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `aquascen_pipeline=debug`)
///
/// # Example
///
/// ```rust
/// use aquascen_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Logs go to stderr so table/JSON command output on stdout stays clean.
        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Creates a span for a pipeline stage.
///
/// # Example
///
/// ```rust
/// use aquascen_core::id::RunId;
/// use aquascen_core::observability::stage_span;
///
/// let run_id = RunId::generate();
/// let span = stage_span("join", &run_id);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn stage_span(stage: &'static str, run_id: &RunId) -> Span {
    tracing::info_span!("stage", stage = stage, run_id = %run_id)
}

/// Creates a span around the external batch model run.
#[must_use]
pub fn model_run_span(runner: &str, run_id: &RunId) -> Span {
    tracing::info_span!("model_run", runner = runner, run_id = %run_id)
}
