//! Shared test utilities for aquascen integration tests.
//!
//! This crate provides:
//! - [`ScenarioFixture`]: a coherent overlay plus lookup tables
//! - [`TestWorkspace`]: the fixture written to disk with a run configuration
//! - [`SimulatedModelRunner`]: a seeded stand-in for the batch model
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use aquascen_core::scenario_key::TargetModel;
//! use aquascen_test_utils::{ScenarioFixture, SimulatedModelRunner, TestWorkspace};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let fixture = ScenarioFixture::new(6);
//!     let ws = TestWorkspace::new(&fixture, TargetModel::Sam);
//!     let runner = SimulatedModelRunner::with_seed(42);
//!     // ... run pipeline ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod simulation;

pub use assertions::*;
pub use fixtures::*;
pub use simulation::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("aquascen=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
