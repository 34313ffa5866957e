//! # aquascen-pipeline
//!
//! The two aquascen stages and everything between them.
//!
//! ## Preparation
//!
//! 1. [`overlay`]: validate raw overlay units
//! 2. [`lookup`]: index soil, climate, land-use and watershed tables
//! 3. [`joiner`]: resolve every unit into a scenario record with a stable id
//! 4. [`emitter`]: serialize records in the target model's schema
//! 5. [`recipe`]: per-watershed area fractions (watershed-scale models only)
//! 6. [`sampler`]: seeded per-crop scenario samples (field-scale models only)
//!
//! ## Selection
//!
//! 1. [`runner`]: run the external batch model (or point at its output)
//! 2. [`output_parser`]: parse and reconcile model output with the catalog
//! 3. [`selector`]: pick the percentile representative of each group
//!
//! [`pipeline::Pipeline`] chains the stages. Outputs are assembled in memory
//! and committed through [`adapters::OutputSet`], so a failed stage leaves the
//! output directory untouched.
//!
//! ## Example
//!
//! ```rust
//! use aquascen_core::model::OverlayUnit;
//! use aquascen_pipeline::overlay::validate_overlay;
//!
//! let unit = OverlayUnit {
//!     unit_id: "u1".into(),
//!     geometry_ref: Some("g1".into()),
//!     soil_id: Some("s1".into()),
//!     climate_id: Some("c1".into()),
//!     land_use_id: Some("1".into()),
//!     watershed_id: Some("w1".into()),
//!     area: Some(12.5),
//! };
//! let validated = validate_overlay(&[unit]).unwrap();
//! assert_eq!(validated[0].keys.soil_id, "s1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapters;
pub mod emitter;
pub mod joiner;
pub mod lookup;
pub mod output_parser;
pub mod overlay;
pub mod pipeline;
pub mod recipe;
pub mod runner;
pub mod sampler;
pub mod selector;

pub use adapters::{CsvOverlayProvider, OutputSet};
pub use emitter::{ScenarioCatalog, ScenarioSchema};
pub use lookup::{LookupRows, LookupTables};
pub use overlay::{InMemoryOverlay, SpatialOverlayProvider};
pub use pipeline::{Pipeline, Prepared, RunReport, Selected};
pub use runner::{BatchModelRunner, ModelRunRequest, PrecomputedOutput, ProcessRunner};
pub use selector::{SelectionOutcome, SelectorOptions};
