//! # aquascen-core
//!
//! Core abstractions shared by every aquascen stage.
//!
//! - **Error Types**: the error taxonomy and result alias
//! - **Identifiers**: run ids and scenario ids
//! - **Scenario Identity**: composite keys and deterministic id assignment
//! - **Data Model**: overlay units, lookup rows, scenario records, recipes,
//!   model output rows and selection results
//! - **Configuration**: run configuration with environment overrides
//! - **Observability**: logging initialization and stage spans
//!
//! ## Example
//!
//! ```rust
//! use aquascen_core::prelude::*;
//!
//! let key = CompositeKey {
//!     soil_id: "s1".into(),
//!     climate_id: "c1".into(),
//!     station_id: "st1".into(),
//!     land_use_id: "1".into(),
//!     watershed_id: "w1".into(),
//!     crop_id: "10".into(),
//!     model: TargetModel::Sam,
//! };
//! let id = key.hashed_id().unwrap();
//! assert!(id.as_str().starts_with("sc-"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical_json;
pub mod config;
pub mod error;
pub mod id;
pub mod metadata;
pub mod model;
pub mod observability;
pub mod scenario_key;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use aquascen_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{InputPaths, PercentileMethod, RunConfig};
    pub use crate::error::{
        ConsistencyViolation, Error, MissingReference, ParseIssue, Result, ValidationIssue,
        ValidationProblem,
    };
    pub use crate::id::{compare_ids, RunId, ScenarioId};
    pub use crate::metadata::{RunMetadata, RunWarning, StageKind};
    pub use crate::model::{
        ClimateStation, EndpointKey, ForeignKeys, GroupKey, LandUseMapping, LookupTable,
        OverlayUnit, PwcOutputRecord, RankedMember, RecipeEntry, ScenarioAttributes,
        ScenarioRecord, SelectionResult, SoilProperties, ValidatedUnit, WatershedMetadata,
        WatershedRecipe,
    };
    pub use crate::scenario_key::{CompositeKey, IdScheme, ScenarioIdAssigner, TargetModel};
}

// Re-export key types at crate root for ergonomics
pub use config::RunConfig;
pub use error::{Error, Result};
pub use id::{RunId, ScenarioId};
pub use observability::{init_logging, stage_span, LogFormat};
pub use scenario_key::{CompositeKey, IdScheme, TargetModel};
