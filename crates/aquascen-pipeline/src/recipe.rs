//! Watershed recipe builder.
//!
//! A recipe lists the scenarios making up one watershed with their share of
//! its area. Recipes are crop-agnostic: every scenario in the watershed is a
//! member regardless of crop.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use aquascen_core::error::{ConsistencyViolation, Error, Result};
use aquascen_core::metadata::RunWarning;
use aquascen_core::model::{RecipeEntry, ScenarioRecord, WatershedRecipe};

/// Recipe table file name.
pub const RECIPES_FILE: &str = "recipes.csv";
/// Recipe map file name.
pub const RECIPE_MAP_FILE: &str = "recipe_map.csv";

/// Recipes plus the warnings raised while building them.
#[derive(Debug, Clone, Default)]
pub struct RecipeSet {
    /// Recipes ordered by watershed id.
    pub recipes: Vec<WatershedRecipe>,
    /// Skewed watersheds.
    pub warnings: Vec<RunWarning>,
}

/// Builds one recipe per watershed.
///
/// # Errors
///
/// Returns [`Error::Consistency`] naming every watershed whose fractions do
/// not sum to one within `epsilon`.
pub fn build_recipes(
    records: &[ScenarioRecord],
    epsilon: f64,
    skew_fraction: f64,
) -> Result<RecipeSet> {
    let mut by_watershed: BTreeMap<&str, Vec<&ScenarioRecord>> = BTreeMap::new();
    for r in records {
        by_watershed
            .entry(r.key.watershed_id.as_str())
            .or_default()
            .push(r);
    }
    let partitions: Vec<(&str, Vec<&ScenarioRecord>)> = by_watershed.into_iter().collect();

    let built: Vec<std::result::Result<WatershedRecipe, ConsistencyViolation>> = partitions
        .par_iter()
        .map(|(watershed_id, members)| build_one(watershed_id, members, epsilon))
        .collect();

    let mut recipes = Vec::with_capacity(built.len());
    let mut violations = Vec::new();
    for outcome in built {
        match outcome {
            Ok(recipe) => recipes.push(recipe),
            Err(v) => violations.push(v),
        }
    }
    if !violations.is_empty() {
        return Err(Error::Consistency { violations });
    }

    let warnings = recipes
        .iter()
        .filter_map(|r| skew_warning(r, skew_fraction))
        .collect();

    tracing::info!(watersheds = recipes.len(), "watershed recipes built");
    Ok(RecipeSet { recipes, warnings })
}

fn build_one(
    watershed_id: &str,
    members: &[&ScenarioRecord],
    epsilon: f64,
) -> std::result::Result<WatershedRecipe, ConsistencyViolation> {
    let total_area: f64 = members.iter().map(|r| r.area).sum();

    let mut entries: Vec<RecipeEntry> = members
        .iter()
        .map(|r| RecipeEntry {
            scenario_id: r.scenario_id.clone(),
            area: r.area,
            fraction: r.area / total_area,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.fraction
            .total_cmp(&a.fraction)
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
    });

    let fraction_sum: f64 = entries.iter().map(|e| e.fraction).sum();
    if let Some(violation) = check_fraction_sum(watershed_id, fraction_sum, epsilon) {
        return Err(violation);
    }

    let reach_id = members
        .first()
        .map(|r| r.attributes.watershed.reach_id.clone())
        .unwrap_or_default();

    Ok(WatershedRecipe {
        watershed_id: watershed_id.to_string(),
        reach_id,
        entries,
        total_area,
        fraction_sum,
    })
}

/// Checks that a fraction sum is one within `epsilon`.
#[must_use]
pub fn check_fraction_sum(
    watershed_id: &str,
    sum: f64,
    epsilon: f64,
) -> Option<ConsistencyViolation> {
    if sum.is_finite() && (sum - 1.0).abs() <= epsilon {
        None
    } else {
        Some(ConsistencyViolation::FractionSum {
            watershed_id: watershed_id.to_string(),
            sum,
            epsilon,
        })
    }
}

fn skew_warning(recipe: &WatershedRecipe, skew_fraction: f64) -> Option<RunWarning> {
    let dominant = recipe.entries.first()?;
    (recipe.entries.len() > 1 && dominant.fraction >= skew_fraction).then(|| {
        RunWarning::SkewedWatershed {
            watershed_id: recipe.watershed_id.clone(),
            scenario_id: dominant.scenario_id.to_string(),
            fraction: dominant.fraction,
            members: recipe.entries.len(),
        }
    })
}

/// One row of the flattened recipe table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRow {
    /// Watershed id.
    pub watershed_id: String,
    /// Member scenario.
    pub scenario_id: String,
    /// Member area.
    pub area: f64,
    /// Area fraction.
    pub fraction: f64,
}

/// Row range of one watershed in the recipe table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMapRow {
    /// Watershed id.
    pub watershed_id: String,
    /// Routing reach id.
    pub reach_id: String,
    /// First row (0-based, inclusive).
    pub start: usize,
    /// Row after the last (exclusive).
    pub end: usize,
}

/// Flattens recipes into the recipe table and its row map.
#[must_use]
pub fn flatten(recipes: &[WatershedRecipe]) -> (Vec<RecipeRow>, Vec<RecipeMapRow>) {
    let mut rows = Vec::new();
    let mut map = Vec::with_capacity(recipes.len());
    for recipe in recipes {
        let start = rows.len();
        rows.extend(recipe.entries.iter().map(|e| RecipeRow {
            watershed_id: recipe.watershed_id.clone(),
            scenario_id: e.scenario_id.to_string(),
            area: e.area,
            fraction: e.fraction,
        }));
        map.push(RecipeMapRow {
            watershed_id: recipe.watershed_id.clone(),
            reach_id: recipe.reach_id.clone(),
            start,
            end: rows.len(),
        });
    }
    (rows, map)
}
