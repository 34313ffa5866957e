//! Custom assertion helpers for integration tests.

use std::path::Path;

use aquascen_core::model::{SelectionResult, WatershedRecipe};
use aquascen_pipeline::emitter::ScenarioCatalog;

/// Asserts that nothing was committed into `dir`.
///
/// # Panics
///
/// Panics if `dir` exists and has any entry, including staging leftovers.
pub fn assert_no_outputs(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.is_empty(), "expected no outputs in {}, found {names:?}", dir.display());
}

/// Asserts that `dir` holds exactly the named files.
///
/// # Panics
///
/// Panics if any file is missing or unexpected.
pub fn assert_outputs_exactly(dir: &Path, expected: &[&str]) {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let mut expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    expected.sort();
    assert_eq!(names, expected, "unexpected output files in {}", dir.display());
}

/// Asserts that every recipe's fractions sum to one within `epsilon` and
/// are ordered largest first.
///
/// # Panics
///
/// Panics on the first inconsistent recipe.
pub fn assert_recipes_consistent(recipes: &[WatershedRecipe], epsilon: f64) {
    for recipe in recipes {
        let sum: f64 = recipe.entries.iter().map(|e| e.fraction).sum();
        assert!(
            (sum - 1.0).abs() <= epsilon,
            "watershed {} fractions sum to {sum}",
            recipe.watershed_id
        );
        assert!(
            recipe.entries.windows(2).all(|w| w[0].fraction >= w[1].fraction),
            "watershed {} entries are not ordered by fraction",
            recipe.watershed_id
        );
    }
}

/// Asserts that every selected scenario belongs to the group it was chosen
/// for.
///
/// # Panics
///
/// Panics if a selection names a scenario outside the catalog or its group.
pub fn assert_selections_in_group(results: &[SelectionResult], catalog: &ScenarioCatalog) {
    for result in results {
        let entry = catalog
            .get(&result.scenario_id)
            .unwrap_or_else(|| panic!("{} is not in the catalog", result.scenario_id));
        assert_eq!(
            entry.group, result.group,
            "{} was selected for {} but belongs to {}",
            result.scenario_id, result.group, entry.group
        );
        assert!(result.rank >= 1 && result.rank <= result.population);
    }
}
