//! Spatial index consumer.
//!
//! The polygon overlay itself is computed by an external GIS step. This
//! module only sees its result through [`SpatialOverlayProvider`] and checks
//! that every unit is usable before anything is joined.

use std::collections::{HashMap, HashSet};

use aquascen_core::error::{Error, Result, ValidationIssue, ValidationProblem};
use aquascen_core::model::{ForeignKeys, LookupTable, OverlayUnit, ValidatedUnit};

/// Source of overlay units.
pub trait SpatialOverlayProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Returns every overlay unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the units cannot be produced.
    fn units(&self) -> Result<Vec<OverlayUnit>>;
}

/// Provider over units already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOverlay {
    units: Vec<OverlayUnit>,
}

impl InMemoryOverlay {
    /// Creates a provider returning `units`.
    #[must_use]
    pub fn new(units: Vec<OverlayUnit>) -> Self {
        Self { units }
    }
}

impl SpatialOverlayProvider for InMemoryOverlay {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn units(&self) -> Result<Vec<OverlayUnit>> {
        Ok(self.units.clone())
    }
}

/// Validates overlay units.
///
/// Checks unique non-blank unit ids, a non-blank geometry reference, a
/// finite positive area and all four foreign keys. Units are returned in
/// input order.
///
/// # Errors
///
/// Returns [`Error::Validation`] listing every offending unit and problem.
pub fn validate_overlay(units: &[OverlayUnit]) -> Result<Vec<ValidatedUnit>> {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for unit in units {
        *occurrences.entry(unit.unit_id.trim()).or_default() += 1;
    }

    let mut issues = Vec::new();
    let mut reported_duplicates: HashSet<&str> = HashSet::new();
    let mut validated = Vec::with_capacity(units.len());

    for unit in units {
        let id = unit.unit_id.trim();
        let subject = if id.is_empty() { "<blank>" } else { id };
        let before = issues.len();

        if id.is_empty() {
            issues.push(ValidationIssue::new(subject, ValidationProblem::BlankUnitId));
        } else if let Some(&count) = occurrences.get(id).filter(|&&c| c > 1) {
            if reported_duplicates.insert(id) {
                issues.push(ValidationIssue::new(
                    subject,
                    ValidationProblem::DuplicateUnitId { occurrences: count },
                ));
            }
        }

        let geometry_ref = present(unit.geometry_ref.as_deref());
        if geometry_ref.is_none() {
            issues.push(ValidationIssue::new(subject, ValidationProblem::MissingGeometry));
        }

        match unit.area {
            None => issues.push(ValidationIssue::new(subject, ValidationProblem::MissingArea)),
            Some(area) if !area.is_finite() || area <= 0.0 => issues.push(
                ValidationIssue::new(subject, ValidationProblem::InvalidArea { area }),
            ),
            Some(_) => {}
        }

        let keys = [
            (LookupTable::Soil, unit.soil_id.as_deref()),
            (LookupTable::Climate, unit.climate_id.as_deref()),
            (LookupTable::LandUse, unit.land_use_id.as_deref()),
            (LookupTable::Watershed, unit.watershed_id.as_deref()),
        ];
        for (table, value) in keys {
            if present(value).is_none() {
                issues.push(ValidationIssue::new(
                    subject,
                    ValidationProblem::MissingForeignKey { table },
                ));
            }
        }

        if issues.len() > before {
            continue;
        }
        if let (Some(geometry_ref), Some(area), Some(soil), Some(climate), Some(land_use), Some(ws)) = (
            geometry_ref,
            unit.area,
            present(unit.soil_id.as_deref()),
            present(unit.climate_id.as_deref()),
            present(unit.land_use_id.as_deref()),
            present(unit.watershed_id.as_deref()),
        ) {
            validated.push(ValidatedUnit {
                unit_id: id.to_string(),
                geometry_ref: geometry_ref.to_string(),
                keys: ForeignKeys {
                    soil_id: soil.to_string(),
                    climate_id: climate.to_string(),
                    land_use_id: land_use.to_string(),
                    watershed_id: ws.to_string(),
                },
                area,
            });
        }
    }

    if issues.is_empty() {
        tracing::info!(units = validated.len(), "overlay validated");
        Ok(validated)
    } else {
        tracing::warn!(issues = issues.len(), "overlay validation failed");
        Err(Error::Validation { issues })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, area: Option<f64>) -> OverlayUnit {
        OverlayUnit {
            unit_id: id.into(),
            geometry_ref: Some(format!("geom-{id}")),
            soil_id: Some("s1".into()),
            climate_id: Some("c1".into()),
            land_use_id: Some("1".into()),
            watershed_id: Some("w1".into()),
            area,
        }
    }

    #[test]
    fn valid_units_pass_in_input_order() {
        let units = vec![unit("u2", Some(2.0)), unit("u1", Some(1.0))];
        let validated = validate_overlay(&units).unwrap();
        assert_eq!(validated.len(), 2);
        assert_eq!(validated[0].unit_id, "u2");
        assert_eq!(validated[1].keys.climate_id, "c1");
    }

    #[test]
    fn every_problem_is_reported() {
        let mut no_geometry = unit("u2", Some(1.0));
        no_geometry.geometry_ref = Some("  ".into());
        let mut no_climate = unit("u3", Some(1.0));
        no_climate.climate_id = None;

        let units = vec![
            unit("u1", Some(1.0)),
            unit("u1", Some(1.0)),
            no_geometry,
            no_climate,
            unit("u4", Some(-3.0)),
            unit("u5", None),
            unit("u6", Some(f64::NAN)),
        ];

        let Err(Error::Validation { issues }) = validate_overlay(&units) else {
            panic!("expected validation error");
        };
        let subjects: Vec<&str> = issues.iter().map(|i| i.subject.as_str()).collect();
        assert_eq!(subjects, ["u1", "u2", "u3", "u4", "u5", "u6"]);
        assert_eq!(
            issues[0].problem,
            ValidationProblem::DuplicateUnitId { occurrences: 2 }
        );
        assert_eq!(
            issues[2].problem,
            ValidationProblem::MissingForeignKey {
                table: LookupTable::Climate
            }
        );
        assert_eq!(issues[4].problem, ValidationProblem::MissingArea);
    }

    #[test]
    fn blank_unit_id_is_rejected() {
        let err = validate_overlay(&[unit(" ", Some(1.0))]).unwrap_err();
        assert!(err.to_string().contains("blank unit id"));
    }

    #[test]
    fn in_memory_provider_returns_units() {
        let provider = InMemoryOverlay::new(vec![unit("u1", Some(1.0))]);
        assert_eq!(provider.units().unwrap().len(), 1);
        assert_eq!(provider.name(), "in-memory");
    }
}
