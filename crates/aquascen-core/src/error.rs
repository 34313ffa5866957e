//! Error types and result aliases for aquascen.
//!
//! Every hard failure aborts the run before any output is committed, so each
//! domain variant carries the complete list of offending units, keys or rows
//! rather than the first one encountered.

use std::fmt;

use crate::model::LookupTable;

/// The result type used throughout aquascen.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in aquascen operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Overlay units or lookup rows failed structural validation.
    #[error("validation failed ({} issue(s)): {}", .issues.len(), join_limited(.issues))]
    Validation {
        /// Every offending unit or lookup key with the problem found.
        issues: Vec<ValidationIssue>,
    },

    /// One or more foreign keys had no match in their lookup table.
    #[error("unresolved reference(s) ({}): {}", .references.len(), join_limited(.references))]
    MissingReference {
        /// Every unresolved (unit, table, key) triple.
        references: Vec<MissingReference>,
    },

    /// A derived aggregate or identity violated an internal consistency rule.
    #[error("consistency check failed ({}): {}", .violations.len(), join_limited(.violations))]
    Consistency {
        /// Every violation detected in the stage.
        violations: Vec<ConsistencyViolation>,
    },

    /// Rows of an external file could not be parsed.
    #[error("failed to parse {source_name} ({} row(s)): {}", .issues.len(), join_limited(.issues))]
    Parse {
        /// Name or path of the parsed input.
        source_name: String,
        /// Every malformed row with its line number.
        issues: Vec<ParseIssue>,
    },

    /// External model output refers to scenarios that were never emitted.
    #[error(
        "model output does not match emitted scenarios in {source_name} ({detail}): {}",
        join_limited(.scenario_ids)
    )]
    OutputMismatch {
        /// Name or path of the output that drifted.
        source_name: String,
        /// What kind of drift was detected.
        detail: String,
        /// Every offending scenario identifier.
        scenario_ids: Vec<String>,
    },

    /// Representative scenario selection could not be performed.
    #[error("selection failed ({detail}): {}", join_limited(.groups))]
    Selection {
        /// Why selection failed.
        detail: String,
        /// Every offending group key.
        groups: Vec<String>,
    },

    /// Configuration was missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The external batch model run failed.
    #[error("external model run failed: {message}")]
    ExternalJob {
        /// Description of the failure.
        message: String,
    },

    /// The run was cancelled while waiting on an external step.
    #[error("run cancelled during {stage}")]
    Cancelled {
        /// Stage that was interrupted.
        stage: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates an io error bound to the path being accessed.
    #[must_use]
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short, stable name of the error category (used in logs and exit reports).
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::MissingReference { .. } => "MissingReferenceError",
            Self::Consistency { .. } => "ConsistencyError",
            Self::Parse { .. } => "ParseError",
            Self::OutputMismatch { .. } => "OutputMismatchError",
            Self::Selection { .. } => "SelectionError",
            Self::Config { .. } => "ConfigError",
            Self::Io { .. } => "IoError",
            Self::Serialization { .. } => "SerializationError",
            Self::ExternalJob { .. } => "ExternalJobError",
            Self::Cancelled { .. } => "Cancelled",
            Self::Internal { .. } => "InternalError",
        }
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Unit id, or `<table>:<key>` for lookup rows.
    pub subject: String,
    /// What was wrong.
    pub problem: ValidationProblem,
}

impl ValidationIssue {
    /// Creates a validation issue.
    #[must_use]
    pub fn new(subject: impl Into<String>, problem: ValidationProblem) -> Self {
        Self {
            subject: subject.into(),
            problem,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.problem)
    }
}

/// Kinds of validation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationProblem {
    /// The unit id is blank.
    BlankUnitId,
    /// The unit id appears more than once in the overlay.
    DuplicateUnitId {
        /// How many times the id occurs.
        occurrences: usize,
    },
    /// The geometry reference is blank or absent.
    MissingGeometry,
    /// The area is absent.
    MissingArea,
    /// The area is zero, negative or not finite.
    InvalidArea {
        /// The offending area value.
        area: f64,
    },
    /// A foreign key is blank or absent.
    MissingForeignKey {
        /// Which lookup table the key points into.
        table: LookupTable,
    },
    /// A lookup table carries the same primary key twice.
    DuplicateLookupKey {
        /// Which lookup table.
        table: LookupTable,
    },
    /// A lookup row holds a value that cannot be used.
    InvalidLookupValue {
        /// Which lookup table.
        table: LookupTable,
        /// Column holding the bad value.
        column: &'static str,
    },
    /// Two units resolved to the same composite scenario key.
    DuplicateCompositeKey {
        /// The other unit that resolved to the same key.
        other_unit: String,
    },
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlankUnitId => write!(f, "blank unit id"),
            Self::DuplicateUnitId { occurrences } => {
                write!(f, "unit id occurs {occurrences} times")
            }
            Self::MissingGeometry => write!(f, "missing geometry reference"),
            Self::MissingArea => write!(f, "missing area"),
            Self::InvalidArea { area } => write!(f, "area must be finite and positive, got {area}"),
            Self::MissingForeignKey { table } => write!(f, "missing {table} id"),
            Self::DuplicateLookupKey { table } => write!(f, "duplicate key in {table} table"),
            Self::InvalidLookupValue { table, column } => {
                write!(f, "invalid {column} in {table} table")
            }
            Self::DuplicateCompositeKey { other_unit } => {
                write!(f, "same scenario key as unit {other_unit}")
            }
        }
    }
}

/// A foreign key that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingReference {
    /// The overlay unit holding the key.
    pub unit_id: String,
    /// The lookup table searched.
    pub table: LookupTable,
    /// The key value that had no match.
    pub key: String,
}

impl fmt::Display for MissingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unit {} references unknown {} id '{}'",
            self.unit_id, self.table, self.key
        )
    }
}

/// A consistency rule broken by a derived value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyViolation {
    /// Recipe fractions of a watershed do not sum to one.
    FractionSum {
        /// The offending watershed.
        watershed_id: String,
        /// The computed sum.
        sum: f64,
        /// The tolerance in force.
        epsilon: f64,
    },
    /// Distinct composite keys produced the same scenario id.
    IdCollision {
        /// The colliding identifier.
        scenario_id: String,
        /// Canonical strings of every key mapped to the id.
        keys: Vec<String>,
    },
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FractionSum {
                watershed_id,
                sum,
                epsilon,
            } => write!(
                f,
                "watershed {watershed_id} fractions sum to {sum} (tolerance {epsilon})"
            ),
            Self::IdCollision { scenario_id, keys } => {
                write!(f, "scenario id {scenario_id} shared by keys [{}]", keys.join(", "))
            }
        }
    }
}

/// A malformed row in an external file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// 1-based line number in the source.
    pub line: usize,
    /// What was wrong with the row.
    pub message: String,
}

impl ParseIssue {
    /// Creates a parse issue.
    #[must_use]
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

const DISPLAY_LIMIT: usize = 20;

fn join_limited<T: fmt::Display>(items: &[T]) -> String {
    let mut out = items
        .iter()
        .take(DISPLAY_LIMIT)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    if items.len() > DISPLAY_LIMIT {
        out.push_str(&format!("; ... and {} more", items.len() - DISPLAY_LIMIT));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_subject() {
        let err = Error::Validation {
            issues: vec![
                ValidationIssue::new("u1", ValidationProblem::MissingGeometry),
                ValidationIssue::new(
                    "u2",
                    ValidationProblem::MissingForeignKey {
                        table: LookupTable::Climate,
                    },
                ),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("u1: missing geometry reference"));
        assert!(msg.contains("u2: missing climate id"));
        assert_eq!(err.category(), "ValidationError");
    }

    #[test]
    fn long_lists_are_truncated_in_display_only() {
        let references: Vec<MissingReference> = (0..30)
            .map(|i| MissingReference {
                unit_id: format!("u{i}"),
                table: LookupTable::Soil,
                key: "x".into(),
            })
            .collect();
        let err = Error::MissingReference { references };
        let msg = err.to_string();
        assert!(msg.contains("and 10 more"));
        let Error::MissingReference { references } = err else {
            unreachable!()
        };
        assert_eq!(references.len(), 30);
    }

    #[test]
    fn fraction_sum_violation_names_watershed_and_sum() {
        let err = Error::Consistency {
            violations: vec![ConsistencyViolation::FractionSum {
                watershed_id: "ws-7".into(),
                sum: 0.98,
                epsilon: 1e-9,
            }],
        };
        assert!(err.to_string().contains("watershed ws-7 fractions sum to 0.98"));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as StdError;

        let err = Error::io(
            "/tmp/missing.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/missing.csv"));
    }
}
