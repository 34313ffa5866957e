//! Strongly-typed identifiers.
//!
//! - [`RunId`] identifies one pipeline invocation. ULID based, so ids sort by
//!   creation time; it is written to run metadata only and never feeds into
//!   scenario identity.
//! - [`ScenarioId`] identifies a scenario. It is derived from the composite
//!   key (see [`crate::scenario_key`]) and must survive a trip through the
//!   external model's batch run id, which uses `_` as a field separator.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Prefix carried by every scenario id.
pub const SCENARIO_ID_PREFIX: &str = "sc-";

/// A unique identifier for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a new unique run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a run ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::Config {
            message: format!("invalid run ID '{s}': {e}"),
        })
    }
}

/// Identifier of a scenario: `sc-` followed by lowercase alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScenarioId(String);

impl ScenarioId {
    /// Builds an id from its body (the part after the prefix).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the body is not lowercase alphanumeric.
    pub fn from_body(body: &str) -> Result<Self> {
        format!("{SCENARIO_ID_PREFIX}{body}").parse()
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the `sc-` prefix.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.0[SCENARIO_ID_PREFIX.len()..]
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScenarioId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(body) = s.strip_prefix(SCENARIO_ID_PREFIX) else {
            return Err(Error::internal(format!(
                "scenario id '{s}' lacks the '{SCENARIO_ID_PREFIX}' prefix"
            )));
        };
        let valid = !body.is_empty()
            && body
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase());
        if !valid {
            return Err(Error::internal(format!(
                "scenario id '{s}' must be '{SCENARIO_ID_PREFIX}' followed by lowercase alphanumerics"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ScenarioId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ScenarioId> for String {
    fn from(id: ScenarioId) -> Self {
        id.0
    }
}

impl AsRef<str> for ScenarioId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Orders external ids numerically when both parse as integers, otherwise
/// lexicographically. Station and soil ids are frequently numeric strings, for
/// which `"9" < "10"` is the expected order.
#[must_use]
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::generate();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn scenario_id_accepts_hash_and_sequential_forms() {
        let hashed: ScenarioId = "sc-3fa29c0d11aa9be0c2d4e5f6".parse().unwrap();
        assert_eq!(hashed.body(), "3fa29c0d11aa9be0c2d4e5f6");
        let seq = ScenarioId::from_body("000042").unwrap();
        assert_eq!(seq.as_str(), "sc-000042");
    }

    #[test]
    fn scenario_id_rejects_separator_characters() {
        assert!("sc-ab_cd".parse::<ScenarioId>().is_err());
        assert!("sc-".parse::<ScenarioId>().is_err());
        assert!("abc".parse::<ScenarioId>().is_err());
        assert!("sc-ABC".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn scenario_id_serde_is_transparent_and_validating() {
        let id: ScenarioId = serde_json::from_str("\"sc-00ff\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sc-00ff\"");
        assert!(serde_json::from_str::<ScenarioId>("\"nope\"").is_err());
    }

    #[test]
    fn compare_ids_is_numeric_aware() {
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("st-b", "st-a"), Ordering::Greater);
        assert_eq!(compare_ids("10", "abc"), Ordering::Less);
    }
}
