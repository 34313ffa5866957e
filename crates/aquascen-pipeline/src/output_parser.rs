//! Batch model output parser.
//!
//! The external model writes one whitespace-delimited row per scenario run:
//!
//! ```text
//! line_num run_id acute chronic cancer
//! 1 batch7_koc10_sc-3fa29c0d11aa9be0c2d4e5f6_0 0.41 0.12 0.02
//! ```
//!
//! The header is optional. The run id is either a bare scenario id or the
//! batch form `<batch>_koc<koc>_<scenario_id>_<rep>`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use aquascen_core::error::{Error, ParseIssue, Result};
use aquascen_core::id::ScenarioId;
use aquascen_core::model::PwcOutputRecord;

use crate::emitter::ScenarioCatalog;

const LINE_COLUMN: &str = "line_num";
const RUN_ID_COLUMN: &str = "run_id";

/// Parsed model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    /// Endpoint column names, in file order.
    pub endpoints: Vec<String>,
    /// Rows ordered by scenario id, then koc.
    pub records: Vec<PwcOutputRecord>,
}

/// Components of a batch run id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdParts<'a> {
    /// Batch label, when present.
    pub batch: Option<&'a str>,
    /// Sorption coefficient, when present.
    pub koc: Option<u32>,
    /// Scenario id text.
    pub scenario: &'a str,
    /// Replicate number, when present.
    pub rep: Option<u32>,
}

/// Splits a run id into its components.
///
/// Scenario ids never contain `_`, so anything with an underscore must be the
/// batch form.
#[must_use]
pub fn split_run_id(raw: &str) -> Option<RunIdParts<'_>> {
    if !raw.contains('_') {
        return Some(RunIdParts {
            batch: None,
            koc: None,
            scenario: raw,
            rep: None,
        });
    }
    // The last three segments are fixed; the batch label may hold anything.
    let mut tail = raw.rsplitn(4, '_');
    let rep = tail.next()?.parse::<u32>().ok()?;
    let scenario = tail.next()?;
    let koc = tail.next()?.strip_prefix("koc")?.parse::<u32>().ok()?;
    let batch = tail.next().filter(|b| !b.is_empty())?;
    Some(RunIdParts {
        batch: Some(batch),
        koc: Some(koc),
        scenario,
        rep: Some(rep),
    })
}

/// Parses model output text and checks every row against the catalog.
///
/// `default_endpoints` names the endpoint columns when the file has no
/// header.
///
/// # Errors
///
/// - [`Error::Parse`] listing every malformed row: wrong column count, bad
///   line number, unparsable run id, id not in the catalog scheme's format,
///   non-finite value, or a repeated scenario and koc pair
/// - [`Error::OutputMismatch`] listing every well-formed scenario id that
///   was never emitted
pub fn parse_output(
    text: &str,
    source_name: &str,
    default_endpoints: &[String],
    catalog: &ScenarioCatalog,
) -> Result<ParsedOutput> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .peekable();

    let mut issues = Vec::new();
    let mut endpoints: Vec<String> = default_endpoints.to_vec();
    if let Some(&(line, first)) = lines.peek() {
        let tokens: Vec<&str> = first.split_whitespace().collect();
        if tokens.first().is_some_and(|t| t.parse::<u64>().is_err()) {
            lines.next();
            if tokens.len() < 3 || tokens[0] != LINE_COLUMN || tokens[1] != RUN_ID_COLUMN {
                issues.push(ParseIssue::new(
                    line,
                    format!("header must be '{LINE_COLUMN} {RUN_ID_COLUMN} <endpoint...>'"),
                ));
            } else {
                endpoints = tokens[2..].iter().map(ToString::to_string).collect();
            }
        }
    }

    let expected_columns = endpoints.len() + 2;
    let mut records = Vec::new();
    let mut seen: HashMap<(ScenarioId, Option<u32>), usize> = HashMap::new();

    for (line, row) in lines {
        let tokens: Vec<&str> = row.split_whitespace().collect();
        if tokens.len() != expected_columns {
            issues.push(ParseIssue::new(
                line,
                format!("expected {expected_columns} columns, found {}", tokens.len()),
            ));
            continue;
        }
        if tokens[0].parse::<u64>().is_err() {
            issues.push(ParseIssue::new(line, format!("invalid line number '{}'", tokens[0])));
            continue;
        }
        let Some(parts) = split_run_id(tokens[1]) else {
            issues.push(ParseIssue::new(line, format!("invalid run id '{}'", tokens[1])));
            continue;
        };
        let scenario_id = match parts.scenario.parse::<ScenarioId>() {
            Ok(id) if catalog.scheme().accepts(&id) => id,
            _ => {
                issues.push(ParseIssue::new(
                    line,
                    format!(
                        "'{}' is not a {} scenario id",
                        parts.scenario,
                        catalog.scheme()
                    ),
                ));
                continue;
            }
        };

        let mut values = BTreeMap::new();
        let mut row_ok = true;
        for (name, raw) in endpoints.iter().zip(&tokens[2..]) {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    values.insert(name.clone(), v);
                }
                _ => {
                    issues.push(ParseIssue::new(
                        line,
                        format!("invalid value '{raw}' for endpoint {name}"),
                    ));
                    row_ok = false;
                }
            }
        }
        if !row_ok {
            continue;
        }

        if let Some(first) = seen.insert((scenario_id.clone(), parts.koc), line) {
            issues.push(ParseIssue::new(
                line,
                format!("duplicate output for {scenario_id} (first at line {first})"),
            ));
            continue;
        }

        records.push(PwcOutputRecord {
            scenario_id,
            koc: parts.koc,
            line,
            endpoints: values,
        });
    }

    if !issues.is_empty() {
        tracing::warn!(source = source_name, issues = issues.len(), "model output rejected");
        return Err(Error::Parse {
            source_name: source_name.to_string(),
            issues,
        });
    }

    let unknown: BTreeSet<String> = records
        .iter()
        .filter(|r| !catalog.contains(&r.scenario_id))
        .map(|r| r.scenario_id.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::OutputMismatch {
            source_name: source_name.to_string(),
            detail: "scenario ids were never emitted".into(),
            scenario_ids: unknown.into_iter().collect(),
        });
    }

    records.sort_by(|a, b| {
        a.scenario_id
            .cmp(&b.scenario_id)
            .then_with(|| a.koc.cmp(&b.koc))
    });
    tracing::info!(
        source = source_name,
        rows = records.len(),
        endpoints = endpoints.len(),
        "model output parsed"
    );
    Ok(ParsedOutput { endpoints, records })
}
