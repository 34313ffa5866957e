//! CSV input readers.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use aquascen_core::config::InputPaths;
use aquascen_core::error::{Error, ParseIssue, Result};
use aquascen_core::model::OverlayUnit;

use crate::lookup::LookupRows;
use crate::overlay::SpatialOverlayProvider;

/// Reads every row of a headed CSV file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be opened, or [`Error::Parse`]
/// listing every row that failed to deserialize.
pub fn read_csv_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    read_csv_from(file, &path.display().to_string())
}

/// Reads every row of headed CSV from any reader.
///
/// # Errors
///
/// Returns [`Error::Parse`] listing every row that failed to deserialize.
pub fn read_csv_from<R: Read, T: DeserializeOwned>(reader: R, source_name: &str) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut issues = Vec::new();
    for (index, record) in reader.deserialize::<T>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                // Header is line 1, so the n-th data row is line n + 2.
                let line = e
                    .position()
                    .and_then(|p| usize::try_from(p.line()).ok())
                    .unwrap_or(index + 2);
                issues.push(ParseIssue::new(line, e.to_string()));
            }
        }
    }

    if issues.is_empty() {
        tracing::debug!(source = source_name, rows = rows.len(), "read csv table");
        Ok(rows)
    } else {
        Err(Error::Parse {
            source_name: source_name.to_string(),
            issues,
        })
    }
}

/// Reads the four lookup tables.
///
/// # Errors
///
/// Returns the first I/O or parse error encountered.
pub fn read_lookup_rows(paths: &InputPaths) -> Result<LookupRows> {
    Ok(LookupRows {
        soils: read_csv_rows(&paths.soils)?,
        stations: read_csv_rows(&paths.climate)?,
        land_use: read_csv_rows(&paths.land_use)?,
        watersheds: read_csv_rows(&paths.watersheds)?,
    })
}

/// Overlay provider backed by the spatial index CSV exported by the GIS step.
///
/// Columns: `unit_id, geometry_ref, soil_id, climate_id, land_use_id,
/// watershed_id, area`. Empty cells become absent values and are reported by
/// overlay validation, not here.
#[derive(Debug, Clone)]
pub struct CsvOverlayProvider {
    path: PathBuf,
}

impl CsvOverlayProvider {
    /// Creates a provider reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SpatialOverlayProvider for CsvOverlayProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn units(&self) -> Result<Vec<OverlayUnit>> {
        read_csv_rows(&self.path)
    }
}
