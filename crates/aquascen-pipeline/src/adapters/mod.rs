//! Thin file-system adapters.
//!
//! Everything that touches the disk lives here: CSV input readers, the
//! overlay CSV provider and the staged all-or-nothing output writer. The
//! stages themselves only see typed in-memory collections.

pub mod csv_tables;
pub mod staging;

pub use csv_tables::{read_csv_rows, read_lookup_rows, CsvOverlayProvider};
pub use staging::OutputSet;
