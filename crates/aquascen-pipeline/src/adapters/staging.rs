//! All-or-nothing output commits.
//!
//! Outputs are serialized into memory first. [`OutputSet::commit`] writes
//! every file to a staging temp file inside the output directory and only
//! renames them into place once all of them were written. Temp files are
//! removed on drop, so a failed commit leaves nothing behind. Files of an
//! earlier commit are moved aside before being replaced and moved back if a
//! later rename fails.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use aquascen_core::error::{Error, Result};

/// A set of named output files waiting to be committed together.
#[derive(Debug, Default)]
pub struct OutputSet {
    files: Vec<(String, Vec<u8>)>,
}

impl OutputSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds raw bytes under `name`, replacing an earlier file of that name.
    pub fn add_bytes(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        self.files.retain(|(existing, _)| existing != &name);
        self.files.push((name, bytes));
    }

    /// Serializes `rows` as a headed CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if a row cannot be serialized.
    pub fn add_csv<T, I>(&mut self, name: impl Into<String>, rows: I) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let name = name.into();
        let bytes = csv_bytes(rows).map_err(|e| {
            Error::serialization(format!("failed to serialize {name}: {e}"))
        })?;
        self.add_bytes(name, bytes);
        Ok(())
    }

    /// Serializes `value` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the value cannot be serialized.
    pub fn add_json<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        let name = name.into();
        let mut bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::serialization(format!("failed to serialize {name}: {e}")))?;
        bytes.push(b'\n');
        self.add_bytes(name, bytes);
        Ok(())
    }

    /// Moves every file of `other` into this set.
    pub fn extend(&mut self, other: Self) {
        for (name, bytes) in other.files {
            self.add_bytes(name, bytes);
        }
    }

    /// Names of the files in the set, in insertion order.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Contents of a file in the set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Number of files in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes every file into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created or any file
    /// cannot be staged or renamed. On a staging failure no file is touched;
    /// on a rename failure the files already renamed are removed again and
    /// the files they replaced are restored.
    pub fn commit(self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut staged = Vec::with_capacity(self.files.len());
        for (name, bytes) in &self.files {
            let mut tmp = tempfile::Builder::new()
                .prefix(".aquascen-staging-")
                .tempfile_in(dir)
                .map_err(|e| Error::io(dir, e))?;
            tmp.write_all(bytes)
                .and_then(|()| tmp.as_file().sync_all())
                .map_err(|e| Error::io(tmp.path(), e))?;
            staged.push((dir.join(name), tmp));
        }

        let backups = tempfile::Builder::new()
            .prefix(".aquascen-backup-")
            .tempdir_in(dir)
            .map_err(|e| Error::io(dir, e))?;

        let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
        let mut replaced: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (target, tmp) in staged {
            let outcome = set_aside(&target, backups.path(), &mut replaced)
                .and_then(|()| persist(tmp, &target));
            if let Err(e) = outcome {
                rollback(&committed, &replaced);
                return Err(e);
            }
            committed.push(target);
        }

        tracing::info!(dir = %dir.display(), files = committed.len(), "outputs committed");
        Ok(committed)
    }
}

/// Moves an existing file at `target` into `backups`.
fn set_aside(
    target: &Path,
    backups: &Path,
    replaced: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    let Some(name) = target.file_name() else {
        return Ok(());
    };
    if !target.is_file() {
        return Ok(());
    }
    let backup = backups.join(name);
    std::fs::rename(target, &backup).map_err(|e| Error::io(target, e))?;
    replaced.push((target.to_path_buf(), backup));
    Ok(())
}

/// Undoes a partial commit. Failures are logged; the caller reports the
/// error that triggered the rollback.
fn rollback(committed: &[PathBuf], replaced: &[(PathBuf, PathBuf)]) {
    for path in committed {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::error!(path = %path.display(), error = %e, "rollback could not remove output");
        }
    }
    for (target, backup) in replaced {
        if let Err(e) = std::fs::rename(backup, target) {
            tracing::error!(path = %target.display(), error = %e, "rollback could not restore output");
        }
    }
}

fn persist(tmp: NamedTempFile, target: &Path) -> Result<()> {
    tmp.persist(target)
        .map(|_| ())
        .map_err(|e| Error::io(target, e.error))
}

fn csv_bytes<T, I>(rows: I) -> std::result::Result<Vec<u8>, csv::Error>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
