use crate::models::{BatchInfo, BatchSummary, PausedDetectionState};
use crate::store::{sanitize_component, write_atomic};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs;
use std::io;
use thiserror::Error;

pub const BATCH_INFO_FILE: &str = "batch_info.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const PAUSED_STATE_FILE: &str = "paused_state.json";

/// Errors from the batch side-files.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt file {path}: {reason}")]
    Corrupt { path: Utf8PathBuf, reason: String },
}

/// Previous content of `paused_state.json`, kept so a failed pause can put
/// things back the way they were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBackup(Option<Vec<u8>>);

impl SnapshotBackup {
    /// Whether a snapshot existed before the write.
    pub fn had_previous(&self) -> bool {
        self.0.is_some()
    }
}

/// The per-batch directory layout under the data root:
///
/// ```text
/// <data_root>/<product_name>/<batch_id>/
///     batch_info.json
///     summary.json
///     paused_state.json   (only while paused)
/// ```
///
/// Every write goes through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct BatchPersistence {
    data_root: Utf8PathBuf,
}

impl BatchPersistence {
    pub fn new(data_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    /// Both names are sanitized into single path components, so the result
    /// always sits two levels below the data root.
    pub fn batch_dir(&self, product_name: &str, batch_id: &str) -> Utf8PathBuf {
        self.data_root
            .join(sanitize_component(product_name))
            .join(sanitize_component(batch_id))
    }

    /// Create the batch directory (and parents) if missing.
    pub fn provision(&self, product_name: &str, batch_id: &str) -> Result<Utf8PathBuf, PersistenceError> {
        let dir = self.batch_dir(product_name, batch_id);
        fs::create_dir_all(&dir)?;
        tracing::debug!("Provisioned batch directory {}", dir);
        Ok(dir)
    }

    /// Remove a batch directory and everything in it. A missing directory is
    /// not an error.
    pub fn discard(&self, dir: &Utf8Path) -> Result<(), PersistenceError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                tracing::debug!("Discarded batch directory {}", dir);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_info(&self, dir: &Utf8Path, info: &BatchInfo) -> Result<(), PersistenceError> {
        write_json(&dir.join(BATCH_INFO_FILE), info)
    }

    pub fn write_summary(&self, dir: &Utf8Path, summary: &BatchSummary) -> Result<(), PersistenceError> {
        write_json(&dir.join(SUMMARY_FILE), summary)
    }

    pub fn read_summary(&self, dir: &Utf8Path) -> Result<Option<BatchSummary>, PersistenceError> {
        read_json(&dir.join(SUMMARY_FILE))
    }

    /// Write the paused snapshot, returning what was there before.
    pub fn write_snapshot(
        &self,
        dir: &Utf8Path,
        state: &PausedDetectionState,
    ) -> Result<SnapshotBackup, PersistenceError> {
        let path = dir.join(PAUSED_STATE_FILE);
        let previous = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        write_json(&path, state)?;
        Ok(SnapshotBackup(previous))
    }

    /// Undo a [`write_snapshot`](Self::write_snapshot).
    pub fn restore_snapshot(&self, dir: &Utf8Path, backup: SnapshotBackup) -> Result<(), PersistenceError> {
        let path = dir.join(PAUSED_STATE_FILE);
        match backup.0 {
            Some(bytes) => write_atomic(&path, &bytes)?,
            None => {
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }

    /// Read the paused snapshot.
    ///
    /// # Returns
    /// - `Ok(None)` if no snapshot exists
    /// - `Err(PersistenceError::Corrupt)` if the file cannot be parsed
    pub fn load_snapshot(&self, dir: &Utf8Path) -> Result<Option<PausedDetectionState>, PersistenceError> {
        read_json(&dir.join(PAUSED_STATE_FILE))
    }

    /// # Returns
    /// `true` if a snapshot was removed
    pub fn remove_snapshot(&self, dir: &Utf8Path) -> Result<bool, PersistenceError> {
        Ok(remove_if_exists(&dir.join(PAUSED_STATE_FILE))?)
    }

    pub fn has_snapshot(&self, dir: &Utf8Path) -> bool {
        dir.join(PAUSED_STATE_FILE).is_file()
    }
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistenceError::Corrupt {
            path: path.to_owned(),
            reason: e.to_string(),
        })
}

fn remove_if_exists(path: &Utf8Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
