//! Storage seams: the hole status store, the batch table and the product
//! catalog.
//!
//! Each is a trait so the surrounding application can plug in its database;
//! the crate ships file-backed and in-memory implementations.

pub mod batch_repo;
pub mod catalog;
pub mod status;
mod path;

pub use batch_repo::{BatchRepository, JsonBatchRepository};
pub(crate) use path::sanitize_component;
pub use catalog::{ProductCatalog, StaticCatalog};
pub use status::{InMemoryStatusStore, StatusStore};

use camino::Utf8Path;
use std::fs;
use std::io::Write;
use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Row already exists: {0}")]
    Duplicate(String),

    #[error("Corrupt table: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Replace `path` with `bytes` via a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}
