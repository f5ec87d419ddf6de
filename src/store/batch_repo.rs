use super::{StoreError, sanitize_component, write_atomic};
use crate::models::Batch;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The batch table.
///
/// Rows are never deleted; terminated and completed batches stay queryable.
#[cfg_attr(test, mockall::automock)]
pub trait BatchRepository: Send + Sync {
    /// Insert a new row. Fails with [`StoreError::Duplicate`] if the id exists.
    fn insert_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Insert or overwrite a row.
    fn save_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, StoreError>;

    /// All rows of one product, in insertion order.
    fn batches_for_product(&self, product_id: &str) -> Result<Vec<Batch>, StoreError>;
}

/// [`BatchRepository`] persisted as one JSON file per row.
///
/// Rows live under `<root>/.batch_table/<batch_id>.json`. A mutation rewrites
/// only its own row through a temp file and a rename, and the in-memory table
/// only changes after the write succeeded, so a failed write leaves both
/// copies at the previous state.
#[derive(Debug)]
pub struct JsonBatchRepository {
    dir: Utf8PathBuf,
    table: Mutex<Table>,
}

#[derive(Debug, Default)]
struct Table {
    rows: IndexMap<String, Batch>,
    /// Row file name -> batch id, to catch ids that sanitize to the same file
    files: HashMap<String, String>,
}

fn row_file_name(batch_id: &str) -> String {
    format!("{}.json", sanitize_component(batch_id))
}

impl JsonBatchRepository {
    pub const TABLE_DIR: &'static str = ".batch_table";

    /// Open (or create) the batch table under `root`.
    ///
    /// An unreadable or corrupt row is an error: running without it would
    /// silently lose batch history.
    pub fn open(root: &Utf8Path) -> Result<Self, StoreError> {
        let dir = root.join(Self::TABLE_DIR);
        fs::create_dir_all(&dir)?;

        let mut loaded = Vec::new();
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let path = entry.path();
            if path.extension() != Some("json") || !entry.file_type()?.is_file() {
                continue;
            }
            let content = fs::read_to_string(path)?;
            let batch: Batch = serde_json::from_str(&content)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", path, e)))?;
            loaded.push(batch);
        }

        // Directory order is arbitrary; creation order is what callers expect
        loaded.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.detection_number.cmp(&b.detection_number))
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });

        let mut table = Table::default();
        for batch in loaded {
            let file = row_file_name(&batch.batch_id);
            if let Some(other) = table.files.insert(file.clone(), batch.batch_id.clone()) {
                return Err(StoreError::Corrupt(format!(
                    "{}: rows {} and {} share a file",
                    file, other, batch.batch_id
                )));
            }
            table.rows.insert(batch.batch_id.clone(), batch);
        }

        tracing::info!("Opened batch table {} ({} rows)", dir, table.rows.len());

        Ok(Self {
            dir,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, batch: &Batch, allow_overwrite: bool) -> Result<(), StoreError> {
        let mut table = self.lock();
        if !allow_overwrite && table.rows.contains_key(&batch.batch_id) {
            return Err(StoreError::Duplicate(batch.batch_id.clone()));
        }

        let file = row_file_name(&batch.batch_id);
        if let Some(owner) = table.files.get(&file)
            && *owner != batch.batch_id
        {
            return Err(StoreError::Duplicate(format!(
                "{} (file {} belongs to {})",
                batch.batch_id, file, owner
            )));
        }

        let bytes = serde_json::to_vec_pretty(batch)?;
        write_atomic(&self.dir.join(&file), &bytes)?;

        table.files.insert(file, batch.batch_id.clone());
        table.rows.insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }
}
