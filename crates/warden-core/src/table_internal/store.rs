use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use super::snapshot;
use crate::errors::StorageError;
use crate::storage;
use crate::table::{StoredTable, TableStore};

const PREFIX: &str = "rules";
const EXT: &str = "snap";

/// Numbered snapshot files in one directory.
#[derive(Debug, Clone)]
pub struct FileTableStore {
    dir: PathBuf,
    retain: usize,
}

impl FileTableStore {
    /// Keeps the newest `retain` snapshots (at least two).
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> Self {
        Self {
            dir: dir.into(),
            retain: retain.max(2),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prune(&self) -> Result<(), StorageError> {
        let files = storage::numbered_files(&self.dir, PREFIX, EXT)?;
        let excess = files.len().saturating_sub(self.retain);
        for (seq, path) in files.into_iter().take(excess) {
            debug!(seq, path = %path.display(), "pruning old rule snapshot");
            storage::remove_file(&path)?;
        }
        Ok(())
    }
}

impl TableStore for FileTableStore {
    fn load(&self) -> Result<Option<StoredTable>, StorageError> {
        let files = storage::numbered_files(&self.dir, PREFIX, EXT)?;
        for (seq, path) in files.into_iter().rev() {
            let text = match storage::read_file(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(seq, error = %e, "skipping unreadable rule snapshot");
                    continue;
                }
            };
            match snapshot::decode(&text) {
                Ok(table) => {
                    debug!(seq, generation = table.generation, "rule snapshot loaded");
                    return Ok(Some(table));
                }
                Err(reason) => {
                    warn!(seq, path = %path.display(), reason = %reason, "skipping corrupt rule snapshot");
                }
            }
        }
        Ok(None)
    }

    fn save(&self, table: &StoredTable) -> Result<(), StorageError> {
        let files = storage::numbered_files(&self.dir, PREFIX, EXT)?;
        let seq = files.last().map_or(1, |(seq, _)| seq + 1);
        let path = self.dir.join(storage::numbered_name(PREFIX, seq, EXT));
        storage::write_atomic(&path, &snapshot::encode(table, Utc::now()))?;
        self.prune()
    }
}

/// Keeps only the last saved snapshot, in memory.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    saved: Mutex<Option<StoredTable>>,
    saves: AtomicUsize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that loads `table` on open.
    pub fn with_table(table: StoredTable) -> Self {
        Self {
            saved: Mutex::new(Some(table)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last_saved(&self) -> Option<StoredTable> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TableStore for MemoryTableStore {
    fn load(&self) -> Result<Option<StoredTable>, StorageError> {
        Ok(self.last_saved())
    }

    fn save(&self, table: &StoredTable) -> Result<(), StorageError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(table.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<T: TableStore + ?Sized> TableStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<StoredTable>, StorageError> {
        (**self).load()
    }

    fn save(&self, table: &StoredTable) -> Result<(), StorageError> {
        (**self).save(table)
    }
}
