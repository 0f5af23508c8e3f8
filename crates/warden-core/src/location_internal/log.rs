use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::record::{self, Record, RecordKey};
use crate::errors::StorageError;
use crate::permission::PermissionInfo;
use crate::storage;

const PREFIX: &str = "perm";
const EXT: &str = "rec";

/// Live declared lists as rebuilt from the log.
pub(crate) type LiveRecords = BTreeMap<RecordKey, Vec<PermissionInfo>>;

/// Directory of numbered record files, newest wins.
#[derive(Debug)]
pub(crate) struct RecordLog {
    dir: PathBuf,
    next_seq: u64,
    files: usize,
    compact_after: usize,
}

impl RecordLog {
    /// Replay every record in `dir`. Corrupt files are skipped.
    pub(crate) fn open(
        dir: impl Into<PathBuf>,
        compact_after: usize,
    ) -> Result<(Self, LiveRecords), StorageError> {
        let dir = dir.into();
        let files = storage::numbered_files(&dir, PREFIX, EXT)?;

        let mut live = LiveRecords::new();
        for (seq, path) in &files {
            let parsed = storage::read_file(path)
                .map_err(|e| e.to_string())
                .and_then(|text| record::decode(&text));
            match parsed {
                Ok(Record {
                    key,
                    permissions: Some(permissions),
                }) => {
                    live.insert(key, permissions);
                }
                Ok(Record {
                    key,
                    permissions: None,
                }) => {
                    live.remove(&key);
                }
                Err(reason) => {
                    warn!(seq, path = %path.display(), reason = %reason, "skipping corrupt declared-permission record");
                }
            }
        }

        let log = Self {
            next_seq: files.last().map_or(1, |(seq, _)| seq + 1),
            files: files.len(),
            dir,
            compact_after: compact_after.max(1),
        };
        debug!(dir = %log.dir.display(), files = log.files, live = live.len(), "declared-permission log replayed");
        Ok((log, live))
    }

    pub(crate) fn append(&mut self, record: &Record, live: &LiveRecords) -> Result<(), StorageError> {
        self.write(record)?;
        if self.needs_compaction(live) {
            self.compact(live)?;
        }
        Ok(())
    }

    /// More than `compact_after` files hold superseded records.
    pub(crate) fn needs_compaction(&self, live: &LiveRecords) -> bool {
        self.files > live.len() + self.compact_after
    }

    /// Rewrite `live` into fresh files and delete everything older.
    pub(crate) fn compact(&mut self, live: &LiveRecords) -> Result<(), StorageError> {
        let first_new = self.next_seq;
        let before = self.files;
        for (key, permissions) in live {
            self.write(&Record {
                key: key.clone(),
                permissions: Some(permissions.clone()),
            })?;
        }
        for (seq, path) in storage::numbered_files(&self.dir, PREFIX, EXT)? {
            if seq < first_new {
                storage::remove_file(&path)?;
            }
        }
        self.files = live.len();
        info!(before, after = self.files, "compacted declared-permission log");
        Ok(())
    }

    fn write(&mut self, record: &Record) -> Result<(), StorageError> {
        let path = self
            .dir
            .join(storage::numbered_name(PREFIX, self.next_seq, EXT));
        storage::write_atomic(&path, &record::encode(record))?;
        self.next_seq += 1;
        self.files += 1;
        Ok(())
    }
}
