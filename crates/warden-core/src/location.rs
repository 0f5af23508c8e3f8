//! Declared (per-origin) and default permission lists.
//!
//! A declared list is a hard ceiling for every unit loaded from its
//! origin. The default list applies to units without a declared list
//! while the conditional rule table is empty.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock, Weak};

use tracing::{debug, warn};

use crate::errors::StorageError;
use crate::listeners::{ListenerSet, SubscriptionId};
use crate::permission::PermissionInfo;

#[path = "location_internal/mod.rs"]
mod location_internal;

use location_internal::log::{LiveRecords, RecordLog};
use location_internal::record::{Record, RecordKey};

/// What changed in a [`LocationPermissionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredChange<'a> {
    Origin(&'a str),
    Default,
}

pub trait DeclaredListener: Send + Sync {
    fn declared_changed(&self, change: DeclaredChange<'_>);
}

pub struct LocationPermissionStore {
    records: RwLock<LiveRecords>,
    /// `None` for a store that is never persisted.
    log: Option<Mutex<RecordLog>>,
    listeners: ListenerSet<dyn DeclaredListener>,
}

impl LocationPermissionStore {
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(LiveRecords::new()),
            log: None,
            listeners: ListenerSet::new(),
        }
    }

    /// Open the record log in `dir`, replaying every readable record.
    /// The log is compacted once more than `compact_after` of its files
    /// hold superseded records.
    pub fn open(dir: impl Into<PathBuf>, compact_after: usize) -> Result<Self, StorageError> {
        let (mut log, records) = RecordLog::open(dir, compact_after)?;
        if log.needs_compaction(&records) {
            if let Err(e) = log.compact(&records) {
                warn!(error = %e, "failed to compact declared-permission log");
            }
        }
        Ok(Self {
            records: RwLock::new(records),
            log: Some(Mutex::new(log)),
            listeners: ListenerSet::new(),
        })
    }

    pub fn get_declared(&self, origin: &str) -> Option<Vec<PermissionInfo>> {
        self.get(&RecordKey::Origin(origin.to_string()))
    }

    /// Set or (with `None`) delete the declared list for `origin`.
    pub fn set_declared(&self, origin: &str, permissions: Option<Vec<PermissionInfo>>) {
        self.set(RecordKey::Origin(origin.to_string()), permissions);
        self.notify(DeclaredChange::Origin(origin));
    }

    pub fn get_default(&self) -> Option<Vec<PermissionInfo>> {
        self.get(&RecordKey::Default)
    }

    pub fn set_default(&self, permissions: Option<Vec<PermissionInfo>>) {
        self.set(RecordKey::Default, permissions);
        self.notify(DeclaredChange::Default);
    }

    /// Origins with a declared list, sorted.
    pub fn origins(&self) -> Vec<String> {
        self.read()
            .keys()
            .filter_map(|key| match key {
                RecordKey::Origin(origin) => Some(origin.clone()),
                RecordKey::Default => None,
            })
            .collect()
    }

    pub fn subscribe(&self, listener: Weak<dyn DeclaredListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn get(&self, key: &RecordKey) -> Option<Vec<PermissionInfo>> {
        self.read().get(key).cloned()
    }

    fn set(&self, key: RecordKey, permissions: Option<Vec<PermissionInfo>>) {
        // The log lock is held across the memory update so file order
        // matches update order.
        let mut log = self
            .log
            .as_ref()
            .map(|log| log.lock().unwrap_or_else(PoisonError::into_inner));

        let live = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match &permissions {
                Some(list) => {
                    records.insert(key.clone(), list.clone());
                }
                None => {
                    records.remove(&key);
                }
            }
            log.as_ref().map(|_| records.clone())
        };
        debug!(key = ?key, deleted = permissions.is_none(), "declared permissions updated");

        if let (Some(log), Some(live)) = (log.as_mut(), live) {
            let record = Record { key, permissions };
            if let Err(e) = log.append(&record, &live) {
                warn!(error = %e, "failed to persist declared permissions");
            }
        }
    }

    fn notify(&self, change: DeclaredChange<'_>) {
        for listener in self.listeners.live() {
            listener.declared_changed(change);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LiveRecords> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocationPermissionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for LocationPermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationPermissionStore")
            .field("records", &self.read().len())
            .field("persistent", &self.log.is_some())
            .finish()
    }
}
