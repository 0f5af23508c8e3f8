//! The ordered, shared rule table.
//!
//! One [`RuleTableService`] is shared by every unit view. Entries are kept
//! in evaluation order; each mutation bumps the generation counter,
//! persists a full snapshot through the [`TableStore`] and notifies the
//! subscribed [`TableListener`]s once the table lock has been released.
//!
//! Bulk edits go through [`RuleTableService::begin_update`] /
//! [`RuleTableService::commit`], an optimistic transaction keyed on the
//! generation seen at `begin_update`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::condition::{ConditionInfo, ConditionRegistry};
use crate::errors::{SpecError, StorageError, TableError, TableResult};
use crate::listeners::{ListenerSet, SubscriptionId};
use crate::permission::PermissionInfo;
use crate::rule::{Access, RuleSpec};

#[path = "table_internal/mod.rs"]
mod table_internal;

pub use table_internal::store::{FileTableStore, MemoryTableStore};

/// Identity of one table entry. A replaced entry gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable, named rule in the table.
#[derive(Debug)]
pub struct RuleEntry {
    id: EntryId,
    name: String,
    access: Access,
    conditions: Vec<ConditionInfo>,
    permissions: Vec<PermissionInfo>,
}

impl RuleEntry {
    pub(crate) fn new(name: String, spec: RuleSpec) -> Self {
        Self {
            id: EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            access: spec.access,
            conditions: spec.conditions,
            permissions: spec.permissions,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn conditions(&self) -> &[ConditionInfo] {
        &self.conditions
    }

    pub fn permissions(&self) -> &[PermissionInfo] {
        &self.permissions
    }

    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            name: Some(self.name.clone()),
            access: self.access,
            conditions: self.conditions.clone(),
            permissions: self.permissions.clone(),
        }
    }

    pub fn encode(&self) -> String {
        self.to_spec().encode()
    }

    /// Same name and spec, ignoring identity.
    pub fn same_rule(&self, other: &RuleEntry) -> bool {
        self.name == other.name
            && self.access == other.access
            && self.conditions == other.conditions
            && self.permissions == other.permissions
    }
}

/// One position-level change, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    Inserted { index: usize, entry: EntryId },
    Replaced { index: usize, old: EntryId, new: EntryId },
    Removed { index: usize, entry: EntryId },
}

impl TableChange {
    pub fn index(&self) -> usize {
        match self {
            Self::Inserted { index, .. } | Self::Replaced { index, .. } | Self::Removed { index, .. } => {
                *index
            }
        }
    }
}

/// Observer of table mutations. Called without any table lock held.
pub trait TableListener: Send + Sync {
    fn table_changed(&self, generation: u64, changes: &[TableChange]);
}

/// A rule set as persisted by a [`TableStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTable {
    pub generation: u64,
    pub rules: Vec<RuleSpec>,
}

/// Snapshot persistence backend.
pub trait TableStore: Send + Sync {
    /// The most recent complete snapshot, if any.
    fn load(&self) -> Result<Option<StoredTable>, StorageError>;

    fn save(&self, table: &StoredTable) -> Result<(), StorageError>;
}

/// Consistent view of the table at one generation.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    generation: u64,
    entries: Arc<Vec<Arc<RuleEntry>>>,
}

impl TableSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[Arc<RuleEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A row of a pending transaction.
#[derive(Debug, Clone)]
pub enum UpdateRow {
    /// Kept by identity; unchanged rows produce no change events.
    Existing(Arc<RuleEntry>),
    /// Inserted on commit; anonymous rows get a synthesized name.
    New(RuleSpec),
}

impl UpdateRow {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Existing(entry) => Some(entry.name()),
            Self::New(spec) => spec.name.as_deref(),
        }
    }
}

/// Editable copy of the table bound to the generation it was taken at.
#[derive(Debug, Clone)]
pub struct TableUpdate {
    generation: u64,
    rows: Vec<UpdateRow>,
}

impl TableUpdate {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rows(&self) -> &[UpdateRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<UpdateRow> {
        &mut self.rows
    }

    pub fn push_front(&mut self, spec: RuleSpec) {
        self.rows.insert(0, UpdateRow::New(spec));
    }

    pub fn push_back(&mut self, spec: RuleSpec) {
        self.rows.push(UpdateRow::New(spec));
    }

    /// Remove every row named `name`.
    pub fn remove_named(&mut self, name: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|row| row.name() != Some(name));
        self.rows.len() != before
    }

    /// Replace all rows, as an import does.
    pub fn replace_all(&mut self, specs: impl IntoIterator<Item = RuleSpec>) {
        self.rows = specs.into_iter().map(UpdateRow::New).collect();
    }
}

#[derive(Debug)]
struct TableState {
    generation: u64,
    entries: Arc<Vec<Arc<RuleEntry>>>,
}

/// The shared rule table.
pub struct RuleTableService {
    state: Mutex<TableState>,
    /// Highest generation written to the store.
    persisted: Mutex<u64>,
    store: Box<dyn TableStore>,
    conditions: Arc<ConditionRegistry>,
    listeners: ListenerSet<dyn TableListener>,
}

impl RuleTableService {
    /// Open over `store`, loading its newest complete snapshot. Load
    /// failures leave the table empty.
    pub fn open(store: Box<dyn TableStore>, conditions: Arc<ConditionRegistry>) -> Self {
        let (generation, entries) = match store.load() {
            Ok(Some(stored)) => {
                let entries = table_internal::names::entries_from_stored(stored.rules);
                info!(generation = stored.generation, rules = entries.len(), "loaded rule table");
                (stored.generation, entries)
            }
            Ok(None) => (0, Vec::new()),
            Err(e) => {
                warn!(error = %e, "failed to load rule table, starting empty");
                (0, Vec::new())
            }
        };

        Self {
            state: Mutex::new(TableState {
                generation,
                entries: Arc::new(entries),
            }),
            persisted: Mutex::new(generation),
            store,
            conditions,
            listeners: ListenerSet::new(),
        }
    }

    /// A table persisted only in memory, with the built-in condition kinds.
    pub fn in_memory() -> Self {
        Self::open(
            Box::new(MemoryTableStore::new()),
            Arc::new(ConditionRegistry::with_builtins()),
        )
    }

    pub fn conditions(&self) -> &Arc<ConditionRegistry> {
        &self.conditions
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.lock_state();
        TableSnapshot {
            generation: state.generation,
            entries: state.entries.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<RuleEntry>> {
        self.lock_state()
            .entries
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<RuleEntry>> {
        self.lock_state().entries.as_ref().clone()
    }

    pub fn size(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Insert or replace an ALLOW rule.
    pub fn put(
        &self,
        name: Option<&str>,
        conditions: Vec<ConditionInfo>,
        permissions: Vec<PermissionInfo>,
    ) -> TableResult<Arc<RuleEntry>> {
        self.put_rule(RuleSpec {
            name: name.map(String::from),
            access: Access::Allow,
            conditions,
            permissions,
        })
    }

    /// Replace the entry named `spec.name` in place, or insert at the front.
    pub fn put_rule(&self, mut spec: RuleSpec) -> TableResult<Arc<RuleEntry>> {
        self.validate(&spec)?;
        let name = spec.name.take();

        let (entry, change, snapshot) = {
            let mut state = self.lock_state();
            let generation = state.generation + 1;
            let mut entries = state.entries.as_ref().clone();

            let existing = name
                .as_deref()
                .and_then(|n| entries.iter().position(|e| e.name() == n));
            let (entry, change) = match (existing, name) {
                (Some(index), Some(name)) => {
                    let entry = Arc::new(RuleEntry::new(name, spec));
                    let old = std::mem::replace(&mut entries[index], entry.clone());
                    let change = TableChange::Replaced {
                        index,
                        old: old.id(),
                        new: entry.id(),
                    };
                    (entry, change)
                }
                (_, name) => {
                    let name = name.unwrap_or_else(|| {
                        table_internal::names::synthesize(generation, |candidate| {
                            entries.iter().any(|e| e.name() == candidate)
                        })
                    });
                    let entry = Arc::new(RuleEntry::new(name, spec));
                    entries.insert(0, entry.clone());
                    let change = TableChange::Inserted {
                        index: 0,
                        entry: entry.id(),
                    };
                    (entry, change)
                }
            };

            state.generation = generation;
            state.entries = Arc::new(entries);
            (entry, change, Self::snapshot_of(&state))
        };

        debug!(name = entry.name(), generation = snapshot.generation, "rule put");
        self.persist(&snapshot);
        self.notify(snapshot.generation, &[change]);
        Ok(entry)
    }

    /// Remove by identity. Returns false when the entry is no longer present.
    pub fn remove(&self, entry: &RuleEntry) -> bool {
        let (change, snapshot) = {
            let mut state = self.lock_state();
            let Some(index) = state.entries.iter().position(|e| e.id() == entry.id()) else {
                return false;
            };
            let mut entries = state.entries.as_ref().clone();
            entries.remove(index);
            state.generation += 1;
            state.entries = Arc::new(entries);
            let change = TableChange::Removed {
                index,
                entry: entry.id(),
            };
            (change, Self::snapshot_of(&state))
        };

        debug!(name = entry.name(), generation = snapshot.generation, "rule removed");
        self.persist(&snapshot);
        self.notify(snapshot.generation, &[change]);
        true
    }

    pub fn begin_update(&self) -> TableUpdate {
        let state = self.lock_state();
        TableUpdate {
            generation: state.generation,
            rows: state
                .entries
                .iter()
                .cloned()
                .map(UpdateRow::Existing)
                .collect(),
        }
    }

    /// Apply `update` as one transaction. Fails with
    /// [`TableError::ConcurrentUpdate`] and leaves the table untouched if
    /// it changed since `begin_update`.
    pub fn commit(&self, update: TableUpdate) -> TableResult<()> {
        for row in &update.rows {
            if let UpdateRow::New(spec) = row {
                self.validate(spec)?;
            }
        }

        let (changes, snapshot) = {
            let mut state = self.lock_state();
            if state.generation != update.generation {
                return Err(TableError::ConcurrentUpdate {
                    expected: update.generation,
                    actual: state.generation,
                });
            }
            let generation = state.generation + 1;
            let target = table_internal::names::materialize(&state.entries, update.rows, generation)?;
            let (entries, changes) = table_internal::diff::apply(&state.entries, &target);

            state.generation = generation;
            state.entries = Arc::new(entries);
            (changes, Self::snapshot_of(&state))
        };

        info!(
            generation = snapshot.generation,
            rules = snapshot.len(),
            changes = changes.len(),
            "rule table committed"
        );
        self.persist(&snapshot);
        if !changes.is_empty() {
            self.notify(snapshot.generation, &changes);
        }
        Ok(())
    }

    pub fn subscribe(&self, listener: Weak<dyn TableListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn validate(&self, spec: &RuleSpec) -> TableResult<()> {
        for permission in &spec.permissions {
            if permission.kind.is_empty()
                || permission.kind.contains(|c: char| c.is_whitespace() || "()[]{}\"".contains(c))
            {
                return Err(TableError::Spec(SpecError {
                    input: permission.encode(),
                    position: 1,
                    reason: format!("invalid permission kind {:?}", permission.kind),
                }));
            }
        }
        for condition in &spec.conditions {
            self.conditions.validate(condition)?;
        }
        Ok(())
    }

    fn snapshot_of(state: &TableState) -> TableSnapshot {
        TableSnapshot {
            generation: state.generation,
            entries: state.entries.clone(),
        }
    }

    /// Write `snapshot` unless a newer generation is already stored.
    fn persist(&self, snapshot: &TableSnapshot) {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        if *persisted >= snapshot.generation {
            debug!(generation = snapshot.generation, stored = *persisted, "skipping stale snapshot");
            return;
        }
        let stored = StoredTable {
            generation: snapshot.generation,
            rules: snapshot.entries.iter().map(|e| e.to_spec()).collect(),
        };
        match self.store.save(&stored) {
            Ok(()) => *persisted = snapshot.generation,
            Err(e) => {
                warn!(generation = snapshot.generation, error = %e, "failed to persist rule table");
            }
        }
    }

    fn notify(&self, generation: u64, changes: &[TableChange]) {
        for listener in self.listeners.live() {
            listener.table_changed(generation, changes);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RuleTableService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RuleTableService")
            .field("generation", &state.generation)
            .field("rules", &state.entries.len())
            .field("listeners", &self.listeners)
            .finish()
    }
}
