//! Per-unit permission views.
//!
//! A [`UnitPermissionView`] answers `implies` for one unit. It caches the
//! declared and default lists for its origin and one [`RuleRecord`] per
//! table entry, and subscribes to both services so that any change only
//! flips a validity flag; the cache is rebuilt on the next check.
//!
//! Precedence within a frame, first decisive answer wins:
//!
//! 1. implicit permissions (own data area, own administration): allow
//! 2. a declared list for the origin that does not imply: deny
//! 3. empty rule table: the declared list, else the default list, else
//!    unrestricted
//! 4. the conditional walk over the rule table

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, info, warn};

use crate::condition::{ConditionRegistry, ConditionScope};
use crate::config::WardenConfig;
use crate::errors::StorageError;
use crate::listeners::SubscriptionId;
use crate::location::{DeclaredChange, DeclaredListener, LocationPermissionStore};
use crate::matcher::ChainCert;
use crate::permission::{implicit_permissions, Permission, PermissionSet};
use crate::postpone::{PendingRule, SecurityContext};
use crate::rule::{Access, RuleEvaluation, RuleRecord};
use crate::table::{
    EntryId, FileTableStore, RuleEntry, RuleTableService, TableChange, TableListener,
    TableSnapshot,
};

/// What the engine knows about a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: u64,
    pub origin: String,
    /// One certificate chain per signer, leaf first.
    pub signers: Vec<Vec<ChainCert>>,
    /// Root of the unit's private data area.
    pub data_dir: Option<String>,
}

impl UnitInfo {
    pub fn new(id: u64, origin: impl Into<String>) -> Self {
        Self {
            id,
            origin: origin.into(),
            signers: Vec::new(),
            data_dir: None,
        }
    }

    pub fn with_signers(mut self, signers: Vec<Vec<ChainCert>>) -> Self {
        self.signers = signers;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}

/// The services a view evaluates against.
#[derive(Debug, Clone)]
pub struct PolicyServices {
    pub table: Arc<RuleTableService>,
    pub locations: Arc<LocationPermissionStore>,
    pub conditions: Arc<ConditionRegistry>,
}

impl PolicyServices {
    /// Conditions are taken from the table so validation and
    /// instantiation agree.
    pub fn new(table: Arc<RuleTableService>, locations: Arc<LocationPermissionStore>) -> Self {
        let conditions = table.conditions().clone();
        Self {
            table,
            locations,
            conditions,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(RuleTableService::in_memory()),
            Arc::new(LocationPermissionStore::in_memory()),
        )
    }

    /// Persistent services under `config.data_dir`.
    pub fn open(config: &WardenConfig) -> Result<Self, StorageError> {
        Self::open_with(config, Arc::new(ConditionRegistry::with_builtins()))
    }

    pub fn open_with(
        config: &WardenConfig,
        conditions: Arc<ConditionRegistry>,
    ) -> Result<Self, StorageError> {
        let store = FileTableStore::new(config.table_dir(), config.snapshot_retain);
        let table = RuleTableService::open(Box::new(store), conditions);
        let locations =
            LocationPermissionStore::open(config.location_dir(), config.location_compact_after)?;
        Ok(Self::new(Arc::new(table), Arc::new(locations)))
    }
}

/// Outcome of the immediate pass for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameVerdict {
    Decided(Access),
    /// Postponed rules were collected; this is the verdict if none of
    /// them applies.
    Postponed(Access),
}

#[derive(Debug, Default)]
struct ViewCache {
    generation: Option<u64>,
    declared: Option<Arc<PermissionSet>>,
    default: Option<Arc<PermissionSet>>,
    records: HashMap<EntryId, Arc<RuleRecord>>,
}

struct Resolved {
    declared: Option<Arc<PermissionSet>>,
    default: Option<Arc<PermissionSet>>,
    records: Vec<Arc<RuleRecord>>,
}

#[derive(Debug, Clone, Copy)]
struct Subscriptions {
    table: SubscriptionId,
    locations: SubscriptionId,
}

pub struct UnitPermissionView {
    unit: RwLock<UnitInfo>,
    implicit: PermissionSet,
    services: RwLock<PolicyServices>,
    subscriptions: Mutex<Option<Subscriptions>>,
    valid: AtomicBool,
    cache: Mutex<ViewCache>,
}

impl UnitPermissionView {
    pub fn new(unit: UnitInfo, services: &PolicyServices) -> Arc<Self> {
        let implicit = implicit_permissions(unit.id, unit.data_dir.as_deref());
        let view = Arc::new(Self {
            unit: RwLock::new(unit),
            implicit,
            services: RwLock::new(services.clone()),
            subscriptions: Mutex::new(None),
            valid: AtomicBool::new(false),
            cache: Mutex::new(ViewCache::default()),
        });
        view.attach(services);
        view
    }

    /// One-frame check.
    pub fn implies(self: &Arc<Self>, permission: &Permission) -> bool {
        SecurityContext::new(vec![self.clone()]).check(permission)
    }

    pub fn unit(&self) -> UnitInfo {
        self.unit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unit_id(&self) -> u64 {
        self.unit.read().unwrap_or_else(PoisonError::into_inner).id
    }

    pub fn origin(&self) -> String {
        self.unit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .origin
            .clone()
    }

    /// Drop every cached answer; the next check rebuilds them.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Move the unit to `services` (and optionally a new origin), then
    /// re-sync against the full current table.
    pub fn relocate(self: &Arc<Self>, origin: Option<&str>, services: &PolicyServices) {
        if let Some(origin) = origin {
            self.unit
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .origin = origin.to_string();
        }
        let previous = std::mem::replace(
            &mut *self.services.write().unwrap_or_else(PoisonError::into_inner),
            services.clone(),
        );
        self.detach(&previous);
        self.attach(services);

        {
            let mut cache = self.lock_cache();
            *cache = ViewCache::default();
        }
        self.invalidate();
        let snapshot = services.table.snapshot();
        let resolved = self.resolve(services, &snapshot);
        info!(
            unit = self.unit_id(),
            origin = %self.origin(),
            rules = resolved.records.len(),
            "unit relocated"
        );
    }

    /// Rule records currently cached for this unit.
    pub fn cached_records(&self) -> usize {
        self.lock_cache().records.len()
    }

    /// Immediate pass for this frame. Postponed rules are appended to
    /// `pending` in table order.
    pub(crate) fn evaluate_frame(
        &self,
        permission: &Permission,
        scope: &ConditionScope<'_>,
        pending: &mut Vec<PendingRule>,
    ) -> FrameVerdict {
        if self.implicit.implies(permission) {
            return FrameVerdict::Decided(Access::Allow);
        }

        let services = self.services();
        let snapshot = services.table.snapshot();
        let resolved = self.resolve(&services, &snapshot);

        if let Some(declared) = &resolved.declared {
            if !declared.implies(permission) {
                return FrameVerdict::Decided(Access::Deny);
            }
        }

        if snapshot.is_empty() {
            let allowed = match (&resolved.declared, &resolved.default) {
                (Some(_), _) => true,
                (None, Some(default)) => default.implies(permission),
                (None, None) => true,
            };
            return FrameVerdict::Decided(if allowed { Access::Allow } else { Access::Deny });
        }

        for record in &resolved.records {
            match record.evaluate(permission, false, scope) {
                RuleEvaluation::NotImplied => {}
                RuleEvaluation::Implied => {
                    return if pending.is_empty() {
                        FrameVerdict::Decided(record.access())
                    } else {
                        FrameVerdict::Postponed(record.access())
                    };
                }
                RuleEvaluation::Pending(conditions) => pending.push(PendingRule {
                    record: record.clone(),
                    conditions,
                }),
            }
        }

        if pending.is_empty() {
            FrameVerdict::Decided(Access::Deny)
        } else {
            FrameVerdict::Postponed(Access::Deny)
        }
    }

    fn resolve(&self, services: &PolicyServices, snapshot: &TableSnapshot) -> Resolved {
        let unit = self.unit();
        let mut cache = self.lock_cache();

        let stale = !self.valid.swap(true, Ordering::AcqRel);
        if stale {
            cache.declared = services
                .locations
                .get_declared(&unit.origin)
                .map(|list| Arc::new(PermissionSet::from_infos(&list)));
            cache.default = services
                .locations
                .get_default()
                .map(|list| Arc::new(PermissionSet::from_infos(&list)));
        }
        if stale || cache.generation != Some(snapshot.generation()) {
            let live: HashSet<EntryId> = snapshot.entries().iter().map(|e| e.id()).collect();
            cache.records.retain(|id, _| live.contains(id));
            cache.generation = Some(snapshot.generation());
        }

        let records = snapshot
            .entries()
            .iter()
            .map(|entry| {
                cache
                    .records
                    .entry(entry.id())
                    .or_insert_with(|| Arc::new(instantiate(entry, &unit, &services.conditions)))
                    .clone()
            })
            .collect();

        Resolved {
            declared: cache.declared.clone(),
            default: cache.default.clone(),
            records,
        }
    }

    fn services(&self) -> PolicyServices {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn attach(self: &Arc<Self>, services: &PolicyServices) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let table_listener: Weak<dyn TableListener> = weak.clone();
        let declared_listener: Weak<dyn DeclaredListener> = weak;
        let subscriptions = Subscriptions {
            table: services.table.subscribe(table_listener),
            locations: services.locations.subscribe(declared_listener),
        };
        *self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscriptions);
    }

    fn detach(&self, services: &PolicyServices) {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscriptions) = subscriptions {
            services.table.unsubscribe(subscriptions.table);
            services.locations.unsubscribe(subscriptions.locations);
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, ViewCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn instantiate(entry: &Arc<RuleEntry>, unit: &UnitInfo, registry: &ConditionRegistry) -> RuleRecord {
    let mut conditions = Vec::with_capacity(entry.conditions().len());
    for info in entry.conditions() {
        match registry.create(info, unit) {
            Ok(condition) => conditions.push(condition),
            Err(e) => {
                warn!(rule = entry.name(), unit = unit.id, error = %e, "condition could not be created, rule disabled for unit");
                return RuleRecord::failed(entry.clone());
            }
        }
    }
    RuleRecord::new(entry.clone(), conditions)
}

impl TableListener for UnitPermissionView {
    fn table_changed(&self, generation: u64, changes: &[TableChange]) {
        self.invalidate();
        debug!(
            unit = self.unit_id(),
            generation,
            changes = changes.len(),
            first_index = changes.first().map(TableChange::index),
            "rule table changed"
        );
    }
}

impl DeclaredListener for UnitPermissionView {
    fn declared_changed(&self, change: DeclaredChange<'_>) {
        if let DeclaredChange::Origin(origin) = change {
            if origin != self.origin() {
                return;
            }
        }
        self.invalidate();
    }
}

impl Drop for UnitPermissionView {
    fn drop(&mut self) {
        let services = self.services();
        self.detach(&services);
    }
}

impl std::fmt::Debug for UnitPermissionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitPermissionView")
            .field("unit", &self.unit_id())
            .field("origin", &self.origin())
            .field("valid", &self.valid.load(Ordering::Acquire))
            .finish()
    }
}
