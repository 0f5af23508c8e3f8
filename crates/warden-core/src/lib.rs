//! Conditional permission engine for dynamically loaded units.
//!
//! This crate provides:
//!
//! - Signer-chain matching with `*` / `-` wildcards over distinguished names
//! - An ordered, persisted rule table with optimistic bulk transactions
//! - Per-origin declared permission ceilings and a default list
//! - Per-unit permission views with immutable-condition caching
//! - Stack-wide checks with postponed conditions and deny-wins resolution
//!
//! # Quick Start
//!
//! ```no_run
//! use warden_core::{
//!     ConditionInfo, Permission, PermissionInfo, PolicyServices, UnitInfo, UnitPermissionView,
//!     WardenConfig,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let services = PolicyServices::open(&WardenConfig::from_env())?;
//! services.table.put(
//!     Some("acme-tmp"),
//!     vec![ConditionInfo::new("signer", ["*, o=ACME;-"])],
//!     vec![PermissionInfo::new("file", Some("/tmp/*"), Some("read,write"))],
//! )?;
//!
//! let view = UnitPermissionView::new(UnitInfo::new(7, "file:/opt/units/a.jar"), &services);
//! let allowed = view.implies(&Permission::new("file", "/tmp/cache", "read"));
//! # let _ = allowed;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `WARDEN_DATA_DIR` | State root (default: platform data dir + `warden`) |
//! | `WARDEN_SNAPSHOT_RETAIN` | Rule snapshots kept (default: 2, minimum 2) |
//! | `WARDEN_LOCATION_COMPACT_AFTER` | Declared-permission records before compaction (default: 64) |

mod codec;
pub mod condition;
pub mod config;
pub mod errors;
pub mod listeners;
pub mod location;
pub mod matcher;
pub mod permission;
pub mod postpone;
pub mod rule;
mod storage;
pub mod table;
pub mod view;

// Re-export main types
pub use condition::{
    Condition, ConditionFactory, ConditionInfo, ConditionRegistry, ConditionScope, LOCATION_KIND,
    SIGNER_KIND,
};
pub use config::WardenConfig;
pub use errors::{
    ChainError, ConditionError, MatchError, PatternError, SpecError, StorageError, TableError,
    TableResult,
};
pub use listeners::SubscriptionId;
pub use location::{DeclaredChange, DeclaredListener, LocationPermissionStore};
pub use matcher::{
    match_chain, match_one, matches_names, parse_chain_element, parse_pattern, ChainCert,
    ChainMatch, ChainPattern, ChainSegment, RdnGroups,
};
pub use permission::{implicit_permissions, Permission, PermissionInfo, PermissionSet};
pub use postpone::SecurityContext;
pub use rule::{Access, RuleEvaluation, RuleRecord, RuleSpec};
pub use table::{
    EntryId, FileTableStore, MemoryTableStore, RuleEntry, RuleTableService, StoredTable,
    TableChange, TableListener, TableSnapshot, TableStore, TableUpdate, UpdateRow,
};
pub use view::{PolicyServices, UnitInfo, UnitPermissionView};
