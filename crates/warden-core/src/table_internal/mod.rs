//! `src/table.rs` is the stable facade; diffing, naming and the snapshot
//! stores live here.

pub(crate) mod diff;
pub(crate) mod names;
pub(crate) mod snapshot;
pub(crate) mod store;
