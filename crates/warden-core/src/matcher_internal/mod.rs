//! Implementation modules for `matcher`.
//!
//! `src/matcher.rs` is the stable facade; parsing and the chain walk live
//! here.

pub(crate) mod chain;
pub(crate) mod dn;
pub(crate) mod pattern;
