//! Built-in condition kinds. `src/condition.rs` is the stable facade.

pub(crate) mod builtin;
