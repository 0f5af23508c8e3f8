//! `src/location.rs` is the stable facade; the record codec and the
//! append log live here.

pub(crate) mod log;
pub(crate) mod record;

#[cfg(test)]
mod tests;
