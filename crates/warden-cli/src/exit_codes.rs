//! Exit codes of the `warden` binary.
//! Scripts depend on these; treat them as a public contract.

pub const SUCCESS: i32 = 0;
pub const NOT_FOUND: i32 = 1; // Missing rule / origin, or no chain match
pub const USAGE_ERROR: i32 = 2; // Bad flags, unreadable config or data dir
pub const CONFLICT: i32 = 3; // Rule table changed during a transaction
pub const MALFORMED: i32 = 4; // Unparseable spec, pattern or chain
