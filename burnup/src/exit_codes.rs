//! Stable exit codes for the `burnup` CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid run control or scenario set, or any other error.
pub const INVALID: i32 = 1;
/// An external solver failed (after retries for transmutation).
pub const SOLVER_FAILED: i32 = 2;
/// A solver artifact was missing or malformed.
pub const PARSE_FAILED: i32 = 3;
