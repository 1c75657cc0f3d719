//! Stable exit codes for the agent CLI.

/// Every task that ran succeeded (or there was nothing to do).
pub const OK: i32 = 0;
/// Invalid usage/config/repository, or an operational error.
pub const INVALID: i32 = 1;
/// At least one task ended without success.
pub const TASK_FAILED: i32 = 2;
