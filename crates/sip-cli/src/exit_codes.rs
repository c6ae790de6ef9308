//! Coarse, CI-friendly exit codes.

/// The requested operation completed successfully.
pub const OK: i32 = 0;
/// The operation ran but reported a failure (e.g. an upload task failed).
pub const RUNTIME_ERROR: i32 = 1;
/// Bad arguments, missing config, or a malformed package.
pub const CONFIG_ERROR: i32 = 2;
