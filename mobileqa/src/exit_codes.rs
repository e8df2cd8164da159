//! Stable exit codes for the CLI.

/// Every test passed, or the input checked clean.
pub const OK: i32 = 0;
/// Invalid suite/config/action input, or a runner error.
pub const INVALID: i32 = 1;
/// At least one test ended with a failing verdict.
pub const FAILED: i32 = 2;
