//! Stable exit codes for the CLI.

/// The run completed (whatever the verification verdict) or `check` passed.
pub const OK: i32 = 0;
/// A precondition failed: credential, task file, working directory or config.
pub const PRECONDITION: i32 = 1;
/// The output directory could not be written (logs or end-of-run artifacts).
pub const ARTIFACT_WRITE: i32 = 2;
