//! Stable exit codes for autobuild CLI commands.

/// Command succeeded, or the build loop reached a fixpoint.
pub const OK: i32 = 0;
/// Invalid config, unknown approval id, executor failure or other errors.
pub const INVALID: i32 = 1;
/// `autobuild run` hit its iteration ceiling with gaps remaining.
pub const INCOMPLETE: i32 = 2;
