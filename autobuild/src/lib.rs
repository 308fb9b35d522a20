//! Self-building coordinator.
//!
//! A reconciliation loop compares a declarative capability manifest against
//! the project on disk, dispatches generation work for every gap and records
//! its progress in a crash-safe state file. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, phase parsing,
//!   path rules, context merging). No I/O.
//! - **[`io`]**: Side-effecting adapters (state and approval files, child
//!   processes, HTTP, the guarded write path).
//!
//! [`dispatch`] and [`build_loop`] compose the two. Every collaborator is
//! constructed by the caller and passed in by reference; there is no global
//! state.

pub mod build_loop;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
