//! Coordinator logic with no I/O.
//!
//! Nothing here touches the filesystem, the network or child processes. The
//! only ambient inputs are the clock and the RNG in [`types`] constructors
//! (`BuildStep::running`, `generate_id`, default timestamps); everything else
//! is a deterministic function of its arguments.

pub mod capabilities;
pub mod classifier;
pub mod context;
pub mod hot_set;
pub mod phases;
pub mod protection;
pub mod research;
pub mod types;
