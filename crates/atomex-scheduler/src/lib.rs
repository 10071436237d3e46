//! # Atomex Scheduler
//!
//! Turns a prepared spec batch into a dependency graph and executes its
//! schedule:
//! - [`DependencyGraph`]: arena of atoms, normalized edges, Kahn wave partition
//! - [`WaveTracker`]: runtime atom and wave state, block propagation,
//!   cancellation and review resolution

pub mod error;
pub mod graph;
pub mod tracker;

pub use error::SchedulerError;
pub use graph::DependencyGraph;
pub use tracker::{StatusCounts, WaveTracker};
