//! Adaptive concurrency control for atom dispatch
//!
//! - [`MetricsMonitor`]: samples system load into a bounded history
//! - [`LimitAdjuster`]: AIMD limit driven by health verdicts
//! - [`DispatchGate`]: admits dispatches below the current limit
//! - [`BackpressureQueue`]: bounded FIFO that rejects when full
//! - [`ThunderingHerdPrevention`]: staggers bursts into jittered batches
//! - [`ConcurrencyController`]: the periodic control loop

pub mod backpressure;
pub mod controller;
pub mod error;
pub mod gate;
pub mod herd;
pub mod limiter;
pub mod monitor;

pub use backpressure::{BackpressureQueue, QueueFull};
pub use controller::{ConcurrencyController, ConcurrencyStatus, Evaluation};
pub use error::{ConcurrencyError, MetricsUnavailable};
pub use gate::{DispatchGate, DispatchPermit};
pub use herd::{DispatchSlot, ThunderingHerdPrevention};
pub use limiter::{Adjustment, LimitAdjuster};
pub use monitor::{HealthReport, IdleMetricsSource, LatencyTrend, MetricsMonitor, MetricsSource, SystemSnapshot};
