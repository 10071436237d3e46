//! # Atomex Engine
//!
//! Runs masterplans of atomic specs to completion:
//! - Planning: atomize specs, build the dependency graph and its waves
//! - Execution: wave-by-wave dispatch under adaptive concurrency limits
//! - Validation with retries, escalation and human review resolution
//! - Resume from the execution store after a restart
//! - Seeded end-to-end simulation
//!
//! ```no_run
//! use atomex_core::{AtomicSpec, EngineConfig, GenerationBackend};
//! use atomex_engine::ExecutionEngine;
//! use std::sync::Arc;
//!
//! # async fn demo(backend: Arc<dyn GenerationBackend>, specs: Vec<AtomicSpec>) -> atomex_engine::Result<()> {
//! let engine = ExecutionEngine::new(EngineConfig::default(), backend)?;
//! let plan = engine.plan("checkout", &specs).await?;
//! let report = engine.run(plan.masterplan_id).await?;
//! println!("{:.3}", report.precision.composite);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod progress;
pub mod simulation;
mod worker;

pub use engine::ExecutionEngine;
pub use error::{EngineError, Result};
pub use progress::{AtomDetail, MasterplanProgress, PlanSummary, RunReport};
pub use simulation::{
    run_simulator, run_simulator_with, simulation_engine_config, synthetic_specs, SimulatedBackend,
    SimulatedMetrics, SimulatorConfig, SimulatorReport, SimulatorStats, Violation,
};
