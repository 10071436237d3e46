//! Core types for the engine
//!
//! - Identifiers
//! - Atomic specs and guard constraints
//! - Atomic units and their status
//! - Graph, edge and wave records
//! - Validation results and retry history
//! - Review queue entries

pub mod atom;
pub mod graph;
pub mod ids;
pub mod masterplan;
pub mod review;
pub mod spec;
pub mod validation;

pub use atom::{AtomStatus, AtomicUnit};
pub use graph::{AtomDependency, DependencyGraphRecord, DependencyType, ExecutionWave, WaveStatus};
pub use ids::{AtomId, GraphId, MasterplanId, ReviewId, SpecId, ValidationResultId, WaveId};
pub use masterplan::{Masterplan, MasterplanState};
pub use review::{HumanReviewQueueEntry, ReviewResolution, ReviewStatus};
pub use spec::{AtomicSpec, ConstraintClass, GuardConstraint, Language, TestCase, TestPriority};
pub use validation::{
    AtomRetryHistory, ErrorAnalysis, ErrorCategory, IssueCode, TestCategory, ValidationIssue,
    ValidationLevel, ValidationResult,
};
