//! Read models returned by the engine

use atomex_atomizer::SpecValidation;
use atomex_concurrency::ConcurrencyStatus;
use atomex_core::{
    AtomRetryHistory, AtomicUnit, GraphId, HumanReviewQueueEntry, MasterplanId, MasterplanState, StatusTransition,
    ValidationResult,
};
use atomex_scheduler::StatusCounts;
use atomex_validation::PrecisionScore;
use serde::Serialize;

/// Result of planning a masterplan
#[derive(Debug, Clone)]
pub struct PlanSummary {
    /// New masterplan
    pub masterplan_id: MasterplanId,
    /// Its dependency graph
    pub graph_id: GraphId,
    /// Atoms planned
    pub total_atoms: usize,
    /// Waves planned
    pub total_waves: usize,
    /// Widest wave
    pub max_parallelism: usize,
    /// Specs dropped by the atomizer, with their violated rules
    pub rejected: Vec<SpecValidation>,
}

/// Masterplan-level status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterplanProgress {
    /// Masterplan id
    pub masterplan_id: MasterplanId,
    /// Display name
    pub name: String,
    /// Run state
    pub state: MasterplanState,
    /// Atoms per status
    pub counts: StatusCounts,
    /// Atoms in the masterplan
    pub total_atoms: usize,
    /// Waves in the masterplan
    pub total_waves: usize,
    /// First wave that is not terminal
    pub current_wave: Option<u32>,
    /// Terminal, unheld atoms over all atoms
    pub percent_complete: f64,
    /// Open review entries
    pub pending_reviews: usize,
    /// Concurrency limit and load
    pub concurrency: ConcurrencyStatus,
}

/// Outcome of one `run` or `resume` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// State when the call returned
    pub progress: MasterplanProgress,
    /// Composite precision so far
    pub precision: PrecisionScore,
}

impl RunReport {
    /// Every wave terminal
    #[must_use]
    pub fn finished(&self) -> bool {
        self.progress.state == MasterplanState::Finished
    }

    /// Stopped on held atoms
    #[must_use]
    pub fn awaiting_review(&self) -> bool {
        self.progress.state == MasterplanState::AwaitingReview
    }
}

/// Everything known about one atom
#[derive(Debug, Clone)]
pub struct AtomDetail {
    /// Current row
    pub atom: AtomicUnit,
    /// Every validation result, oldest first
    pub validations: Vec<ValidationResult>,
    /// One row per retry attempt
    pub retries: Vec<AtomRetryHistory>,
    /// Latest review entry
    pub review: Option<HumanReviewQueueEntry>,
    /// Audited status changes
    pub transitions: Vec<StatusTransition>,
}
