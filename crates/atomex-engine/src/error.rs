//! Engine errors

use atomex_atomizer::AtomizerError;
use atomex_concurrency::ConcurrencyError;
use atomex_core::{AtomId, ConfigError, MasterplanId, ReviewId, StoreError};
use atomex_scheduler::SchedulerError;
use atomex_validation::ReviewError;

/// Everything the engine surface can return
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration or precision policy out of bounds
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Specs or their graph rejected before execution
    #[error(transparent)]
    Atomizer(#[from] AtomizerError),

    /// Graph construction or wave tracking failure
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Queue full, limit exceeded or override out of range
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Review queue rejected the request
    #[error(transparent)]
    Review(#[from] ReviewError),

    /// Masterplan neither loaded nor stored
    #[error("unknown masterplan {0}")]
    UnknownMasterplan(MasterplanId),

    /// Atom not part of any loaded masterplan
    #[error("unknown atom {0}")]
    UnknownAtom(AtomId),

    /// Review entry not part of any loaded masterplan
    #[error("unknown review entry {0}")]
    UnknownReview(ReviewId),

    /// A run for this masterplan is already in progress
    #[error("masterplan {0} is already running")]
    AlreadyRunning(MasterplanId),

    /// Cancelled masterplans cannot run again
    #[error("masterplan {0} was cancelled")]
    Cancelled(MasterplanId),

    /// Stored rows do not describe a consistent masterplan
    #[error("masterplan {id} is inconsistent: {reason}")]
    Inconsistent {
        /// Masterplan
        id: MasterplanId,
        /// What is missing or contradictory
        reason: String,
    },
}

impl EngineError {
    /// Check if the caller may retry after backing off
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Concurrency(e) => e.is_retryable(),
            Self::Store(e) => e.is_retryable(),
            Self::AlreadyRunning(_) => true,
            _ => false,
        }
    }

    /// Check if the batch was rejected for a dependency cycle
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Atomizer(e) if e.has_cycle())
    }
}

/// Engine result alias
pub type Result<T> = std::result::Result<T, EngineError>;
