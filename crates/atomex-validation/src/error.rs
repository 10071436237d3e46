//! Validation crate errors

use atomex_core::{GuardConstraint, ReviewId, ReviewStatus};

/// Guard injection failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepairError {
    /// No method signature to anchor the guard to
    #[error("no method signature found in generated code")]
    NoSignature,

    /// Custom constraints are never auto-repaired
    #[error("manual review required: {0}")]
    ManualOnly(GuardConstraint),

    /// Constraint carries nothing to enforce
    #[error("constraint cannot be rendered: {0}")]
    Unrenderable(GuardConstraint),
}

impl RepairError {
    /// Needs a human rather than another attempt
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::ManualOnly(_))
    }
}

/// Review queue failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReviewError {
    /// Unknown entry
    #[error("review entry not found: {0}")]
    NotFound(ReviewId),

    /// Entry already resolved
    #[error("review entry {id} is {status:?}, not open")]
    NotOpen {
        /// Entry
        id: ReviewId,
        /// Current status
        status: ReviewStatus,
    },

    /// Another reviewer holds the entry
    #[error("review entry {id} already claimed by {assignee}")]
    AlreadyClaimed {
        /// Entry
        id: ReviewId,
        /// Current assignee
        assignee: String,
    },

    /// EDIT without replacement code
    #[error("edit resolution requires edited code")]
    MissingEditedCode,
}
