//! Human review queue entries

use super::ids::{AtomId, MasterplanId, ReviewId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    /// Waiting for a reviewer
    #[default]
    Pending,
    /// Claimed by a reviewer
    InReview,
    /// Accepted as-is
    Approved,
    /// Skipped
    Rejected,
    /// Replaced by reviewer code
    Edited,
    /// Sent back for generation
    Regenerated,
}

impl ReviewStatus {
    /// Still awaiting resolution
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, ReviewStatus::Pending | ReviewStatus::InReview)
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewResolution {
    /// Keep the generated code
    Approve,
    /// Replace the code
    Edit,
    /// Generate again
    Regenerate,
    /// Give up on the atom
    Skip,
}

impl ReviewResolution {
    /// Status the entry ends in
    #[inline]
    #[must_use]
    pub fn resulting_status(self) -> ReviewStatus {
        match self {
            ReviewResolution::Approve => ReviewStatus::Approved,
            ReviewResolution::Edit => ReviewStatus::Edited,
            ReviewResolution::Regenerate => ReviewStatus::Regenerated,
            ReviewResolution::Skip => ReviewStatus::Rejected,
        }
    }
}

/// An atom escalated to a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReviewQueueEntry {
    /// Entry id
    pub id: ReviewId,
    /// Held atom
    pub atom_id: AtomId,
    /// Owning masterplan
    pub masterplan_id: MasterplanId,
    /// Confidence that triggered the escalation
    pub confidence: f64,
    /// Why the atom was escalated
    pub reason: String,
    /// Hints from failure analysis
    pub suggested_fixes: Vec<String>,
    /// 1 is most urgent
    pub priority: u8,
    /// Queue status
    pub status: ReviewStatus,
    /// Reviewer who claimed the entry
    pub assignee: Option<String>,
    /// Free-form reviewer notes
    pub reviewer_feedback: Option<String>,
    /// Decision once resolved
    pub resolution: Option<ReviewResolution>,
    /// Replacement code for an edit
    pub edited_code: Option<String>,
    /// Constraint can never be auto-repaired
    pub manual_only: bool,
    /// Escalation time
    pub created_at: DateTime<Utc>,
    /// Resolution time
    pub resolved_at: Option<DateTime<Utc>>,
}

impl HumanReviewQueueEntry {
    /// New pending entry
    #[must_use]
    pub fn new(
        atom_id: AtomId,
        masterplan_id: MasterplanId,
        confidence: f64,
        priority: u8,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ReviewId::new(),
            atom_id,
            masterplan_id,
            confidence,
            reason: reason.into(),
            suggested_fixes: Vec::new(),
            priority,
            status: ReviewStatus::Pending,
            assignee: None,
            reviewer_feedback: None,
            resolution: None,
            edited_code: None,
            manual_only: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// With suggested fixes
    #[inline]
    #[must_use]
    pub fn with_suggestions(mut self, fixes: Vec<String>) -> Self {
        self.suggested_fixes = fixes;
        self
    }

    /// Mark as manual review required
    #[inline]
    #[must_use]
    pub fn manual_only(mut self) -> Self {
        self.manual_only = true;
        self
    }
}
