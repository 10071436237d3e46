//! Atomic units: the executable form of an accepted spec

use super::ids::{AtomId, MasterplanId, SpecId};
use super::spec::{AtomicSpec, Language};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution status of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomStatus {
    /// Waiting for dependencies
    #[default]
    Pending,
    /// Dependencies satisfied
    Ready,
    /// Dispatched to the backend
    Running,
    /// Generated and validated
    Completed,
    /// Failed after exhausting attempts
    Failed,
    /// A dependency failed permanently
    Blocked,
    /// Skipped by cancellation or review
    Skipped,
}

impl AtomStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [AtomStatus; 7] = [
        AtomStatus::Pending,
        AtomStatus::Ready,
        AtomStatus::Running,
        AtomStatus::Completed,
        AtomStatus::Failed,
        AtomStatus::Blocked,
        AtomStatus::Skipped,
    ];

    /// Terminal unless reopened by retry or review
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AtomStatus::Completed | AtomStatus::Failed | AtomStatus::Blocked | AtomStatus::Skipped
        )
    }

    /// Successful terminal status
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, AtomStatus::Completed)
    }

    /// Can still be picked for dispatch
    #[inline]
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        matches!(self, AtomStatus::Pending | AtomStatus::Ready)
    }
}

impl std::fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AtomStatus::Pending => "PENDING",
            AtomStatus::Ready => "READY",
            AtomStatus::Running => "RUNNING",
            AtomStatus::Completed => "COMPLETED",
            AtomStatus::Failed => "FAILED",
            AtomStatus::Blocked => "BLOCKED",
            AtomStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// An atom inside a masterplan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicUnit {
    /// Atom id
    pub id: AtomId,
    /// Owning masterplan
    pub masterplan_id: MasterplanId,
    /// Spec the atom implements
    pub spec_id: SpecId,
    /// Position within the masterplan
    pub sequence: u32,
    /// Function name
    pub name: String,
    /// What the function does
    pub description: String,
    /// Latest generated code
    pub code: Option<String>,
    /// Target file, when known
    pub file_path: Option<String>,
    /// First line in `file_path`
    pub line_start: Option<u32>,
    /// Last line in `file_path`
    pub line_end: Option<u32>,
    /// Target language
    pub language: Language,
    /// Measured lines of code
    pub loc: u32,
    /// Measured cyclomatic complexity
    pub complexity: f64,
    /// Share of the needed context the spec supplies
    pub context_completeness: f64,
    /// Atomicity score of the latest code
    pub atomicity_score: f64,
    /// Atomicity budget breaches
    pub atomicity_violations: Vec<String>,
    /// Within every atomicity budget
    pub is_atomic: bool,
    /// Lifecycle status
    pub status: AtomStatus,
    /// Assigned wave
    pub wave_number: Option<u32>,
    /// Generation attempts made
    pub attempts: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Confidence in the latest code, 0 to 1
    pub confidence: f64,
    /// Held for a human reviewer
    pub needs_review: bool,
    /// Review urgency, 1 is most urgent
    pub review_priority: Option<u8>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// First dispatch
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal outcome time
    pub completed_at: Option<DateTime<Utc>>,
}

impl AtomicUnit {
    /// Materialize an accepted spec
    #[must_use]
    pub fn from_spec(masterplan_id: MasterplanId, spec: &AtomicSpec, max_attempts: u32) -> Self {
        Self {
            id: AtomId::new(),
            masterplan_id,
            spec_id: spec.id.clone(),
            sequence: spec.sequence,
            name: spec.name.clone(),
            description: spec.description.clone(),
            code: None,
            file_path: spec.target_file.clone(),
            line_start: None,
            line_end: None,
            language: spec.language,
            loc: 0,
            complexity: 0.0,
            context_completeness: context_completeness(spec),
            atomicity_score: 0.0,
            atomicity_violations: Vec::new(),
            is_atomic: false,
            status: AtomStatus::Pending,
            wave_number: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            confidence: 0.0,
            needs_review: false,
            review_priority: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Attempts remain before escalation
    #[inline]
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Completed and not waiting on a reviewer
    #[inline]
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        self.status.is_success() && !self.needs_review
    }
}

/// Fraction of the context a generator needs that the spec actually supplies
fn context_completeness(spec: &AtomicSpec) -> f64 {
    let checks = [
        !spec.description.trim().is_empty(),
        !spec.input_types.is_empty(),
        spec.output_type.is_some(),
        !spec.test_cases.is_empty(),
        !spec.imports.is_empty() || spec.target_loc <= 7,
        !spec.preconditions.is_empty() || !spec.postconditions.is_empty() || !spec.guards.is_empty(),
    ];
    let present = checks.iter().filter(|c| **c).count();
    present as f64 / checks.len() as f64
}
