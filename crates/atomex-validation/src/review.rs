//! Human review queue

use crate::error::ReviewError;
use atomex_core::{AtomId, HumanReviewQueueEntry, MasterplanId, ReviewId, ReviewResolution, ReviewStatus};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Default)]
struct Inner {
    entries: IndexMap<ReviewId, HumanReviewQueueEntry>,
    open_by_atom: HashMap<AtomId, ReviewId>,
}

/// Escalated atoms awaiting a reviewer
///
/// Holds at most one open entry per atom.
#[derive(Debug, Default)]
pub struct HumanReviewQueue {
    inner: RwLock<Inner>,
}

impl HumanReviewQueue {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries
    #[must_use]
    pub fn restore(entries: impl IntoIterator<Item = HumanReviewQueueEntry>) -> Self {
        let queue = Self::new();
        {
            let mut inner = queue.inner.write();
            for entry in entries {
                if entry.status.is_open() {
                    inner.open_by_atom.insert(entry.atom_id, entry.id);
                }
                inner.entries.insert(entry.id, entry);
            }
        }
        queue
    }

    /// Add an entry; returns the existing open entry for the atom instead,
    /// with `false`, when there is one
    pub fn escalate(&self, entry: HumanReviewQueueEntry) -> (HumanReviewQueueEntry, bool) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner
            .open_by_atom
            .get(&entry.atom_id)
            .and_then(|id| inner.entries.get(id))
        {
            return (existing.clone(), false);
        }
        info!(
            atom_id = %entry.atom_id,
            review_id = %entry.id,
            priority = entry.priority,
            manual_only = entry.manual_only,
            reason = %entry.reason,
            "Escalated atom to human review"
        );
        metrics::counter!("atomex_reviews_escalated_total").increment(1);
        inner.open_by_atom.insert(entry.atom_id, entry.id);
        inner.entries.insert(entry.id, entry.clone());
        (entry, true)
    }

    /// Entry by id
    #[must_use]
    pub fn get(&self, id: ReviewId) -> Option<HumanReviewQueueEntry> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// Open entry for an atom
    #[must_use]
    pub fn open_for(&self, atom: AtomId) -> Option<HumanReviewQueueEntry> {
        let inner = self.inner.read();
        inner
            .open_by_atom
            .get(&atom)
            .and_then(|id| inner.entries.get(id))
            .cloned()
    }

    /// Pending entries, most urgent first, then oldest first
    #[must_use]
    pub fn pending(&self, masterplan: Option<MasterplanId>) -> Vec<HumanReviewQueueEntry> {
        let inner = self.inner.read();
        let mut pending: Vec<HumanReviewQueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.status == ReviewStatus::Pending)
            .filter(|e| masterplan.map_or(true, |m| e.masterplan_id == m))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        pending
    }

    /// Every entry for a masterplan, in insertion order
    #[must_use]
    pub fn entries(&self, masterplan: MasterplanId) -> Vec<HumanReviewQueueEntry> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.masterplan_id == masterplan)
            .cloned()
            .collect()
    }

    /// Take an entry into review
    pub fn claim(&self, id: ReviewId, assignee: impl Into<String>) -> Result<HumanReviewQueueEntry, ReviewError> {
        let assignee = assignee.into();
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(&id).ok_or(ReviewError::NotFound(id))?;
        match entry.status {
            ReviewStatus::Pending => {}
            ReviewStatus::InReview if entry.assignee.as_deref() == Some(assignee.as_str()) => {
                return Ok(entry.clone());
            }
            ReviewStatus::InReview => {
                return Err(ReviewError::AlreadyClaimed {
                    id,
                    assignee: entry.assignee.clone().unwrap_or_default(),
                })
            }
            status => return Err(ReviewError::NotOpen { id, status }),
        }
        entry.status = ReviewStatus::InReview;
        entry.assignee = Some(assignee);
        Ok(entry.clone())
    }

    /// Close an entry with a reviewer decision
    pub fn resolve(
        &self,
        id: ReviewId,
        resolution: ReviewResolution,
        edited_code: Option<String>,
        feedback: Option<String>,
    ) -> Result<HumanReviewQueueEntry, ReviewError> {
        if resolution == ReviewResolution::Edit && edited_code.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(ReviewError::MissingEditedCode);
        }
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(&id).ok_or(ReviewError::NotFound(id))?;
        if !entry.status.is_open() {
            return Err(ReviewError::NotOpen {
                id,
                status: entry.status,
            });
        }
        entry.status = resolution.resulting_status();
        entry.resolution = Some(resolution);
        entry.edited_code = edited_code;
        entry.reviewer_feedback = feedback;
        entry.resolved_at = Some(Utc::now());
        let resolved = entry.clone();
        inner.open_by_atom.remove(&resolved.atom_id);
        info!(
            review_id = %id,
            atom_id = %resolved.atom_id,
            resolution = ?resolution,
            "Review resolved"
        );
        Ok(resolved)
    }

    /// Open entries
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.read().open_by_atom.len()
    }
}
