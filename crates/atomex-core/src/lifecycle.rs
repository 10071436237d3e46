//! Atom status transition function
//!
//! Every status change in the engine goes through [`next_status`]; anything
//! not listed in [`allowed_events`] is rejected.

use crate::error::TransitionError;
use crate::types::{AtomId, AtomStatus};
use serde::{Deserialize, Serialize};

/// Something that happens to an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomEvent {
    /// Its wave was prepared and every dependency is satisfied
    Prepare,
    /// Handed to a worker
    Dispatch,
    /// Attempt failed, another will follow
    Retry,
    /// Validation accepted the result (possibly held for review)
    Accept,
    /// Attempts exhausted
    Exhaust,
    /// A dependency is permanently unsuccessful
    Block,
    /// Masterplan cancelled before dispatch
    Cancel,
    /// Reviewer approved
    Approve,
    /// Reviewer replaced the code
    Edit,
    /// Reviewer requested regeneration
    Regenerate,
    /// Reviewer skipped the atom
    Skip,
}

impl AtomEvent {
    /// Resulting status, independent of the source status
    #[must_use]
    pub fn target(self) -> AtomStatus {
        match self {
            AtomEvent::Prepare => AtomStatus::Ready,
            AtomEvent::Dispatch | AtomEvent::Retry => AtomStatus::Running,
            AtomEvent::Accept | AtomEvent::Approve | AtomEvent::Edit => AtomStatus::Completed,
            AtomEvent::Exhaust => AtomStatus::Failed,
            AtomEvent::Block => AtomStatus::Blocked,
            AtomEvent::Cancel | AtomEvent::Skip => AtomStatus::Skipped,
            AtomEvent::Regenerate => AtomStatus::Pending,
        }
    }
}

/// Events accepted in a status
#[must_use]
pub fn allowed_events(from: AtomStatus) -> &'static [AtomEvent] {
    use AtomEvent::*;
    match from {
        AtomStatus::Pending => &[Prepare, Block, Cancel],
        AtomStatus::Ready => &[Dispatch, Block, Cancel],
        AtomStatus::Running => &[Retry, Accept, Exhaust],
        AtomStatus::Completed | AtomStatus::Failed => &[Approve, Edit, Regenerate, Skip],
        AtomStatus::Blocked | AtomStatus::Skipped => &[],
    }
}

/// Apply an event, rejecting illegal transitions
pub fn next_status(atom: AtomId, from: AtomStatus, event: AtomEvent) -> Result<AtomStatus, TransitionError> {
    if allowed_events(from).contains(&event) {
        Ok(event.target())
    } else {
        Err(TransitionError {
            atom,
            from,
            to: event.target(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let atom = AtomId::new();
        let mut status = AtomStatus::Pending;
        for event in [AtomEvent::Prepare, AtomEvent::Dispatch, AtomEvent::Retry, AtomEvent::Accept] {
            status = next_status(atom, status, event).unwrap();
        }
        assert_eq!(status, AtomStatus::Completed);
    }

    #[test]
    fn running_atoms_cannot_be_redispatched_or_cancelled() {
        let atom = AtomId::new();
        assert!(next_status(atom, AtomStatus::Running, AtomEvent::Dispatch).is_err());
        assert!(next_status(atom, AtomStatus::Running, AtomEvent::Cancel).is_err());
    }

    #[test]
    fn review_reopens_failed_atoms() {
        let atom = AtomId::new();
        assert_eq!(
            next_status(atom, AtomStatus::Failed, AtomEvent::Regenerate).unwrap(),
            AtomStatus::Pending
        );
        assert_eq!(
            next_status(atom, AtomStatus::Completed, AtomEvent::Skip).unwrap(),
            AtomStatus::Skipped
        );
    }

    #[test]
    fn blocked_and_skipped_are_final() {
        for status in [AtomStatus::Blocked, AtomStatus::Skipped] {
            assert!(allowed_events(status).is_empty());
        }
    }
}
