//! Scheduler errors

use atomex_core::{AtomId, AtomStatus, TransitionError};

/// Graph construction and wave tracking errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    /// Kahn's algorithm could not drain the graph
    #[error("dependency cycle among {remaining} atoms")]
    CycleDetected {
        /// Atoms never reaching in-degree zero
        remaining: usize,
    },

    /// Edge references an atom outside the graph
    #[error("edge references unknown atom {0}")]
    DanglingEdge(AtomId),

    /// Atom not tracked
    #[error("unknown atom {0}")]
    UnknownAtom(AtomId),

    /// Wave number out of range
    #[error("unknown wave {0}")]
    UnknownWave(u32),

    /// Predecessor wave still open
    #[error("wave {wave} cannot start: wave {waiting_on} is not terminal")]
    WaveNotReady {
        /// Requested wave
        wave: u32,
        /// First open predecessor
        waiting_on: u32,
    },

    /// Status change rejected by the lifecycle
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Review resolution for an atom that is not held
    #[error("atom {0} is not awaiting review")]
    NotHeld(AtomId),

    /// Worker reported an outcome the tracker cannot accept
    #[error("atom {atom} reported {status}, expected a terminal outcome of a running atom")]
    InvalidOutcome {
        /// Atom
        atom: AtomId,
        /// Reported status
        status: AtomStatus,
    },

    /// Edit resolution without replacement code
    #[error("edit resolution requires edited code")]
    MissingEditedCode,
}
