//! Runtime view of the schedule
//!
//! The tracker owns the canonical copy of every atom between dispatches.
//! Workers receive a snapshot on dispatch and hand the final state back
//! through [`WaveTracker::record_outcome`]; a running atom is never handed
//! out twice.

use crate::error::SchedulerError;
use crate::graph::DependencyGraph;
use atomex_core::{
    next_status, AtomEvent, AtomId, AtomStatus, AtomicUnit, ExecutionWave, ReviewResolution,
    TransitionLog, WaveStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending atoms
    pub pending: usize,
    /// Ready atoms
    pub ready: usize,
    /// Running atoms
    pub running: usize,
    /// Completed atoms
    pub completed: usize,
    /// Failed atoms
    pub failed: usize,
    /// Blocked atoms
    pub blocked: usize,
    /// Skipped atoms
    pub skipped: usize,
    /// Completed or failed atoms waiting on a reviewer
    pub held: usize,
}

impl StatusCounts {
    /// Total atoms counted
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.completed + self.failed + self.blocked + self.skipped
    }
}

/// Tracks atom and wave state for one graph
#[derive(Debug)]
pub struct WaveTracker {
    graph: Arc<DependencyGraph>,
    atoms: HashMap<AtomId, AtomicUnit>,
    waves: Vec<ExecutionWave>,
    audit: Arc<TransitionLog>,
}

impl WaveTracker {
    /// Track `atoms` scheduled by `graph`
    pub fn new(
        graph: Arc<DependencyGraph>,
        atoms: Vec<AtomicUnit>,
        audit: Arc<TransitionLog>,
    ) -> Result<Self, SchedulerError> {
        let mut by_id = HashMap::with_capacity(atoms.len());
        for mut atom in atoms {
            let wave = graph.wave_of(atom.id).ok_or(SchedulerError::UnknownAtom(atom.id))?;
            atom.wave_number = Some(wave);
            by_id.insert(atom.id, atom);
        }
        let waves = graph.execution_waves();
        Ok(Self::restore(graph, by_id, waves, audit))
    }

    /// Resume with previously stored wave rows
    #[must_use]
    pub fn restore(
        graph: Arc<DependencyGraph>,
        atoms: HashMap<AtomId, AtomicUnit>,
        waves: Vec<ExecutionWave>,
        audit: Arc<TransitionLog>,
    ) -> Self {
        let mut this = Self {
            graph,
            atoms,
            waves,
            audit,
        };
        for n in 0..this.waves.len() {
            this.refresh_wave(n as u32);
        }
        this
    }

    /// The scheduled graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Audit trail
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &Arc<TransitionLog> {
        &self.audit
    }

    /// Current state of an atom
    #[must_use]
    pub fn atom(&self, id: AtomId) -> Option<&AtomicUnit> {
        self.atoms.get(&id)
    }

    /// All atoms in wave order
    #[must_use]
    pub fn atoms(&self) -> Vec<&AtomicUnit> {
        self.graph
            .topological_order()
            .into_iter()
            .filter_map(|id| self.atoms.get(&id))
            .collect()
    }

    /// Wave aggregates
    #[inline]
    #[must_use]
    pub fn waves(&self) -> &[ExecutionWave] {
        &self.waves
    }

    /// One wave's aggregate
    pub fn wave(&self, number: u32) -> Result<&ExecutionWave, SchedulerError> {
        self.waves
            .get(number as usize)
            .ok_or(SchedulerError::UnknownWave(number))
    }

    /// Status counts across the graph
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for atom in self.atoms.values() {
            match atom.status {
                AtomStatus::Pending => counts.pending += 1,
                AtomStatus::Ready => counts.ready += 1,
                AtomStatus::Running => counts.running += 1,
                AtomStatus::Completed => counts.completed += 1,
                AtomStatus::Failed => counts.failed += 1,
                AtomStatus::Blocked => counts.blocked += 1,
                AtomStatus::Skipped => counts.skipped += 1,
            }
            if atom.needs_review {
                counts.held += 1;
            }
        }
        counts
    }

    /// Atoms waiting on a reviewer
    #[must_use]
    pub fn held_atoms(&self) -> Vec<AtomId> {
        self.atoms().into_iter().filter(|a| a.needs_review).map(|a| a.id).collect()
    }

    /// First wave that is not terminal
    #[must_use]
    pub fn next_open_wave(&self) -> Option<u32> {
        self.waves
            .iter()
            .find(|w| !w.status.is_terminal())
            .map(|w| w.wave_number)
    }

    /// Every wave terminal
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.next_open_wave().is_none()
    }

    /// Whether every predecessor wave is terminal
    pub fn can_start(&self, wave: u32) -> Result<bool, SchedulerError> {
        self.wave(wave)?;
        Ok(self.first_open_before(wave).is_none())
    }

    fn first_open_before(&self, wave: u32) -> Option<u32> {
        self.waves[..wave as usize]
            .iter()
            .find(|w| !w.status.is_terminal())
            .map(|w| w.wave_number)
    }

    /// Move a wave's pending atoms to READY, blocking those with a
    /// permanently unsuccessful prerequisite. Returns atoms ready to dispatch.
    pub fn prepare_wave(&mut self, wave: u32) -> Result<Vec<AtomId>, SchedulerError> {
        let members = self.wave(wave)?.atom_ids.clone();
        if let Some(waiting_on) = self.first_open_before(wave) {
            return Err(SchedulerError::WaveNotReady { wave, waiting_on });
        }

        let mut ready = Vec::new();
        let mut blocked = 0usize;
        for id in &members {
            let status = self.status_of(*id)?;
            match status {
                AtomStatus::Pending => {
                    if let Some(cause) = self.unsuccessful_prerequisite(*id) {
                        self.apply(*id, AtomEvent::Block, &format!("prerequisite {cause} unsuccessful"))?;
                        blocked += 1;
                    } else {
                        self.apply(*id, AtomEvent::Prepare, "wave prepared")?;
                        ready.push(*id);
                    }
                }
                AtomStatus::Ready => ready.push(*id),
                _ => {}
            }
        }

        let row = &mut self.waves[wave as usize];
        if row.started_at.is_none() {
            row.started_at = Some(Utc::now());
        }
        self.refresh_wave(wave);
        info!(wave, ready = ready.len(), blocked, "Wave prepared");
        Ok(ready)
    }

    /// Ready atoms of a wave, in sequence order
    pub fn ready_in_wave(&self, wave: u32) -> Result<Vec<AtomId>, SchedulerError> {
        Ok(self
            .wave(wave)?
            .atom_ids
            .iter()
            .filter(|id| self.atoms.get(id).is_some_and(|a| a.status == AtomStatus::Ready))
            .copied()
            .collect())
    }

    /// READY -> RUNNING; returns the worker's snapshot
    pub fn take_for_dispatch(&mut self, id: AtomId) -> Result<AtomicUnit, SchedulerError> {
        self.apply(id, AtomEvent::Dispatch, "dispatched")?;
        let atom = self.atoms.get_mut(&id).ok_or(SchedulerError::UnknownAtom(id))?;
        atom.started_at = Some(Utc::now());
        let snapshot = atom.clone();
        if let Some(wave) = snapshot.wave_number {
            self.refresh_wave(wave);
        }
        Ok(snapshot)
    }

    /// Accept a worker's final state for a running atom
    ///
    /// Failed atoms that are not held block their dependents immediately;
    /// held failures wait for the reviewer.
    pub fn record_outcome(&mut self, unit: AtomicUnit, reason: &str) -> Result<(), SchedulerError> {
        let current = self.status_of(unit.id)?;
        let event = match unit.status {
            AtomStatus::Completed => AtomEvent::Accept,
            AtomStatus::Failed => AtomEvent::Exhaust,
            status => {
                return Err(SchedulerError::InvalidOutcome { atom: unit.id, status });
            }
        };
        next_status(unit.id, current, event)?;
        self.audit.record(unit.id, current, unit.status, reason);

        let id = unit.id;
        let failed_unheld = unit.status == AtomStatus::Failed && !unit.needs_review;
        let wave = unit.wave_number;
        self.atoms.insert(id, unit);
        if failed_unheld {
            self.propagate_block(id);
        }
        if let Some(wave) = wave {
            self.refresh_wave(wave);
        }
        Ok(())
    }

    /// Apply a reviewer's decision to a held atom
    pub fn resolve_review(
        &mut self,
        id: AtomId,
        resolution: ReviewResolution,
        edited_code: Option<String>,
    ) -> Result<AtomStatus, SchedulerError> {
        let atom = self.atoms.get(&id).ok_or(SchedulerError::UnknownAtom(id))?;
        if !atom.needs_review {
            return Err(SchedulerError::NotHeld(id));
        }
        if resolution == ReviewResolution::Edit && edited_code.is_none() {
            return Err(SchedulerError::MissingEditedCode);
        }
        let event = match resolution {
            ReviewResolution::Approve => AtomEvent::Approve,
            ReviewResolution::Edit => AtomEvent::Edit,
            ReviewResolution::Regenerate => AtomEvent::Regenerate,
            ReviewResolution::Skip => AtomEvent::Skip,
        };
        let status = self.apply(id, event, &format!("review resolved: {resolution:?}"))?;

        let atom = self.atoms.get_mut(&id).ok_or(SchedulerError::UnknownAtom(id))?;
        atom.needs_review = false;
        atom.review_priority = None;
        match resolution {
            ReviewResolution::Approve => {
                atom.completed_at.get_or_insert_with(Utc::now);
            }
            ReviewResolution::Edit => {
                if let Some(code) = edited_code {
                    atom.loc = code.lines().filter(|l| !l.trim().is_empty()).count() as u32;
                    atom.code = Some(code);
                }
                atom.completed_at = Some(Utc::now());
            }
            ReviewResolution::Regenerate => {
                atom.code = None;
                atom.attempts = 0;
                atom.confidence = 0.0;
                atom.started_at = None;
                atom.completed_at = None;
            }
            ReviewResolution::Skip => {}
        }
        let wave = atom.wave_number;
        if resolution == ReviewResolution::Skip {
            self.propagate_block(id);
        }
        if let Some(wave) = wave {
            self.refresh_wave(wave);
        }
        Ok(status)
    }

    /// Skip every atom not yet dispatched; returns how many were skipped
    pub fn cancel(&mut self) -> usize {
        let targets: Vec<AtomId> = self
            .atoms
            .values()
            .filter(|a| a.status.is_dispatchable())
            .map(|a| a.id)
            .collect();
        for id in &targets {
            if let Err(e) = self.apply(*id, AtomEvent::Cancel, "masterplan cancelled") {
                warn!(atom = %id, error = %e, "Cancel skipped atom");
            }
        }
        for n in 0..self.waves.len() {
            self.refresh_wave(n as u32);
        }
        info!(skipped = targets.len(), "Masterplan cancelled");
        targets.len()
    }

    /// Mark every not-yet-dispatched transitive dependent BLOCKED
    fn propagate_block(&mut self, root: AtomId) {
        let mut touched = Vec::new();
        for id in self.graph.transitive_dependents(root) {
            let dispatchable = self.atoms.get(&id).is_some_and(|a| a.status.is_dispatchable());
            if dispatchable && self.apply(id, AtomEvent::Block, &format!("prerequisite {root} unsuccessful")).is_ok() {
                touched.push(id);
            }
        }
        debug!(root = %root, blocked = touched.len(), "Block propagated");
        let mut waves: Vec<u32> = touched
            .iter()
            .filter_map(|id| self.atoms.get(id).and_then(|a| a.wave_number))
            .collect();
        waves.sort_unstable();
        waves.dedup();
        for wave in waves {
            self.refresh_wave(wave);
        }
    }

    fn unsuccessful_prerequisite(&self, id: AtomId) -> Option<AtomId> {
        self.graph.prerequisites(id).find(|p| {
            self.atoms.get(p).is_some_and(|a| {
                matches!(a.status, AtomStatus::Blocked | AtomStatus::Skipped)
                    || (a.status == AtomStatus::Failed && !a.needs_review)
            })
        })
    }

    fn status_of(&self, id: AtomId) -> Result<AtomStatus, SchedulerError> {
        self.atoms
            .get(&id)
            .map(|a| a.status)
            .ok_or(SchedulerError::UnknownAtom(id))
    }

    fn apply(&mut self, id: AtomId, event: AtomEvent, reason: &str) -> Result<AtomStatus, SchedulerError> {
        let atom = self.atoms.get_mut(&id).ok_or(SchedulerError::UnknownAtom(id))?;
        let from = atom.status;
        let to = next_status(id, from, event)?;
        atom.status = to;
        self.audit.record(id, from, to, reason);
        debug!(atom = %id, %from, %to, reason, "Atom transition");
        Ok(to)
    }

    /// Recompute a wave's counts and status from its members
    fn refresh_wave(&mut self, wave: u32) {
        let Some(row) = self.waves.get(wave as usize) else { return };
        let members: Vec<&AtomicUnit> = row.atom_ids.iter().filter_map(|id| self.atoms.get(id)).collect();

        let completed = members.iter().filter(|a| a.status == AtomStatus::Completed).count();
        let failed = members
            .iter()
            .filter(|a| matches!(a.status, AtomStatus::Failed | AtomStatus::Blocked | AtomStatus::Skipped))
            .count();
        let open = members.iter().any(|a| !a.status.is_terminal() || a.needs_review);
        let started = row.started_at.is_some()
            || members.iter().any(|a| a.status != AtomStatus::Pending);

        let status = if !started {
            WaveStatus::Pending
        } else if open {
            WaveStatus::Running
        } else if completed == members.len() {
            WaveStatus::Completed
        } else if completed == 0 {
            WaveStatus::Failed
        } else {
            WaveStatus::Partial
        };

        let row = &mut self.waves[wave as usize];
        let previous = row.status;
        row.completed_atoms = completed;
        row.failed_atoms = failed;
        row.status = status;
        if started && row.started_at.is_none() {
            row.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            if row.completed_at.is_none() {
                let now = Utc::now();
                row.completed_at = Some(now);
                row.duration_ms = row
                    .started_at
                    .map(|s| u64::try_from((now - s).num_milliseconds()).unwrap_or(0));
            }
        } else {
            row.completed_at = None;
            row.duration_ms = None;
        }
        if previous != status {
            info!(wave, from = ?previous, to = ?status, completed, failed, "Wave status changed");
        }
    }
}
