//! Hash-chained audit trail of atom status transitions

use crate::error::AuditError;
use crate::types::{AtomId, AtomStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One recorded status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Atom that changed
    pub atom_id: AtomId,
    /// Status before
    pub from: AtomStatus,
    /// Status after
    pub to: AtomStatus,
    /// Why the change happened
    pub reason: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry, zeroes for the first
    #[serde(with = "hex_bytes")]
    pub prev_hash: [u8; 32],
    /// SHA-256 over this entry and `prev_hash`
    #[serde(with = "hex_bytes")]
    pub hash: [u8; 32],
}

impl StatusTransition {
    /// Hash rendered as lowercase hex
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Append-only transition log
#[derive(Debug, Default)]
pub struct TransitionLog {
    inner: Mutex<Vec<StatusTransition>>,
}

impl TransitionLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transition, chaining it to the previous entry
    pub fn record(&self, atom_id: AtomId, from: AtomStatus, to: AtomStatus, reason: impl Into<String>) {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |t| t.hash);
        let mut entry = StatusTransition {
            atom_id,
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        guard.push(entry);
    }

    /// Snapshot of all entries
    #[must_use]
    pub fn entries(&self) -> Vec<StatusTransition> {
        self.inner.lock().clone()
    }

    /// Entries for one atom, oldest first
    #[must_use]
    pub fn history(&self, atom_id: AtomId) -> Vec<StatusTransition> {
        self.inner
            .lock()
            .iter()
            .filter(|t| t.atom_id == atom_id)
            .cloned()
            .collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// No entries yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Recompute the chain and report the first broken link
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        verify_chain(&guard)
    }
}

/// Verify an exported chain
pub fn verify_chain(entries: &[StatusTransition]) -> Result<(), AuditError> {
    let mut prev = [0u8; 32];
    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
            return Err(AuditError::IntegrityViolation { index });
        }
        prev = entry.hash;
    }
    Ok(())
}

fn compute_hash(entry: &StatusTransition) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.atom_id.0.to_bytes());
    hasher.update(entry.from.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(entry.to.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(entry.reason.as_bytes());
    hasher.update([0]);
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(text).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_verifies() {
        let log = TransitionLog::new();
        let atom = AtomId::new();
        log.record(atom, AtomStatus::Pending, AtomStatus::Ready, "wave prepared");
        log.record(atom, AtomStatus::Ready, AtomStatus::Running, "dispatched");
        log.verify_integrity().unwrap();
        assert_eq!(log.history(atom).len(), 2);
        let entries = log.entries();
        assert_eq!(entries[1].prev_hash, entries[0].hash);
    }

    #[test]
    fn tampering_is_detected() {
        let log = TransitionLog::new();
        let atom = AtomId::new();
        log.record(atom, AtomStatus::Pending, AtomStatus::Ready, "wave prepared");
        log.record(atom, AtomStatus::Ready, AtomStatus::Running, "dispatched");
        let mut entries = log.entries();
        entries[0].to = AtomStatus::Completed;
        assert!(matches!(
            verify_chain(&entries),
            Err(AuditError::IntegrityViolation { index: 0 })
        ));
    }

    #[test]
    fn serde_keeps_hashes() {
        let log = TransitionLog::new();
        log.record(AtomId::new(), AtomStatus::Pending, AtomStatus::Skipped, "cancelled");
        let json = serde_json::to_string(&log.entries()).unwrap();
        let back: Vec<StatusTransition> = serde_json::from_str(&json).unwrap();
        verify_chain(&back).unwrap();
    }
}
