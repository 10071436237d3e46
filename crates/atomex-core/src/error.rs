//! Error types for the core crate
//!
//! - Store contract violations
//! - Configuration loading and consistency
//! - Audit trail integrity
//! - Pattern store failures

use crate::types::{AtomId, AtomStatus, GraphId, MasterplanId, ReviewId};
use std::path::PathBuf;

/// Execution store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity missing
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Identifier rendered as text
        id: String,
    },

    /// Edge (from, to) already stored
    #[error("duplicate dependency {from} -> {to}")]
    DuplicateEdge {
        /// Dependent atom
        from: AtomId,
        /// Prerequisite atom
        to: AtomId,
    },

    /// Wave number already used in this graph
    #[error("duplicate wave {wave_number} in graph {graph_id}")]
    DuplicateWave {
        /// Graph
        graph_id: GraphId,
        /// Wave number
        wave_number: u32,
    },

    /// Referenced parent row does not exist
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// Backend unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Not-found for an atom
    #[inline]
    #[must_use]
    pub fn atom_not_found(id: AtomId) -> Self {
        Self::NotFound {
            kind: "atom",
            id: id.to_string(),
        }
    }

    /// Not-found for a masterplan
    #[inline]
    #[must_use]
    pub fn masterplan_not_found(id: MasterplanId) -> Self {
        Self::NotFound {
            kind: "masterplan",
            id: id.to_string(),
        }
    }

    /// Not-found for a graph
    #[inline]
    #[must_use]
    pub fn graph_not_found(id: GraphId) -> Self {
        Self::NotFound {
            kind: "graph",
            id: id.to_string(),
        }
    }

    /// Not-found for a review entry
    #[inline]
    #[must_use]
    pub fn review_not_found(id: ReviewId) -> Self {
        Self::NotFound {
            kind: "review",
            id: id.to_string(),
        }
    }

    /// Check if the operation may succeed later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// TOML parse failure
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parse failure
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Unknown file extension
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Values are individually valid but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Audit trail errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Chain broken at the given position
    #[error("transition log integrity violation at entry {index}")]
    IntegrityViolation {
        /// Index of the first bad entry
        index: usize,
    },
}

/// Pattern store errors; always recovered locally
#[derive(Debug, thiserror::Error)]
pub enum PatternStoreError {
    /// Backend unreachable
    #[error("pattern store unavailable: {0}")]
    Unavailable(String),
}

/// Illegal atom status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition for atom {atom}: {from} -> {to}")]
pub struct TransitionError {
    /// Atom
    pub atom: AtomId,
    /// Current status
    pub from: AtomStatus,
    /// Requested status
    pub to: AtomStatus,
}
