//! Identifier newtypes
//!
//! Engine-generated identities are ULIDs so they sort by creation time.
//! Spec identifiers are supplied by the atomizer and kept as strings.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(
    /// Masterplan (one decomposed generation task)
    MasterplanId
);
ulid_id!(
    /// Atomic unit
    AtomId
);
ulid_id!(
    /// Dependency graph
    GraphId
);
ulid_id!(
    /// Execution wave
    WaveId
);
ulid_id!(
    /// Human review queue entry
    ReviewId
);
ulid_id!(
    /// Validation result row
    ValidationResultId
);

/// Atomizer-assigned spec identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(pub String);

impl SpecId {
    /// Create a spec id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_sortable() {
        let a = AtomId::new();
        let b = AtomId::new();
        assert_ne!(a, b);
        assert!(a.0.timestamp_ms() <= b.0.timestamp_ms());
    }

    #[test]
    fn spec_id_serializes_transparently() {
        let id = SpecId::new("atom-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"atom-7\"");
    }
}
