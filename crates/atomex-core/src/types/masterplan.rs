//! Masterplans: the unit the engine plans and runs

use super::ids::MasterplanId;
use super::spec::AtomicSpec;
use crate::config::PrecisionPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a masterplan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterplanState {
    /// Graph built, nothing dispatched
    #[default]
    Planned,
    /// Waves executing
    Running,
    /// Waiting on human review
    AwaitingReview,
    /// Every wave terminal
    Finished,
    /// Cancelled by the caller
    Cancelled,
}

/// A masterplan and its precision policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Masterplan {
    /// Masterplan id
    pub id: MasterplanId,
    /// Display name
    pub name: String,
    /// Gate and target thresholds
    pub precision: PrecisionPolicy,
    /// Run state
    pub state: MasterplanState,
    /// Specs accepted at planning time, kept for resuming from the store
    #[serde(default)]
    pub specs: Vec<AtomicSpec>,
    /// Planning time
    pub created_at: DateTime<Utc>,
}

impl Masterplan {
    /// New planned masterplan
    #[must_use]
    pub fn new(name: impl Into<String>, precision: PrecisionPolicy) -> Self {
        Self {
            id: MasterplanId::new(),
            name: name.into(),
            precision,
            state: MasterplanState::Planned,
            specs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// With its accepted specs
    #[must_use]
    pub fn with_specs(mut self, specs: Vec<AtomicSpec>) -> Self {
        self.specs = specs;
        self
    }
}
