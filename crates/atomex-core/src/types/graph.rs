//! Dependency graph, edge and wave records

use super::ids::{AtomId, GraphId, MasterplanId, WaveId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why one atom depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    /// Imports the prerequisite's module
    Import,
    /// Consumes the prerequisite's output
    DataFlow,
    /// Calls the prerequisite
    FunctionCall,
    /// Uses a type the prerequisite defines
    Type,
    /// Ordering only
    Temporal,
}

impl DependencyType {
    /// Diagnostic strength in [0, 1]
    #[inline]
    #[must_use]
    pub fn default_strength(self) -> f64 {
        match self {
            DependencyType::DataFlow => 0.9,
            DependencyType::FunctionCall => 0.8,
            DependencyType::Import => 0.7,
            DependencyType::Type => 0.6,
            DependencyType::Temporal => 0.3,
        }
    }
}

/// Edge: `from_atom` depends on `to_atom`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomDependency {
    /// Owning graph
    pub graph_id: GraphId,
    /// Dependent atom
    pub from_atom: AtomId,
    /// Prerequisite atom
    pub to_atom: AtomId,
    /// Classification
    pub dependency_type: DependencyType,
    /// Strength in [0, 1], diagnostics only
    pub strength: f64,
}

impl AtomDependency {
    /// Create an edge with the type's default strength
    #[must_use]
    pub fn new(graph_id: GraphId, from_atom: AtomId, to_atom: AtomId, dependency_type: DependencyType) -> Self {
        Self {
            graph_id,
            from_atom,
            to_atom,
            dependency_type,
            strength: dependency_type.default_strength(),
        }
    }
}

/// Persisted summary of a masterplan's dependency graph
///
/// `graph_data` is a projection of the normalized edge rows and is rebuilt
/// from them; it is never read back as a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraphRecord {
    /// Graph id
    pub id: GraphId,
    /// Owning masterplan
    pub masterplan_id: MasterplanId,
    /// Nodes and edges as JSON
    pub graph_data: serde_json::Value,
    /// Atoms in the graph
    pub total_atoms: usize,
    /// Edges in the graph
    pub total_dependencies: usize,
    /// Number of waves
    pub total_waves: usize,
    /// Size of the widest wave
    pub max_parallelism: usize,
    /// Always false for a stored graph
    pub has_cycles: bool,
    /// Prerequisites before dependents
    pub topological_order: Vec<AtomId>,
    /// Build time
    pub created_at: DateTime<Utc>,
}

/// Aggregate status of a wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaveStatus {
    /// Not started
    #[default]
    Pending,
    /// At least one atom started, not all terminal
    Running,
    /// All atoms completed
    Completed,
    /// No atom completed
    Failed,
    /// Some completed, some permanently unsuccessful
    Partial,
}

impl WaveStatus {
    /// Successor waves may start
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, WaveStatus::Completed | WaveStatus::Failed | WaveStatus::Partial)
    }
}

/// A set of mutually independent atoms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionWave {
    /// Wave id
    pub id: WaveId,
    /// Graph the wave belongs to
    pub graph_id: GraphId,
    /// 0-based position
    pub wave_number: u32,
    /// Member atoms
    pub atom_ids: Vec<AtomId>,
    /// Number of members
    pub total_atoms: usize,
    /// Members that completed
    pub completed_atoms: usize,
    /// Members failed, blocked or skipped
    pub failed_atoms: usize,
    /// Aggregate status
    pub status: WaveStatus,
    /// First member dispatched or prepared
    pub started_at: Option<DateTime<Utc>>,
    /// Every member terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time from start to completion
    pub duration_ms: Option<u64>,
}

impl ExecutionWave {
    /// New pending wave
    #[must_use]
    pub fn new(graph_id: GraphId, wave_number: u32, atom_ids: Vec<AtomId>) -> Self {
        Self {
            id: WaveId::new(),
            graph_id,
            wave_number,
            total_atoms: atom_ids.len(),
            atom_ids,
            completed_atoms: 0,
            failed_atoms: 0,
            status: WaveStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}
