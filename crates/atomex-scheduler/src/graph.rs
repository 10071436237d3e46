//! Dependency graph and wave partitioning
//!
//! The graph is an arena keyed by [`AtomId`]. Edge rows ([`AtomDependency`])
//! are the source of truth; the petgraph map and the JSON projection are
//! derived from them.

use crate::error::SchedulerError;
use atomex_atomizer::PreparedBatch;
use atomex_core::{
    AtomDependency, AtomId, AtomicUnit, DependencyGraphRecord, ExecutionWave, GraphId, MasterplanId,
    SpecId,
};
use chrono::Utc;
use indexmap::IndexMap;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Node {
    spec_id: SpecId,
    sequence: u32,
    name: String,
}

/// Immutable dependency graph with its wave partition
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    id: GraphId,
    masterplan_id: MasterplanId,
    nodes: IndexMap<AtomId, Node>,
    edges: Vec<AtomDependency>,
    // prerequisite -> dependent
    graph: DiGraphMap<AtomId, ()>,
    waves: Vec<Vec<AtomId>>,
    wave_of: HashMap<AtomId, u32>,
}

impl DependencyGraph {
    /// Materialize a prepared batch into atoms and a scheduled graph
    ///
    /// Returned atoms carry their fixed wave numbers.
    pub fn build(
        masterplan_id: MasterplanId,
        batch: &PreparedBatch,
        max_attempts: u32,
    ) -> Result<(Self, Vec<AtomicUnit>), SchedulerError> {
        let mut atoms: Vec<AtomicUnit> = batch
            .specs
            .iter()
            .map(|spec| AtomicUnit::from_spec(masterplan_id, spec, max_attempts))
            .collect();
        let by_spec: HashMap<&SpecId, AtomId> = atoms.iter().map(|a| (&a.spec_id, a.id)).collect();

        let graph_id = GraphId::new();
        let edges = batch
            .dependencies
            .iter()
            .filter_map(|d| {
                let from = by_spec.get(&d.from)?;
                let to = by_spec.get(&d.to)?;
                let mut edge = AtomDependency::new(graph_id, *from, *to, d.dependency_type);
                edge.strength = d.strength;
                Some(edge)
            })
            .collect();

        let graph = Self::from_parts(graph_id, masterplan_id, &atoms, edges)?;
        for atom in &mut atoms {
            atom.wave_number = graph.wave_of(atom.id);
        }
        Ok((graph, atoms))
    }

    /// Rebuild from stored atoms and normalized edge rows
    pub fn from_parts(
        id: GraphId,
        masterplan_id: MasterplanId,
        atoms: &[AtomicUnit],
        edges: Vec<AtomDependency>,
    ) -> Result<Self, SchedulerError> {
        let mut nodes = IndexMap::with_capacity(atoms.len());
        let mut graph = DiGraphMap::with_capacity(atoms.len(), edges.len());
        for atom in atoms {
            nodes.insert(
                atom.id,
                Node {
                    spec_id: atom.spec_id.clone(),
                    sequence: atom.sequence,
                    name: atom.name.clone(),
                },
            );
            graph.add_node(atom.id);
        }

        let mut unique = Vec::with_capacity(edges.len());
        let mut seen = HashSet::new();
        for edge in edges {
            for end in [edge.from_atom, edge.to_atom] {
                if !nodes.contains_key(&end) {
                    return Err(SchedulerError::DanglingEdge(end));
                }
            }
            if seen.insert((edge.from_atom, edge.to_atom)) {
                graph.add_edge(edge.to_atom, edge.from_atom, ());
                unique.push(edge);
            }
        }

        let mut this = Self {
            id,
            masterplan_id,
            nodes,
            edges: unique,
            graph,
            waves: Vec::new(),
            wave_of: HashMap::new(),
        };
        this.compute_waves()?;
        info!(
            graph = %this.id,
            atoms = this.nodes.len(),
            edges = this.edges.len(),
            waves = this.waves.len(),
            max_parallelism = this.max_parallelism(),
            "Dependency graph built"
        );
        Ok(this)
    }

    /// Kahn's algorithm; each zero in-degree round is one wave
    fn compute_waves(&mut self) -> Result<(), SchedulerError> {
        let mut in_degree: HashMap<AtomId, usize> = self
            .graph
            .nodes()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut current: Vec<AtomId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut placed = 0usize;
        let mut waves = Vec::new();

        while !current.is_empty() {
            current.sort_by_key(|id| (self.nodes[id].sequence, *id));
            let mut next = Vec::new();
            for node in &current {
                for dependent in self.graph.neighbors_directed(*node, Direction::Outgoing) {
                    if let Some(d) = in_degree.get_mut(&dependent) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            placed += current.len();
            waves.push(std::mem::replace(&mut current, next));
        }

        if placed < self.nodes.len() {
            return Err(SchedulerError::CycleDetected {
                remaining: self.nodes.len() - placed,
            });
        }

        self.wave_of = waves
            .iter()
            .enumerate()
            .flat_map(|(n, wave)| wave.iter().map(move |id| (*id, n as u32)))
            .collect();
        self.waves = waves;
        debug!(graph = %self.id, waves = self.waves.len(), "Waves computed");
        Ok(())
    }

    /// Graph id
    #[inline]
    #[must_use]
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Owning masterplan
    #[inline]
    #[must_use]
    pub fn masterplan_id(&self) -> MasterplanId {
        self.masterplan_id
    }

    /// Atom count
    #[inline]
    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.nodes.len()
    }

    /// Normalized edge rows
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[AtomDependency] {
        &self.edges
    }

    /// Waves in order, atoms ordered by sequence within each
    #[inline]
    #[must_use]
    pub fn waves(&self) -> &[Vec<AtomId>] {
        &self.waves
    }

    /// Wave an atom belongs to
    #[inline]
    #[must_use]
    pub fn wave_of(&self, atom: AtomId) -> Option<u32> {
        self.wave_of.get(&atom).copied()
    }

    /// Width of the widest wave
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.waves.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Atoms in wave order
    #[must_use]
    pub fn topological_order(&self) -> Vec<AtomId> {
        self.waves.iter().flatten().copied().collect()
    }

    /// Atoms that must complete before `atom`
    pub fn prerequisites(&self, atom: AtomId) -> impl Iterator<Item = AtomId> + '_ {
        self.graph.neighbors_directed(atom, Direction::Incoming)
    }

    /// Atoms that directly need `atom`
    pub fn dependents(&self, atom: AtomId) -> impl Iterator<Item = AtomId> + '_ {
        self.graph.neighbors_directed(atom, Direction::Outgoing)
    }

    /// Every atom reachable through dependents, excluding `atom`
    #[must_use]
    pub fn transitive_dependents(&self, atom: AtomId) -> Vec<AtomId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<AtomId> = self.dependents(atom).collect();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self.dependents(next));
            }
        }
        out
    }

    /// Name of an atom's symbol
    #[must_use]
    pub fn name_of(&self, atom: AtomId) -> Option<&str> {
        self.nodes.get(&atom).map(|n| n.name.as_str())
    }

    /// Pending wave rows
    #[must_use]
    pub fn execution_waves(&self) -> Vec<ExecutionWave> {
        self.waves
            .iter()
            .enumerate()
            .map(|(n, atoms)| ExecutionWave::new(self.id, n as u32, atoms.clone()))
            .collect()
    }

    /// JSON projection of nodes and edges
    #[must_use]
    pub fn graph_data(&self) -> serde_json::Value {
        let nodes: Vec<_> = self
            .nodes
            .iter()
            .map(|(id, node)| {
                json!({
                    "id": id.to_string(),
                    "spec_id": node.spec_id.as_str(),
                    "name": node.name,
                    "sequence": node.sequence,
                    "wave": self.wave_of(*id),
                })
            })
            .collect();
        let edges: Vec<_> = self
            .edges
            .iter()
            .map(|e| {
                json!({
                    "from": e.from_atom.to_string(),
                    "to": e.to_atom.to_string(),
                    "type": e.dependency_type,
                    "strength": e.strength,
                })
            })
            .collect();
        json!({ "nodes": nodes, "edges": edges })
    }

    /// Persisted summary
    #[must_use]
    pub fn record(&self) -> DependencyGraphRecord {
        DependencyGraphRecord {
            id: self.id,
            masterplan_id: self.masterplan_id,
            graph_data: self.graph_data(),
            total_atoms: self.nodes.len(),
            total_dependencies: self.edges.len(),
            total_waves: self.waves.len(),
            max_parallelism: self.max_parallelism(),
            has_cycles: false,
            topological_order: self.topological_order(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomex_core::{AtomicSpec, DependencyType};
    use pretty_assertions::assert_eq;

    fn atoms(plan: MasterplanId, n: u32) -> Vec<AtomicUnit> {
        (0..n)
            .map(|i| {
                let spec = AtomicSpec::new(format!("s{i}").as_str(), format!("f{i}"), "Compute").with_sequence(i);
                AtomicUnit::from_spec(plan, &spec, 3)
            })
            .collect()
    }

    #[test]
    fn independent_atoms_share_one_wave_in_sequence_order() {
        let plan = MasterplanId::new();
        let units = atoms(plan, 4);
        let graph = DependencyGraph::from_parts(GraphId::new(), plan, &units, vec![]).unwrap();
        assert_eq!(graph.waves().len(), 1);
        assert_eq!(graph.waves()[0], units.iter().map(|a| a.id).collect::<Vec<_>>());
        assert_eq!(graph.max_parallelism(), 4);
    }

    #[test]
    fn cycle_in_edge_rows_is_rejected() {
        let plan = MasterplanId::new();
        let units = atoms(plan, 2);
        let g = GraphId::new();
        let edges = vec![
            AtomDependency::new(g, units[0].id, units[1].id, DependencyType::Temporal),
            AtomDependency::new(g, units[1].id, units[0].id, DependencyType::Temporal),
        ];
        assert_eq!(
            DependencyGraph::from_parts(g, plan, &units, edges).unwrap_err(),
            SchedulerError::CycleDetected { remaining: 2 }
        );
    }

    #[test]
    fn duplicate_edge_rows_collapse() {
        let plan = MasterplanId::new();
        let units = atoms(plan, 2);
        let g = GraphId::new();
        let edge = AtomDependency::new(g, units[1].id, units[0].id, DependencyType::Import);
        let graph = DependencyGraph::from_parts(g, plan, &units, vec![edge.clone(), edge]).unwrap();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.waves().len(), 2);
    }

    #[test]
    fn projection_mirrors_edges() {
        let plan = MasterplanId::new();
        let units = atoms(plan, 2);
        let g = GraphId::new();
        let edge = AtomDependency::new(g, units[1].id, units[0].id, DependencyType::DataFlow);
        let graph = DependencyGraph::from_parts(g, plan, &units, vec![edge]).unwrap();
        let data = graph.graph_data();
        assert_eq!(data["edges"].as_array().map(Vec::len), Some(1));
        assert_eq!(data["edges"][0]["type"], "DATA_FLOW");
        assert_eq!(data["nodes"][1]["wave"], 1);
        let record = graph.record();
        assert_eq!(record.total_waves, 2);
        assert!(!record.has_cycles);
    }
}
