//! Execution store contract and in-memory reference implementation
//!
//! The store owns every persisted entity. Its contract:
//! - (from, to) edges are unique
//! - (graph_id, wave_number) is unique
//! - validation results and retry rows are append-only
//! - deleting a graph removes its edges and waves; deleting an atom removes
//!   its validation results, retries, reviews and incident edges

use crate::error::StoreError;
use crate::types::{
    AtomDependency, AtomId, AtomRetryHistory, AtomicUnit, DependencyGraphRecord, ExecutionWave,
    GraphId, HumanReviewQueueEntry, Masterplan, MasterplanId, ReviewId, ValidationResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

/// Persistence for engine entities
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace a masterplan
    async fn put_masterplan(&self, masterplan: Masterplan) -> Result<(), StoreError>;
    /// Masterplan by id
    async fn get_masterplan(&self, id: MasterplanId) -> Result<Masterplan, StoreError>;
    /// Remove a masterplan and everything it owns
    async fn delete_masterplan(&self, id: MasterplanId) -> Result<(), StoreError>;

    /// Insert or replace an atom; its masterplan must exist
    async fn put_atom(&self, atom: AtomicUnit) -> Result<(), StoreError>;
    /// Atom by id
    async fn get_atom(&self, id: AtomId) -> Result<AtomicUnit, StoreError>;
    /// Atoms of a masterplan ordered by sequence
    async fn atoms(&self, masterplan_id: MasterplanId) -> Result<Vec<AtomicUnit>, StoreError>;
    /// Remove an atom and every row that references it
    async fn delete_atom(&self, id: AtomId) -> Result<(), StoreError>;

    /// Insert or replace a graph; its masterplan must exist
    async fn put_graph(&self, graph: DependencyGraphRecord) -> Result<(), StoreError>;
    /// Graph by id
    async fn get_graph(&self, id: GraphId) -> Result<DependencyGraphRecord, StoreError>;
    /// Graph of a masterplan
    async fn graph_for(&self, masterplan_id: MasterplanId) -> Result<DependencyGraphRecord, StoreError>;
    /// Remove a graph with its edges and waves
    async fn delete_graph(&self, id: GraphId) -> Result<(), StoreError>;

    /// Insert an edge; (from, to) is unique per graph
    async fn insert_dependency(&self, edge: AtomDependency) -> Result<(), StoreError>;
    /// Edges of a graph
    async fn dependencies(&self, graph_id: GraphId) -> Result<Vec<AtomDependency>, StoreError>;

    /// Insert a wave; (graph, number) is unique
    async fn insert_wave(&self, wave: ExecutionWave) -> Result<(), StoreError>;
    /// Replace an existing wave row
    async fn update_wave(&self, wave: ExecutionWave) -> Result<(), StoreError>;
    /// Waves of a graph ordered by number
    async fn waves(&self, graph_id: GraphId) -> Result<Vec<ExecutionWave>, StoreError>;

    /// Append a validation result
    async fn append_validation(&self, result: ValidationResult) -> Result<(), StoreError>;
    /// Results for an atom in creation order
    async fn validations(&self, atom_id: AtomId) -> Result<Vec<ValidationResult>, StoreError>;

    /// Append a retry row
    async fn append_retry(&self, retry: AtomRetryHistory) -> Result<(), StoreError>;
    /// Retry rows for an atom in append order
    async fn retries(&self, atom_id: AtomId) -> Result<Vec<AtomRetryHistory>, StoreError>;

    /// Insert or replace a review entry
    async fn put_review(&self, entry: HumanReviewQueueEntry) -> Result<(), StoreError>;
    /// Review entry by id
    async fn get_review(&self, id: ReviewId) -> Result<HumanReviewQueueEntry, StoreError>;
    /// Review entries of a masterplan
    async fn reviews(&self, masterplan_id: MasterplanId) -> Result<Vec<HumanReviewQueueEntry>, StoreError>;
}

/// `DashMap`-backed store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    masterplans: DashMap<MasterplanId, Masterplan>,
    atoms: DashMap<AtomId, AtomicUnit>,
    graphs: DashMap<GraphId, DependencyGraphRecord>,
    edges: DashMap<(AtomId, AtomId), AtomDependency>,
    waves: DashMap<(GraphId, u32), ExecutionWave>,
    validations: DashMap<AtomId, Vec<ValidationResult>>,
    retries: DashMap<AtomId, Vec<AtomRetryHistory>>,
    reviews: DashMap<ReviewId, HumanReviewQueueEntry>,
    /// Serializes cascading deletes against inserts
    cascade: RwLock<()>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn require_atom(&self, id: AtomId) -> Result<(), StoreError> {
        if self.atoms.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey(format!("atom {id} does not exist")))
        }
    }

    fn require_graph(&self, id: GraphId) -> Result<(), StoreError> {
        if self.graphs.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey(format!("graph {id} does not exist")))
        }
    }

    fn remove_graph_rows(&self, id: GraphId) {
        self.edges.retain(|_, e| e.graph_id != id);
        self.waves.retain(|(g, _), _| *g != id);
    }

    fn remove_atom_rows(&self, id: AtomId) {
        self.validations.remove(&id);
        self.retries.remove(&id);
        self.reviews.retain(|_, r| r.atom_id != id);
        self.edges.retain(|(from, to), _| *from != id && *to != id);
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn put_masterplan(&self, masterplan: Masterplan) -> Result<(), StoreError> {
        self.masterplans.insert(masterplan.id, masterplan);
        Ok(())
    }

    async fn get_masterplan(&self, id: MasterplanId) -> Result<Masterplan, StoreError> {
        self.masterplans
            .get(&id)
            .map(|m| m.clone())
            .ok_or_else(|| StoreError::masterplan_not_found(id))
    }

    async fn delete_masterplan(&self, id: MasterplanId) -> Result<(), StoreError> {
        let _guard = self.cascade.write();
        self.masterplans
            .remove(&id)
            .ok_or_else(|| StoreError::masterplan_not_found(id))?;
        let graphs: Vec<GraphId> = self
            .graphs
            .iter()
            .filter(|g| g.masterplan_id == id)
            .map(|g| g.id)
            .collect();
        for graph in graphs {
            self.graphs.remove(&graph);
            self.remove_graph_rows(graph);
        }
        let atoms: Vec<AtomId> = self
            .atoms
            .iter()
            .filter(|a| a.masterplan_id == id)
            .map(|a| a.id)
            .collect();
        for atom in atoms {
            self.atoms.remove(&atom);
            self.remove_atom_rows(atom);
        }
        Ok(())
    }

    async fn put_atom(&self, atom: AtomicUnit) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        if !self.masterplans.contains_key(&atom.masterplan_id) {
            return Err(StoreError::ForeignKey(format!(
                "masterplan {} does not exist",
                atom.masterplan_id
            )));
        }
        self.atoms.insert(atom.id, atom);
        Ok(())
    }

    async fn get_atom(&self, id: AtomId) -> Result<AtomicUnit, StoreError> {
        self.atoms
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::atom_not_found(id))
    }

    async fn atoms(&self, masterplan_id: MasterplanId) -> Result<Vec<AtomicUnit>, StoreError> {
        let mut atoms: Vec<AtomicUnit> = self
            .atoms
            .iter()
            .filter(|a| a.masterplan_id == masterplan_id)
            .map(|a| a.clone())
            .collect();
        atoms.sort_by_key(|a| (a.sequence, a.id));
        Ok(atoms)
    }

    async fn delete_atom(&self, id: AtomId) -> Result<(), StoreError> {
        let _guard = self.cascade.write();
        self.atoms
            .remove(&id)
            .ok_or_else(|| StoreError::atom_not_found(id))?;
        self.remove_atom_rows(id);
        Ok(())
    }

    async fn put_graph(&self, graph: DependencyGraphRecord) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        if !self.masterplans.contains_key(&graph.masterplan_id) {
            return Err(StoreError::ForeignKey(format!(
                "masterplan {} does not exist",
                graph.masterplan_id
            )));
        }
        self.graphs.insert(graph.id, graph);
        Ok(())
    }

    async fn get_graph(&self, id: GraphId) -> Result<DependencyGraphRecord, StoreError> {
        self.graphs
            .get(&id)
            .map(|g| g.clone())
            .ok_or_else(|| StoreError::graph_not_found(id))
    }

    async fn graph_for(&self, masterplan_id: MasterplanId) -> Result<DependencyGraphRecord, StoreError> {
        self.graphs
            .iter()
            .filter(|g| g.masterplan_id == masterplan_id)
            .max_by_key(|g| g.created_at)
            .map(|g| g.clone())
            .ok_or(StoreError::NotFound {
                kind: "graph for masterplan",
                id: masterplan_id.to_string(),
            })
    }

    async fn delete_graph(&self, id: GraphId) -> Result<(), StoreError> {
        let _guard = self.cascade.write();
        self.graphs
            .remove(&id)
            .ok_or_else(|| StoreError::graph_not_found(id))?;
        self.remove_graph_rows(id);
        Ok(())
    }

    async fn insert_dependency(&self, edge: AtomDependency) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        self.require_graph(edge.graph_id)?;
        self.require_atom(edge.from_atom)?;
        self.require_atom(edge.to_atom)?;
        match self.edges.entry((edge.from_atom, edge.to_atom)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::DuplicateEdge {
                from: edge.from_atom,
                to: edge.to_atom,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(edge);
                Ok(())
            }
        }
    }

    async fn dependencies(&self, graph_id: GraphId) -> Result<Vec<AtomDependency>, StoreError> {
        let mut edges: Vec<AtomDependency> = self
            .edges
            .iter()
            .filter(|e| e.graph_id == graph_id)
            .map(|e| e.clone())
            .collect();
        edges.sort_by_key(|e| (e.from_atom, e.to_atom));
        Ok(edges)
    }

    async fn insert_wave(&self, wave: ExecutionWave) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        self.require_graph(wave.graph_id)?;
        match self.waves.entry((wave.graph_id, wave.wave_number)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::DuplicateWave {
                graph_id: wave.graph_id,
                wave_number: wave.wave_number,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(wave);
                Ok(())
            }
        }
    }

    async fn update_wave(&self, wave: ExecutionWave) -> Result<(), StoreError> {
        let key = (wave.graph_id, wave.wave_number);
        match self.waves.get_mut(&key) {
            Some(mut existing) => {
                *existing = wave;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "wave",
                id: format!("{}#{}", wave.graph_id, wave.wave_number),
            }),
        }
    }

    async fn waves(&self, graph_id: GraphId) -> Result<Vec<ExecutionWave>, StoreError> {
        let mut waves: Vec<ExecutionWave> = self
            .waves
            .iter()
            .filter(|w| w.graph_id == graph_id)
            .map(|w| w.clone())
            .collect();
        waves.sort_by_key(|w| w.wave_number);
        Ok(waves)
    }

    async fn append_validation(&self, result: ValidationResult) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        self.require_atom(result.atom_id)?;
        self.validations.entry(result.atom_id).or_default().push(result);
        Ok(())
    }

    async fn validations(&self, atom_id: AtomId) -> Result<Vec<ValidationResult>, StoreError> {
        Ok(self
            .validations
            .get(&atom_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn append_retry(&self, retry: AtomRetryHistory) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        self.require_atom(retry.atom_id)?;
        self.retries.entry(retry.atom_id).or_default().push(retry);
        Ok(())
    }

    async fn retries(&self, atom_id: AtomId) -> Result<Vec<AtomRetryHistory>, StoreError> {
        Ok(self
            .retries
            .get(&atom_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn put_review(&self, entry: HumanReviewQueueEntry) -> Result<(), StoreError> {
        let _guard = self.cascade.read();
        self.require_atom(entry.atom_id)?;
        self.reviews.insert(entry.id, entry);
        Ok(())
    }

    async fn get_review(&self, id: ReviewId) -> Result<HumanReviewQueueEntry, StoreError> {
        self.reviews
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::review_not_found(id))
    }

    async fn reviews(&self, masterplan_id: MasterplanId) -> Result<Vec<HumanReviewQueueEntry>, StoreError> {
        let mut entries: Vec<HumanReviewQueueEntry> = self
            .reviews
            .iter()
            .filter(|r| r.masterplan_id == masterplan_id)
            .map(|r| r.clone())
            .collect();
        entries.sort_by_key(|r| (r.created_at, r.id));
        Ok(entries)
    }
}
