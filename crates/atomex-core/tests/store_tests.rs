//! In-memory store contract tests

use atomex_core::{
    AtomDependency, AtomicSpec, AtomicUnit, DependencyGraphRecord, DependencyType, ExecutionStore,
    ExecutionWave, GraphId, HumanReviewQueueEntry, InMemoryStore, Masterplan, PrecisionPolicy,
    StoreError, ValidationLevel, ValidationResult,
};
use chrono::Utc;
use pretty_assertions::assert_eq;

async fn seeded() -> (InMemoryStore, Masterplan, AtomicUnit, AtomicUnit, DependencyGraphRecord) {
    let store = InMemoryStore::new();
    let plan = Masterplan::new("orders", PrecisionPolicy::default());
    store.put_masterplan(plan.clone()).await.unwrap();

    let a = AtomicUnit::from_spec(plan.id, &AtomicSpec::new("a", "load", "Load an order").with_sequence(1), 3);
    let b = AtomicUnit::from_spec(plan.id, &AtomicSpec::new("b", "total", "Total an order").with_sequence(2), 3);
    store.put_atom(a.clone()).await.unwrap();
    store.put_atom(b.clone()).await.unwrap();

    let graph = DependencyGraphRecord {
        id: GraphId::new(),
        masterplan_id: plan.id,
        graph_data: serde_json::json!({}),
        total_atoms: 2,
        total_dependencies: 1,
        total_waves: 2,
        max_parallelism: 1,
        has_cycles: false,
        topological_order: vec![a.id, b.id],
        created_at: Utc::now(),
    };
    store.put_graph(graph.clone()).await.unwrap();
    (store, plan, a, b, graph)
}

#[tokio::test]
async fn duplicate_edges_are_rejected() {
    let (store, _, a, b, graph) = seeded().await;
    let edge = AtomDependency::new(graph.id, b.id, a.id, DependencyType::DataFlow);
    store.insert_dependency(edge.clone()).await.unwrap();
    let err = store.insert_dependency(edge).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateEdge { .. }));
}

#[tokio::test]
async fn wave_numbers_are_unique_per_graph() {
    let (store, _, a, _, graph) = seeded().await;
    store.insert_wave(ExecutionWave::new(graph.id, 0, vec![a.id])).await.unwrap();
    let err = store
        .insert_wave(ExecutionWave::new(graph.id, 0, vec![a.id]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateWave { wave_number: 0, .. }));
}

#[tokio::test]
async fn atoms_require_their_masterplan() {
    let store = InMemoryStore::new();
    let orphan = AtomicUnit::from_spec(
        atomex_core::MasterplanId::new(),
        &AtomicSpec::new("x", "orphan", "No parent"),
        3,
    );
    assert!(matches!(store.put_atom(orphan).await, Err(StoreError::ForeignKey(_))));
}

#[tokio::test]
async fn deleting_graph_cascades_to_edges_and_waves() {
    let (store, _, a, b, graph) = seeded().await;
    store
        .insert_dependency(AtomDependency::new(graph.id, b.id, a.id, DependencyType::Import))
        .await
        .unwrap();
    store.insert_wave(ExecutionWave::new(graph.id, 0, vec![a.id])).await.unwrap();

    store.delete_graph(graph.id).await.unwrap();
    assert!(store.dependencies(graph.id).await.unwrap().is_empty());
    assert!(store.waves(graph.id).await.unwrap().is_empty());
    assert!(store.get_atom(a.id).await.is_ok());
}

#[tokio::test]
async fn deleting_atom_cascades_to_owned_rows() {
    let (store, plan, a, b, graph) = seeded().await;
    store
        .insert_dependency(AtomDependency::new(graph.id, b.id, a.id, DependencyType::Import))
        .await
        .unwrap();
    store
        .append_validation(ValidationResult::from_issues(a.id, ValidationLevel::Atomic, vec![]))
        .await
        .unwrap();
    store
        .put_review(HumanReviewQueueEntry::new(a.id, plan.id, 0.4, 2, "low confidence"))
        .await
        .unwrap();

    store.delete_atom(a.id).await.unwrap();
    assert!(store.validations(a.id).await.unwrap().is_empty());
    assert!(store.reviews(plan.id).await.unwrap().is_empty());
    assert!(store.dependencies(graph.id).await.unwrap().is_empty());
    assert_eq!(store.atoms(plan.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn validations_are_append_only_in_order() {
    let (store, _, a, _, _) = seeded().await;
    for level in ValidationLevel::ALL {
        store
            .append_validation(ValidationResult::from_issues(a.id, level, vec![]))
            .await
            .unwrap();
    }
    let levels: Vec<_> = store
        .validations(a.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.level)
        .collect();
    assert_eq!(levels, ValidationLevel::ALL.to_vec());
}

#[tokio::test]
async fn deleting_masterplan_removes_everything() {
    let (store, plan, a, _, graph) = seeded().await;
    store.delete_masterplan(plan.id).await.unwrap();
    assert!(store.get_atom(a.id).await.is_err());
    assert!(store.get_graph(graph.id).await.is_err());
    assert!(store.atoms(plan.id).await.unwrap().is_empty());
}
