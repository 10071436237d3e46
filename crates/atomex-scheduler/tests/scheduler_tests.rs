use atomex_atomizer::Atomizer;
use atomex_core::{
    AtomId, AtomStatus, AtomicSpec, AtomicUnit, MasterplanId, ReviewResolution, SpecId, TestCase,
    TransitionLog, WaveStatus,
};
use atomex_scheduler::{DependencyGraph, SchedulerError, WaveTracker};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn spec(id: &str, seq: u32, deps: &[&str]) -> AtomicSpec {
    let base = AtomicSpec::new(id, format!("step_{id}"), "Compute a value")
        .with_sequence(seq)
        .with_input("x", "int")
        .with_output("int")
        .with_target_loc(6)
        .with_test(TestCase::new("t", serde_json::json!(1), serde_json::json!(1)));
    deps.iter().fold(base, |s, d| s.depends_on(*d))
}

/// A -> B, A -> C, B -> D, C -> D, D -> E
fn diamond() -> Vec<AtomicSpec> {
    vec![
        spec("A", 1, &[]),
        spec("B", 2, &["A"]),
        spec("C", 3, &["A"]),
        spec("D", 4, &["B", "C"]),
        spec("E", 5, &["D"]),
    ]
}

fn build(specs: &[AtomicSpec]) -> (Arc<DependencyGraph>, Vec<AtomicUnit>) {
    let batch = Atomizer::default().prepare(specs).unwrap();
    let (graph, atoms) = DependencyGraph::build(MasterplanId::new(), &batch, 2).unwrap();
    (Arc::new(graph), atoms)
}

fn ids_by_spec(atoms: &[AtomicUnit]) -> HashMap<String, AtomId> {
    atoms.iter().map(|a| (a.spec_id.as_str().to_string(), a.id)).collect()
}

fn tracker(specs: &[AtomicSpec]) -> (WaveTracker, HashMap<String, AtomId>) {
    let (graph, atoms) = build(specs);
    let ids = ids_by_spec(&atoms);
    let tracker = WaveTracker::new(graph, atoms, Arc::new(TransitionLog::new())).unwrap();
    (tracker, ids)
}

fn finish(tracker: &mut WaveTracker, id: AtomId, status: AtomStatus, held: bool) {
    let mut unit = tracker.take_for_dispatch(id).unwrap();
    unit.attempts = 1;
    unit.status = status;
    unit.needs_review = held;
    tracker.record_outcome(unit, "test outcome").unwrap();
}

#[test]
fn diamond_partitions_into_four_waves() {
    let (graph, atoms) = build(&diamond());
    let ids = ids_by_spec(&atoms);
    let waves: Vec<Vec<AtomId>> = graph.waves().to_vec();
    assert_eq!(
        waves,
        vec![
            vec![ids["A"]],
            vec![ids["B"], ids["C"]],
            vec![ids["D"]],
            vec![ids["E"]],
        ]
    );
    assert_eq!(graph.max_parallelism(), 2);
    let record = graph.record();
    assert_eq!(record.total_waves, 4);
    assert_eq!(record.total_dependencies, 5);
    assert!(atoms.iter().all(|a| a.wave_number.is_some()));
}

#[test]
fn rebuild_from_edge_rows_matches() {
    let (graph, atoms) = build(&diamond());
    let rebuilt =
        DependencyGraph::from_parts(graph.id(), graph.masterplan_id(), &atoms, graph.edges().to_vec()).unwrap();
    assert_eq!(rebuilt.waves(), graph.waves());
}

#[test]
fn later_wave_waits_for_earlier_wave() {
    let (mut tracker, ids) = tracker(&diamond());
    assert_eq!(tracker.prepare_wave(0).unwrap(), vec![ids["A"]]);
    assert_eq!(
        tracker.prepare_wave(1).unwrap_err(),
        SchedulerError::WaveNotReady { wave: 1, waiting_on: 0 }
    );
    finish(&mut tracker, ids["A"], AtomStatus::Completed, false);
    assert_eq!(tracker.wave(0).unwrap().status, WaveStatus::Completed);
    assert_eq!(tracker.prepare_wave(1).unwrap().len(), 2);
    assert_eq!(tracker.wave(1).unwrap().status, WaveStatus::Running);
}

#[test]
fn running_atom_cannot_be_dispatched_twice() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    tracker.take_for_dispatch(ids["A"]).unwrap();
    assert!(matches!(
        tracker.take_for_dispatch(ids["A"]),
        Err(SchedulerError::Transition(_))
    ));
}

#[test]
fn held_atom_keeps_wave_open_until_review() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    finish(&mut tracker, ids["A"], AtomStatus::Completed, true);
    assert_eq!(tracker.wave(0).unwrap().status, WaveStatus::Running);
    assert!(!tracker.can_start(1).unwrap());

    tracker
        .resolve_review(ids["A"], ReviewResolution::Approve, None)
        .unwrap();
    assert_eq!(tracker.wave(0).unwrap().status, WaveStatus::Completed);
    assert!(tracker.can_start(1).unwrap());
}

#[test]
fn skip_blocks_transitive_dependents() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    finish(&mut tracker, ids["A"], AtomStatus::Failed, true);
    // Held failure does not block yet
    assert_eq!(tracker.atom(ids["B"]).unwrap().status, AtomStatus::Pending);

    tracker.resolve_review(ids["A"], ReviewResolution::Skip, None).unwrap();
    for name in ["B", "C", "D", "E"] {
        assert_eq!(tracker.atom(ids[name]).unwrap().status, AtomStatus::Blocked, "{name}");
    }
    assert_eq!(tracker.wave(0).unwrap().status, WaveStatus::Failed);
    assert!(tracker.is_finished());
    tracker.audit().verify_integrity().unwrap();
}

#[test]
fn partial_wave_and_blocked_branch() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    finish(&mut tracker, ids["A"], AtomStatus::Completed, false);
    tracker.prepare_wave(1).unwrap();
    finish(&mut tracker, ids["B"], AtomStatus::Completed, false);
    finish(&mut tracker, ids["C"], AtomStatus::Failed, false);

    assert_eq!(tracker.wave(1).unwrap().status, WaveStatus::Partial);
    assert_eq!(tracker.wave(1).unwrap().failed_atoms, 1);
    assert_eq!(tracker.atom(ids["D"]).unwrap().status, AtomStatus::Blocked);
    assert_eq!(tracker.atom(ids["E"]).unwrap().status, AtomStatus::Blocked);
}

#[test]
fn regenerate_reopens_wave() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    finish(&mut tracker, ids["A"], AtomStatus::Failed, true);
    let status = tracker
        .resolve_review(ids["A"], ReviewResolution::Regenerate, None)
        .unwrap();
    assert_eq!(status, AtomStatus::Pending);
    let atom = tracker.atom(ids["A"]).unwrap();
    assert_eq!(atom.attempts, 0);
    assert!(!atom.needs_review);
    assert_eq!(tracker.next_open_wave(), Some(0));
    assert_eq!(tracker.prepare_wave(0).unwrap(), vec![ids["A"]]);
}

#[test]
fn edit_requires_code() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    finish(&mut tracker, ids["A"], AtomStatus::Completed, true);
    assert_eq!(
        tracker.resolve_review(ids["A"], ReviewResolution::Edit, None).unwrap_err(),
        SchedulerError::MissingEditedCode
    );
    tracker
        .resolve_review(ids["A"], ReviewResolution::Edit, Some("def step_A(x):\n    return x\n".into()))
        .unwrap();
    let atom = tracker.atom(ids["A"]).unwrap();
    assert_eq!(atom.status, AtomStatus::Completed);
    assert_eq!(atom.loc, 2);
}

#[test]
fn cancel_skips_undispatched_atoms_only() {
    let (mut tracker, ids) = tracker(&diamond());
    tracker.prepare_wave(0).unwrap();
    tracker.take_for_dispatch(ids["A"]).unwrap();
    assert_eq!(tracker.cancel(), 4);
    assert_eq!(tracker.atom(ids["A"]).unwrap().status, AtomStatus::Running);
    assert_eq!(tracker.counts().skipped, 4);
}

#[test]
fn not_held_atoms_cannot_be_resolved() {
    let (mut tracker, ids) = tracker(&diamond());
    assert_eq!(
        tracker
            .resolve_review(ids["A"], ReviewResolution::Approve, None)
            .unwrap_err(),
        SchedulerError::NotHeld(ids["A"])
    );
}

fn dag_specs() -> impl Strategy<Value = Vec<AtomicSpec>> {
    (1..25usize).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..3), n).prop_map(
            |deps| {
                deps.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let targets: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            picks.iter().map(|p| format!("s{}", p.index(i))).collect()
                        };
                        let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
                        spec(&format!("s{i}"), i as u32, &refs)
                    })
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn prop_waves_respect_dependencies_and_cover_once(specs in dag_specs()) {
        let (graph, atoms) = build(&specs);
        let ids = ids_by_spec(&atoms);

        let mut covered: Vec<AtomId> = graph.waves().iter().flatten().copied().collect();
        covered.sort();
        let mut all: Vec<AtomId> = atoms.iter().map(|a| a.id).collect();
        all.sort();
        prop_assert_eq!(covered, all);

        for s in &specs {
            let wave = graph.wave_of(ids[s.id.as_str()]).unwrap();
            for d in &s.dependencies {
                let dep_wave = graph.wave_of(ids[SpecId::as_str(d)]).unwrap();
                prop_assert!(wave > dep_wave);
            }
        }
        prop_assert_eq!(
            graph.max_parallelism(),
            graph.waves().iter().map(Vec::len).max().unwrap_or(0)
        );
    }
}
