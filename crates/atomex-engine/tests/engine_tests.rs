//! End-to-end engine behaviour against scripted backends

use atomex_core::{
    AtomStatus, AtomicSpec, AtomicUnit, BackendError, DispatchConfig, EngineConfig, ErrorCategory, ExecutionStore,
    GenerationBackend, GuardConstraint, HerdConfig, InMemoryStore, LimiterConfig, MasterplanId, MasterplanState,
    RetryConfig, ReviewResolution, WaveStatus,
};
use atomex_engine::{
    run_simulator, simulation_engine_config, EngineError, ExecutionEngine, SimulatorConfig, Violation,
};
use atomex_scheduler::SchedulerError;
use atomex_test_utils::{chain, clean_python, diamond, spec, wide, ScriptedBackend, Step};
use atomex_validation::ReviewError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn config() -> EngineConfig {
    simulation_engine_config(7)
}

fn engine_with(backend: &Arc<ScriptedBackend>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(config, Arc::clone(backend) as Arc<dyn GenerationBackend>).unwrap()
}

fn engine(backend: &Arc<ScriptedBackend>) -> ExecutionEngine {
    engine_with(backend, config())
}

fn broken(spec: &AtomicSpec) -> String {
    format!("import requests\n\n{}", clean_python(spec))
}

fn spec_named(specs: &[AtomicSpec], id: &str) -> AtomicSpec {
    specs.iter().find(|s| s.id.as_str() == id).cloned().unwrap()
}

async fn atom_for(engine: &ExecutionEngine, id: MasterplanId, spec: &str) -> AtomicUnit {
    engine
        .atoms(id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.spec_id.as_str() == spec)
        .unwrap()
}

/// Diamond whose B fails validation on every attempt
fn exhausting_b() -> (Vec<AtomicSpec>, Arc<ScriptedBackend>) {
    let specs = diamond();
    let code = broken(&spec_named(&specs, "B"));
    let backend = Arc::new(ScriptedBackend::new().script("B", vec![Step::Code(code); 3]));
    (specs, backend)
}

#[tokio::test]
async fn diamond_runs_wave_by_wave_to_completion() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(&backend);
    let plan = engine.plan("diamond", &diamond()).await.unwrap();
    assert_eq!(plan.total_atoms, 5);
    assert_eq!(plan.total_waves, 4);
    assert_eq!(plan.max_parallelism, 2);
    assert!(plan.rejected.is_empty());

    let report = engine.run(plan.masterplan_id).await.unwrap();
    assert!(report.finished());
    assert_eq!(report.progress.counts.completed, 5);
    assert_eq!(report.progress.current_wave, None);
    assert!((report.progress.percent_complete - 1.0).abs() < f64::EPSILON);
    assert!(report.precision.meets_target());

    let id = plan.masterplan_id;
    for (spec, wave) in [("A", 0), ("B", 1), ("C", 1), ("D", 2), ("E", 3)] {
        assert_eq!(atom_for(&engine, id, spec).await.wave_number, Some(wave), "{spec}");
    }
    let waves = engine.waves(id).await.unwrap();
    assert!(waves.iter().all(|w| w.status == WaveStatus::Completed));
    assert_eq!(backend.requests().len(), 5);

    let stored = engine.store().get_masterplan(id).await.unwrap();
    assert_eq!(stored.state, MasterplanState::Finished);
    assert!(engine.audit().verify_integrity().is_ok());
}

#[tokio::test]
async fn cyclic_batch_is_rejected_before_anything_is_stored() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(&backend);
    let specs = vec![spec("A", 1, &["B"]), spec("B", 2, &["A"])];

    let err = engine.plan("cycle", &specs).await.unwrap_err();
    assert!(err.is_cycle(), "{err}");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn unknown_masterplan_is_reported() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(&backend);
    let err = engine.run(MasterplanId::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownMasterplan(_)));
}

#[tokio::test]
async fn failed_validation_is_retried_with_feedback() {
    let specs = diamond();
    let code = broken(&spec_named(&specs, "B"));
    let backend = Arc::new(ScriptedBackend::new().script("B", vec![Step::Code(code)]));
    let engine = engine(&backend);
    let plan = engine.plan("retry", &specs).await.unwrap();

    let report = engine.run(plan.masterplan_id).await.unwrap();
    assert!(report.finished());

    let requests = backend.requests_for("B");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].attempt, 1);
    assert_eq!(requests[1].attempt, 2);
    assert!(requests[1].temperature > requests[0].temperature);
    assert!(requests[0].prompt_context.is_empty());
    assert!(!requests[1].prompt_context.is_empty());

    let b = atom_for(&engine, plan.masterplan_id, "B").await;
    let detail = engine.atom(b.id).await.unwrap();
    assert_eq!(detail.atom.status, AtomStatus::Completed);
    assert_eq!(detail.atom.attempts, 2);
    assert_eq!(detail.retries.len(), 1);
    let retry = &detail.retries[0];
    assert_eq!(retry.attempt, 2);
    assert!(retry.success, "the retry that completed B is recorded as a success");
    assert!((retry.temperature - requests[1].temperature).abs() < f64::EPSILON);
    assert_eq!(retry.prompt_variation, requests[1].prompt_context.join("\n"));
    assert_eq!(retry.error_analysis.category, ErrorCategory::Import);
    assert!(detail.validations.iter().any(|v| !v.passed));
    assert!(detail
        .transitions
        .iter()
        .any(|t| t.from == AtomStatus::Running && t.to == AtomStatus::Running));
}

#[tokio::test]
async fn generation_timeout_counts_as_a_failed_attempt() {
    let specs = diamond();
    let backend = Arc::new(ScriptedBackend::new().script("A", vec![Step::Stall(Duration::from_millis(500))]));
    let config = config().with_dispatch(DispatchConfig {
        generation_timeout_ms: 50,
        control_interval_ms: 20,
    });
    let engine = engine_with(&backend, config);
    let plan = engine.plan("timeout", &specs).await.unwrap();

    assert!(engine.run(plan.masterplan_id).await.unwrap().finished());
    let a = atom_for(&engine, plan.masterplan_id, "A").await;
    let detail = engine.atom(a.id).await.unwrap();
    assert_eq!(detail.atom.attempts, 2);
    assert_eq!(detail.retries.len(), 1);
    let retry = &detail.retries[0];
    assert!(retry.success);
    assert_eq!(retry.error_analysis.category, ErrorCategory::Timeout);
    assert!(retry.error_analysis.messages[0].contains("timed out"));
}

#[tokio::test]
async fn backend_errors_on_every_attempt_escalate() {
    let specs = diamond();
    let backend = Arc::new(ScriptedBackend::new().script("A", vec![Step::Fail(BackendError::RateLimited); 3]));
    let engine = engine(&backend);
    let plan = engine.plan("errors", &specs).await.unwrap();

    let report = engine.run(plan.masterplan_id).await.unwrap();
    assert!(report.awaiting_review());
    assert_eq!(report.progress.counts.failed, 1);
    assert_eq!(report.progress.current_wave, Some(0));
    assert_eq!(backend.requests().len(), 3);

    let a = atom_for(&engine, plan.masterplan_id, "A").await;
    assert!(a.needs_review);
    let pending = engine.pending_reviews(Some(plan.masterplan_id));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].atom_id, a.id);
}

#[tokio::test]
async fn exhausted_atom_holds_its_wave_until_regenerated() {
    let (specs, backend) = exhausting_b();
    let engine = engine(&backend);
    let plan = engine.plan("regenerate", &specs).await.unwrap();
    let id = plan.masterplan_id;

    let report = engine.run(id).await.unwrap();
    assert!(report.awaiting_review());
    assert_eq!(report.progress.counts.completed, 2);
    assert_eq!(report.progress.counts.failed, 1);
    assert_eq!(report.progress.counts.held, 1);
    assert_eq!(report.progress.current_wave, Some(1));
    assert_eq!(report.progress.pending_reviews, 1);
    assert_eq!(atom_for(&engine, id, "D").await.status, AtomStatus::Pending);

    let entry = engine.pending_reviews(Some(id)).remove(0);
    let b = atom_for(&engine, id, "B").await;
    assert_eq!(entry.atom_id, b.id);
    assert!(!entry.manual_only);

    engine.claim_review(entry.id, "alice").await.unwrap();
    let resolved = engine
        .resolve_review(entry.id, ReviewResolution::Regenerate, None, Some("try again".into()))
        .await
        .unwrap();
    assert_eq!(resolved.resolution, Some(ReviewResolution::Regenerate));
    assert_eq!(atom_for(&engine, id, "B").await.status, AtomStatus::Pending);

    let report = engine.resume(id).await.unwrap();
    assert!(report.finished());
    assert_eq!(report.progress.counts.completed, 5);
    assert_eq!(backend.requests_for("B").len(), 4);
    assert!(engine.pending_reviews(Some(id)).is_empty());
}

#[tokio::test]
async fn skipped_atom_blocks_its_dependents() {
    let (specs, backend) = exhausting_b();
    let engine = engine(&backend);
    let plan = engine.plan("skip", &specs).await.unwrap();
    let id = plan.masterplan_id;
    engine.run(id).await.unwrap();

    let entry = engine.pending_reviews(Some(id)).remove(0);
    engine.claim_review(entry.id, "alice").await.unwrap();
    engine
        .resolve_review(entry.id, ReviewResolution::Skip, None, None)
        .await
        .unwrap();

    let report = engine.resume(id).await.unwrap();
    assert!(report.finished());
    assert_eq!(atom_for(&engine, id, "B").await.status, AtomStatus::Skipped);
    assert_eq!(atom_for(&engine, id, "C").await.status, AtomStatus::Completed);
    assert_eq!(atom_for(&engine, id, "D").await.status, AtomStatus::Blocked);
    assert_eq!(atom_for(&engine, id, "E").await.status, AtomStatus::Blocked);
    assert!(!report.precision.meets_gate());
    assert_eq!(backend.requests_for("D").len(), 0);
}

#[tokio::test]
async fn edited_code_is_revalidated_and_completes_the_atom() {
    let (specs, backend) = exhausting_b();
    let engine = engine(&backend);
    let plan = engine.plan("edit", &specs).await.unwrap();
    let id = plan.masterplan_id;
    engine.run(id).await.unwrap();

    let entry = engine.pending_reviews(Some(id)).remove(0);
    engine.claim_review(entry.id, "alice").await.unwrap();
    let err = engine
        .resolve_review(entry.id, ReviewResolution::Edit, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Review(ReviewError::MissingEditedCode)));

    let b = atom_for(&engine, id, "B").await;
    let validations_before = engine.atom(b.id).await.unwrap().validations.len();
    let code = clean_python(&spec_named(&specs, "B"));
    engine
        .resolve_review(entry.id, ReviewResolution::Edit, Some(code.clone()), None)
        .await
        .unwrap();

    let detail = engine.atom(b.id).await.unwrap();
    assert_eq!(detail.atom.status, AtomStatus::Completed);
    assert_eq!(detail.atom.code.as_deref(), Some(code.as_str()));
    assert!(detail.validations.len() > validations_before);

    let err = engine
        .resolve_review(entry.id, ReviewResolution::Approve, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Review(ReviewError::NotOpen { .. })));

    let report = engine.resume(id).await.unwrap();
    assert!(report.finished());
    assert!(report.precision.meets_target());
    assert_eq!(backend.requests_for("B").len(), 3);
}

#[tokio::test]
async fn unverifiable_custom_guard_goes_straight_to_manual_review() {
    let specs = vec![spec("A", 1, &[]).with_guard(GuardConstraint::Custom {
        description: "writes an audit entry".into(),
        expected_snippet: None,
    })];
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(&backend);
    let plan = engine.plan("custom", &specs).await.unwrap();

    let report = engine.run(plan.masterplan_id).await.unwrap();
    assert!(report.awaiting_review());
    assert_eq!(backend.requests().len(), 1);

    let pending = engine.pending_reviews(None);
    assert_eq!(pending.len(), 1);
    assert!(pending[0].manual_only);
    assert_eq!(atom_for(&engine, plan.masterplan_id, "A").await.status, AtomStatus::Failed);
}

#[tokio::test]
async fn cancel_skips_undispatched_atoms_and_lets_in_flight_finish() {
    let specs = chain(4);
    let backend = Arc::new(ScriptedBackend::new().script("S0", vec![Step::Stall(Duration::from_millis(300))]));
    let engine = engine(&backend);
    let plan = engine.plan("cancel", &specs).await.unwrap();
    let id = plan.masterplan_id;

    let (report, skipped) = tokio::join!(engine.run(id), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.cancel(id).await
    });
    assert_eq!(skipped.unwrap(), 3);
    let report = report.unwrap();
    assert_eq!(report.progress.state, MasterplanState::Cancelled);
    assert_eq!(report.progress.counts.completed, 1);
    assert_eq!(report.progress.counts.skipped, 3);
    assert_eq!(backend.requests().len(), 1);

    assert!(matches!(engine.run(id).await.unwrap_err(), EngineError::Cancelled(_)));
}

#[tokio::test]
async fn cancel_during_backoff_dispatches_no_further_retry() {
    let specs = chain(2);
    let backend = Arc::new(ScriptedBackend::new().script("S0", vec![Step::Fail(BackendError::RateLimited); 3]));
    let config = config().with_retry(RetryConfig {
        backoff_base_ms: 400,
        backoff_max_ms: 1_000,
        ..RetryConfig::default()
    });
    let engine = engine_with(&backend, config);
    let plan = engine.plan("cancel-retry", &specs).await.unwrap();
    let id = plan.masterplan_id;

    let (report, skipped) = tokio::join!(engine.run(id), async {
        while backend.requests_for("S0").is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.cancel(id).await
    });
    assert_eq!(skipped.unwrap(), 1);
    let report = report.unwrap();
    assert_eq!(report.progress.state, MasterplanState::Cancelled);
    assert_eq!(backend.requests_for("S0").len(), 1);
    assert!(backend.requests_for("S1").is_empty());

    let s0 = atom_for(&engine, id, "S0").await;
    assert_eq!(s0.status, AtomStatus::Failed);
    assert!(s0.needs_review);
    assert_eq!(s0.attempts, 1);
    assert!(engine.atom(s0.id).await.unwrap().retries.is_empty());
    assert_eq!(engine.pending_reviews(Some(id)).len(), 1);
}

#[tokio::test]
async fn herd_delays_hold_no_dispatch_slot() {
    let config = config()
        .with_limiter(LimiterConfig {
            initial_limit: 1,
            min_limit: 1,
            max_limit: 4,
            ..LimiterConfig::default()
        })
        .with_herd(HerdConfig {
            batch_size: 1,
            batch_delay_ms: 150,
            max_jitter_ms: 10,
            seed: Some(3),
        });
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine_with(&backend, config);
    let plan = engine.plan("staggered", &wide(3)).await.unwrap();

    let start = tokio::time::Instant::now();
    let (report, samples) = tokio::join!(engine.run(plan.masterplan_id), async {
        let mut samples = Vec::new();
        for at in [75, 225] {
            tokio::time::sleep_until(start + Duration::from_millis(at)).await;
            samples.push((backend.requests().len(), engine.controller().status().in_flight));
        }
        samples
    });
    assert!(report.unwrap().finished());
    assert_eq!(samples, vec![(1, 0), (2, 0)]);
    assert_eq!(backend.requests().len(), 3);
    assert_eq!(engine.controller().in_flight(), 0);
}

#[tokio::test]
async fn aborted_run_does_not_leave_the_masterplan_running() {
    let store = Arc::new(InMemoryStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let first = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    let plan = first.plan("corrupt", &chain(2)).await.unwrap();
    let id = plan.masterplan_id;
    drop(first);

    let graph = store.graph_for(id).await.unwrap();
    let mut wave = store.waves(graph.id).await.unwrap().remove(0);
    wave.atom_ids.push(atomex_core::AtomId::new());
    store.update_wave(wave).await.unwrap();

    let engine = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    for _ in 0..2 {
        let err = engine.run(id).await.unwrap_err();
        assert!(
            matches!(err, EngineError::Scheduler(SchedulerError::UnknownAtom(_))),
            "{err}"
        );
    }
    assert_eq!(engine.masterplan(id).await.unwrap().state, MasterplanState::Planned);
    assert_eq!(store.get_masterplan(id).await.unwrap().state, MasterplanState::Planned);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn concurrent_runs_of_one_masterplan_are_refused() {
    let specs = chain(2);
    let backend = Arc::new(ScriptedBackend::new().script("S0", vec![Step::Stall(Duration::from_millis(100))]));
    let engine = engine(&backend);
    let plan = engine.plan("twice", &specs).await.unwrap();

    let (first, second) = tokio::join!(engine.run(plan.masterplan_id), engine.run(plan.masterplan_id));
    assert!(first.unwrap().finished());
    let err = second.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn manual_limit_override_is_bounded() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(&backend);

    assert_eq!(engine.override_limit(8).unwrap(), 16);
    assert_eq!(engine.controller().current_limit(), 8);

    let err = engine.override_limit(1).unwrap_err();
    assert!(matches!(err, EngineError::Concurrency(_)));
    assert_eq!(engine.controller().current_limit(), 8);
}

#[tokio::test]
async fn review_can_be_finished_by_a_new_engine_sharing_the_store() {
    let store = Arc::new(InMemoryStore::new());
    let (specs, backend) = exhausting_b();
    let first = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    let plan = first.plan("restart", &specs).await.unwrap();
    let id = plan.masterplan_id;
    assert!(first.run(id).await.unwrap().awaiting_review());
    drop(first);

    let backend = Arc::new(ScriptedBackend::new());
    let second = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    let progress = second.progress(id).await.unwrap();
    assert_eq!(progress.state, MasterplanState::AwaitingReview);
    assert_eq!(progress.counts.held, 1);
    assert_eq!(second.masterplan(id).await.unwrap().specs.len(), 5);

    let entry = second.pending_reviews(Some(id)).remove(0);
    second.claim_review(entry.id, "bob").await.unwrap();
    second
        .resolve_review(entry.id, ReviewResolution::Regenerate, None, None)
        .await
        .unwrap();

    let report = second.resume(id).await.unwrap();
    assert!(report.finished());
    assert_eq!(report.progress.counts.completed, 5);
    assert_eq!(backend.requests().len(), 3, "only B, D and E run after the restart");
}

#[tokio::test]
async fn interrupted_dispatch_is_requeued_on_load() {
    let store = Arc::new(InMemoryStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let first = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    let plan = first.plan("crash", &chain(2)).await.unwrap();
    let id = plan.masterplan_id;

    let mut s0 = atom_for(&first, id, "S0").await;
    s0.status = AtomStatus::Running;
    store.put_atom(s0.clone()).await.unwrap();
    drop(first);

    let second = engine(&backend).with_store(Arc::clone(&store) as Arc<dyn ExecutionStore>);
    let report = second.resume(id).await.unwrap();
    assert!(report.finished());
    assert!(second
        .audit()
        .history(s0.id)
        .iter()
        .any(|t| t.from == AtomStatus::Running && t.to == AtomStatus::Ready));
}

#[tokio::test]
async fn wave_precision_covers_only_that_wave() {
    let (specs, backend) = exhausting_b();
    let engine = engine(&backend);
    let plan = engine.plan("precision", &specs).await.unwrap();
    engine.run(plan.masterplan_id).await.unwrap();

    let first = engine.wave_precision(plan.masterplan_id, 0).await.unwrap();
    let second = engine.wave_precision(plan.masterplan_id, 1).await.unwrap();
    assert!(first.meets_target());
    assert!(second.composite < first.composite);
    assert!(engine.wave_precision(plan.masterplan_id, 9).await.is_err());
}

#[tokio::test]
async fn engine_accepts_a_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[limiter]\ninitial_limit = 4\nmin_limit = 1\nmax_limit = 8\n\n[retry]\nmax_attempts = 2").unwrap();
    let config = EngineConfig::from_path(file.path()).unwrap();
    assert_eq!(config.retry.max_attempts, 2);

    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine_with(&backend, config);
    assert_eq!(engine.controller().current_limit(), 4);

    let mut bad = EngineConfig::default();
    bad.limiter.min_limit = 0;
    let err = ExecutionEngine::new(bad, Arc::clone(&backend) as Arc<dyn GenerationBackend>).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn small_clean_simulation_passes() {
    let report = run_simulator(SimulatorConfig {
        seed: 3,
        atoms: 24,
        width: 6,
        failure_rate: 0.0,
        backend_error_rate: 0.0,
        guard_rate: 0.0,
        overload_rate: 0.0,
        ..SimulatorConfig::default()
    })
    .await;
    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(report.stats.completed, 24);
    assert_eq!(report.stats.generation_calls, 24);
    assert!(report.generate_text().contains("Result: PASS"));
}

#[tokio::test]
async fn noisy_simulation_keeps_engine_invariants() {
    let report = run_simulator(SimulatorConfig {
        seed: 11,
        atoms: 40,
        width: 5,
        failure_rate: 0.3,
        backend_error_rate: 0.1,
        ..SimulatorConfig::default()
    })
    .await;
    assert!(report.violations.is_empty(), "{}", report.generate_text());
    assert!(report.stats.retries > 0);
    assert_eq!(
        report.stats.completed + report.stats.failed + report.stats.blocked + report.stats.skipped,
        40
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn prop_simulated_runs_keep_wave_order(seed in 0u64..1_000, atoms in 4usize..24, width in 1usize..6) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let report = runtime.block_on(run_simulator(SimulatorConfig {
            seed,
            atoms,
            width,
            failure_rate: 0.25,
            backend_error_rate: 0.1,
            max_latency_ms: 1,
            ..SimulatorConfig::default()
        }));
        prop_assert!(
            !report.violations.iter().any(|v| matches!(v, Violation::WaveOrder { .. } | Violation::StillRunning { .. })),
            "{}",
            report.generate_text()
        );
        prop_assert_eq!(
            report.stats.completed + report.stats.failed + report.stats.blocked + report.stats.skipped,
            atoms
        );
    }
}
