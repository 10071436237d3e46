//! Execution engine
//!
//! Owns loaded masterplans and drives them wave by wave: prepare the wave,
//! admit its ready atoms through the backpressure queue, hand each to a
//! worker under a dispatch permit, and fold outcomes back into the tracker,
//! the review queue and the store.

use crate::error::{EngineError, Result};
use crate::progress::{AtomDetail, MasterplanProgress, PlanSummary, RunReport};
use crate::worker::{store_failed, AtomRun, DependencySnapshot, Dispatch, Worker};
use atomex_atomizer::Atomizer;
use atomex_concurrency::{
    BackpressureQueue, ConcurrencyController, DispatchPermit, IdleMetricsSource, MetricsSource,
};
use atomex_core::{
    AtomId, AtomStatus, AtomicSpec, AtomicUnit, DependencyGraphRecord, EngineConfig, ExecutionStore,
    ExecutionWave, GenerationBackend, HumanReviewQueueEntry, InMemoryStore, Masterplan, MasterplanId,
    MasterplanState, PatternStore, PrecisionPolicy, ReviewId, ReviewResolution, SpecId, TransitionLog,
    ValidationResult,
};
use atomex_scheduler::{DependencyGraph, WaveTracker};
use atomex_validation::{
    AcceptanceTestRunner, AtomOutcome, AtomValidator, DependencyView, HumanReviewQueue, PrecisionScore,
    RepairAgent, RetryPlanner, ReviewError, StructuralTestRunner, ValidationContext, ValidationPipeline,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Runtime state of one loaded masterplan
struct PlanRun {
    id: MasterplanId,
    masterplan: Mutex<Masterplan>,
    specs: HashMap<AtomId, AtomicSpec>,
    tracker: Mutex<WaveTracker>,
    reviews: HumanReviewQueue,
    /// Latest all-levels verdict per atom
    levels: DashMap<AtomId, bool>,
    cancel: watch::Sender<bool>,
    running: AtomicBool,
}

impl PlanRun {
    fn new(masterplan: Masterplan, tracker: WaveTracker, reviews: HumanReviewQueue) -> Result<Self> {
        let by_spec: HashMap<&SpecId, &AtomicSpec> = masterplan.specs.iter().map(|s| (&s.id, s)).collect();
        let mut specs = HashMap::new();
        for atom in tracker.atoms() {
            let spec = by_spec.get(&atom.spec_id).ok_or_else(|| EngineError::Inconsistent {
                id: masterplan.id,
                reason: format!("no spec {} for atom {}", atom.spec_id, atom.id),
            })?;
            specs.insert(atom.id, (*spec).clone());
        }
        let (cancel, _) = watch::channel(masterplan.state == MasterplanState::Cancelled);
        Ok(Self {
            id: masterplan.id,
            masterplan: Mutex::new(masterplan),
            specs,
            tracker: Mutex::new(tracker),
            reviews,
            levels: DashMap::new(),
            cancel,
            running: AtomicBool::new(false),
        })
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn set_state(&self, state: MasterplanState) -> Masterplan {
        let mut masterplan = self.masterplan.lock();
        if masterplan.state != state {
            info!(masterplan_id = %self.id, from = ?masterplan.state, to = ?state, "Masterplan state changed");
            masterplan.state = state;
        }
        masterplan.clone()
    }
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ready atom waiting for admission
#[derive(Debug)]
struct Queued {
    atom: AtomId,
    /// Earliest admission, from the herd plan
    due: Instant,
}

/// Plans, runs and supervises masterplans
pub struct ExecutionEngine {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    backend: Arc<dyn GenerationBackend>,
    tests: Arc<dyn AcceptanceTestRunner>,
    patterns: Option<Arc<dyn PatternStore>>,
    controller: Arc<ConcurrencyController>,
    atomizer: Atomizer,
    plans: DashMap<MasterplanId, Arc<PlanRun>>,
    audit: Arc<TransitionLog>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("plans", &self.plans.len())
            .field("limit", &self.controller.current_limit())
            .field("patterns", &self.patterns.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Engine with an in-memory store, no pattern store, an idle metrics
    /// source and the structural acceptance runner
    pub fn new(config: EngineConfig, backend: Arc<dyn GenerationBackend>) -> Result<Self> {
        config.validate()?;
        let controller = ConcurrencyController::new(&config, Arc::new(IdleMetricsSource));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            atomizer: Atomizer::new(config.atomizer.clone()),
            config,
            store: Arc::new(InMemoryStore::new()),
            backend,
            tests: Arc::new(StructuralTestRunner),
            patterns: None,
            controller,
            plans: DashMap::new(),
            audit: Arc::new(TransitionLog::new()),
            shutdown,
        })
    }

    /// Persist into `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    /// Learn and reuse guard and error patterns
    #[must_use]
    pub fn with_patterns(mut self, patterns: Arc<dyn PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Drive the concurrency limit from `source`
    #[must_use]
    pub fn with_metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.controller = ConcurrencyController::new(&self.config, source);
        self
    }

    /// Run acceptance tests with `runner`
    #[must_use]
    pub fn with_test_runner(mut self, runner: Arc<dyn AcceptanceTestRunner>) -> Self {
        self.tests = runner;
        self
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared concurrency controller
    #[must_use]
    pub fn controller(&self) -> &Arc<ConcurrencyController> {
        &self.controller
    }

    /// Status transitions of every atom this engine touched
    #[must_use]
    pub fn audit(&self) -> &Arc<TransitionLog> {
        &self.audit
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Start the periodic limit evaluation; stopped by [`Self::shutdown`]
    pub fn spawn_control_loop(&self) -> JoinHandle<()> {
        self.controller
            .spawn_control_loop(self.config.dispatch.control_interval(), self.shutdown.subscribe())
    }

    /// Stop background loops
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Plan with the global precision policy
    pub async fn plan(&self, name: &str, specs: &[AtomicSpec]) -> Result<PlanSummary> {
        self.plan_with(name, specs, self.config.precision.clone()).await
    }

    /// Validate specs, build and persist the graph and its waves
    ///
    /// Nothing is stored when the batch is rejected.
    pub async fn plan_with(&self, name: &str, specs: &[AtomicSpec], precision: PrecisionPolicy) -> Result<PlanSummary> {
        precision.validate()?;
        let batch = self.atomizer.prepare(specs)?;
        let masterplan = Masterplan::new(name, precision).with_specs(batch.specs.clone());
        let (graph, atoms) = DependencyGraph::build(masterplan.id, &batch, self.config.retry.max_attempts)?;
        let graph = Arc::new(graph);
        let record = graph.record();

        self.store.put_masterplan(masterplan.clone()).await?;
        for atom in &atoms {
            self.store.put_atom(atom.clone()).await?;
        }
        self.store.put_graph(record.clone()).await?;
        for edge in graph.edges() {
            self.store.insert_dependency(edge.clone()).await?;
        }

        let tracker = WaveTracker::new(Arc::clone(&graph), atoms, Arc::clone(&self.audit))?;
        for wave in tracker.waves() {
            self.store.insert_wave(wave.clone()).await?;
        }

        let summary = PlanSummary {
            masterplan_id: masterplan.id,
            graph_id: record.id,
            total_atoms: record.total_atoms,
            total_waves: record.total_waves,
            max_parallelism: record.max_parallelism,
            rejected: batch.rejected,
        };
        let plan = PlanRun::new(masterplan, tracker, HumanReviewQueue::new())?;
        self.plans.insert(summary.masterplan_id, Arc::new(plan));
        info!(
            masterplan_id = %summary.masterplan_id,
            atoms = summary.total_atoms,
            waves = summary.total_waves,
            max_parallelism = summary.max_parallelism,
            rejected = summary.rejected.len(),
            "Masterplan planned"
        );
        Ok(summary)
    }

    /// Execute waves until the masterplan finishes, waits on review or is
    /// cancelled
    pub async fn run(&self, id: MasterplanId) -> Result<RunReport> {
        let plan = self.loaded(id).await?;
        if plan.is_cancelled() {
            return Err(EngineError::Cancelled(id));
        }
        if plan.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning(id));
        }
        let _guard = RunGuard(&plan.running);
        let previous = plan.masterplan.lock().state;
        self.persist_masterplan(plan.set_state(MasterplanState::Running)).await;

        let worker = self.worker(&plan);
        if let Err(e) = self.drive_waves(&plan, &worker).await {
            error!(masterplan_id = %id, error = %e, "Run aborted");
            self.persist_masterplan(plan.set_state(previous)).await;
            return Err(e);
        }

        let state = {
            let tracker = plan.tracker.lock();
            if plan.is_cancelled() {
                MasterplanState::Cancelled
            } else if tracker.is_finished() {
                MasterplanState::Finished
            } else {
                MasterplanState::AwaitingReview
            }
        };
        self.persist_masterplan(plan.set_state(state)).await;
        let report = RunReport {
            progress: self.progress_of(&plan),
            precision: self.precision_of(&plan, None).await,
        };
        info!(
            masterplan_id = %id,
            state = ?report.progress.state,
            completed = report.progress.counts.completed,
            failed = report.progress.counts.failed,
            held = report.progress.counts.held,
            composite = report.precision.composite,
            "Run ended"
        );
        Ok(report)
    }

    /// Prepare and execute open waves until one is held open or none remain
    async fn drive_waves(&self, plan: &Arc<PlanRun>, worker: &Arc<Worker>) -> Result<()> {
        loop {
            if plan.is_cancelled() {
                return Ok(());
            }
            let Some(wave) = plan.tracker.lock().next_open_wave() else {
                return Ok(());
            };
            let ready = plan.tracker.lock().prepare_wave(wave)?;
            self.persist_wave(plan, wave).await;
            if !ready.is_empty() {
                self.execute_wave(plan, worker, wave, ready).await?;
                self.persist_wave(plan, wave).await;
            }
            let terminal = plan.tracker.lock().wave(wave)?.status.is_terminal();
            if !terminal {
                debug!(masterplan_id = %plan.id, wave, "Wave held open by review");
                return Ok(());
            }
        }
    }

    /// Continue a masterplan, loading it from the store when needed
    pub async fn resume(&self, id: MasterplanId) -> Result<RunReport> {
        self.run(id).await
    }

    /// Stop admitting dispatches and skip every atom not yet dispatched
    ///
    /// In-flight atoms finish. Returns how many atoms were skipped.
    pub async fn cancel(&self, id: MasterplanId) -> Result<usize> {
        let plan = self.loaded(id).await?;
        plan.cancel.send_replace(true);
        let skipped = plan.tracker.lock().cancel();
        self.persist_atoms(&plan).await;
        self.persist_masterplan(plan.set_state(MasterplanState::Cancelled)).await;
        Ok(skipped)
    }

    async fn execute_wave(&self, plan: &Arc<PlanRun>, worker: &Arc<Worker>, wave: u32, ready: Vec<AtomId>) -> Result<()> {
        let started = Instant::now();
        let slots = self.controller.herd().plan(ready.len());
        let mut backlog: Vec<Queued> = ready
            .into_iter()
            .zip(slots)
            .map(|(atom, slot)| Queued {
                atom,
                due: started + slot.delay,
            })
            .collect();
        backlog.sort_by_key(|job| job.due);
        let mut backlog = VecDeque::from(backlog);
        let queue = BackpressureQueue::new(self.config.queue.capacity, Arc::clone(self.controller.gate()));
        let mut cancel = plan.cancel.subscribe();
        let mut workers: JoinSet<AtomRun> = JoinSet::new();
        info!(masterplan_id = %plan.id, wave, atoms = backlog.len(), "Dispatching wave");

        loop {
            let cancelled = *cancel.borrow();
            let now = Instant::now();
            if cancelled {
                let dropped = queue.drain().len() + backlog.len();
                backlog.clear();
                if dropped > 0 {
                    debug!(wave, dropped, "Cancelled before admission");
                }
            } else {
                while backlog.front().is_some_and(|job| job.due <= now) {
                    let Some(job) = backlog.pop_front() else { break };
                    if let Err(full) = queue.try_enqueue(job) {
                        backlog.push_front(full.item);
                        break;
                    }
                }
                while let Some((job, permit)) = queue.try_dequeue() {
                    self.dispatch(plan, worker, job, permit, &mut workers);
                }
            }

            if workers.is_empty() && (cancelled || (queue.is_empty() && backlog.is_empty())) {
                break;
            }
            let next_due = backlog.front().map_or(now, |job| job.due);

            tokio::select! {
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok(run) => self.finish(plan, run).await?,
                    Err(e) => error!(wave, error = %e, "Worker task aborted"),
                },
                Some((job, permit)) = queue.dequeue(), if !cancelled && !queue.is_empty() => {
                    self.dispatch(plan, worker, job, permit, &mut workers);
                }
                () = tokio::time::sleep_until(next_due), if !cancelled && next_due > now => {}
                changed = cancel.changed(), if !cancelled => {
                    if changed.is_err() {
                        warn!(wave, "Cancel channel closed");
                    }
                }
                else => break,
            }
        }
        Ok(())
    }

    /// READY -> RUNNING and spawn the worker
    fn dispatch(
        &self,
        plan: &Arc<PlanRun>,
        worker: &Arc<Worker>,
        job: Queued,
        permit: DispatchPermit,
        workers: &mut JoinSet<AtomRun>,
    ) {
        let Some(spec) = plan.specs.get(&job.atom).cloned() else {
            error!(atom_id = %job.atom, "No spec for atom, not dispatching");
            return;
        };
        let (atom, dependencies) = {
            let mut tracker = plan.tracker.lock();
            let atom = match tracker.take_for_dispatch(job.atom) {
                Ok(atom) => atom,
                Err(e) => {
                    debug!(atom_id = %job.atom, error = %e, "Atom no longer dispatchable");
                    return;
                }
            };
            let graph = Arc::clone(tracker.graph());
            let dependencies = graph
                .prerequisites(job.atom)
                .filter_map(|p| {
                    let prereq = tracker.atom(p)?;
                    let edge = graph.edges().iter().find(|e| e.from_atom == job.atom && e.to_atom == p)?;
                    Some(DependencySnapshot {
                        spec: plan.specs.get(&p)?.clone(),
                        status: prereq.status,
                        needs_review: prereq.needs_review,
                        dependency_type: edge.dependency_type,
                    })
                })
                .collect();
            (atom, dependencies)
        };
        debug!(atom_id = %atom.id, "Dispatched atom");
        workers.spawn(Arc::clone(worker).execute(Dispatch {
            atom,
            spec,
            dependencies,
            permit,
        }));
    }

    /// Fold a worker outcome into the review queue, tracker and store
    async fn finish(&self, plan: &Arc<PlanRun>, run: AtomRun) -> Result<()> {
        let AtomRun {
            atom,
            review,
            all_levels_passed,
            reason,
        } = run;
        if let Some(entry) = review {
            let (entry, created) = plan.reviews.escalate(entry);
            if created {
                if let Err(e) = self.store.put_review(entry).await {
                    store_failed("put_review", &e);
                }
            }
        }
        plan.levels.insert(atom.id, all_levels_passed);
        plan.tracker.lock().record_outcome(atom, &reason)?;
        self.persist_atoms(plan).await;
        Ok(())
    }

    fn worker(&self, plan: &PlanRun) -> Arc<Worker> {
        let mut validator = AtomValidator::new(self.config.atomizer.clone(), self.config.review.clone());
        let mut planner = RetryPlanner::new(self.config.retry.clone());
        if let Some(patterns) = &self.patterns {
            validator = validator.with_repair(RepairAgent::new().with_patterns(Arc::clone(patterns)));
            planner = planner.with_patterns(Arc::clone(patterns));
        }
        Arc::new(Worker {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            controller: Arc::clone(&self.controller),
            validator,
            planner,
            audit: Arc::clone(&self.audit),
            timeout: self.config.dispatch.generation_timeout(),
            cancel: plan.cancel.subscribe(),
        })
    }

    /// Loaded plan, or rebuilt from the store
    async fn loaded(&self, id: MasterplanId) -> Result<Arc<PlanRun>> {
        if let Some(plan) = self.plans.get(&id) {
            return Ok(Arc::clone(plan.value()));
        }
        let plan = Arc::new(self.load(id).await?);
        Ok(Arc::clone(self.plans.entry(id).or_insert(plan).value()))
    }

    async fn load(&self, id: MasterplanId) -> Result<PlanRun> {
        let masterplan = match self.store.get_masterplan(id).await {
            Ok(m) => m,
            Err(atomex_core::StoreError::NotFound { .. }) => return Err(EngineError::UnknownMasterplan(id)),
            Err(e) => return Err(e.into()),
        };
        let record = self.store.graph_for(id).await?;
        let edges = self.store.dependencies(record.id).await?;
        let mut atoms = self.store.atoms(id).await?;
        for atom in &mut atoms {
            if atom.status == AtomStatus::Running {
                self.audit
                    .record(atom.id, AtomStatus::Running, AtomStatus::Ready, "interrupted dispatch re-queued");
                atom.status = AtomStatus::Ready;
            }
        }
        let graph = Arc::new(DependencyGraph::from_parts(record.id, id, &atoms, edges)?);
        let mut waves = self.store.waves(record.id).await?;
        if waves.is_empty() {
            waves = graph.execution_waves();
        }
        waves.sort_by_key(|w| w.wave_number);

        let mut levels = Vec::with_capacity(atoms.len());
        for atom in &atoms {
            levels.push((atom.id, all_levels_passed(&self.store.validations(atom.id).await?)));
        }
        let reviews = HumanReviewQueue::restore(self.store.reviews(id).await?);
        let by_id = atoms.into_iter().map(|a| (a.id, a)).collect();
        let tracker = WaveTracker::restore(graph, by_id, waves, Arc::clone(&self.audit));
        let plan = PlanRun::new(masterplan, tracker, reviews)?;
        for (atom, passed) in levels {
            plan.levels.insert(atom, passed);
        }
        info!(masterplan_id = %id, "Masterplan loaded from store");
        Ok(plan)
    }

    /// Masterplan row
    pub async fn masterplan(&self, id: MasterplanId) -> Result<Masterplan> {
        Ok(self.loaded(id).await?.masterplan.lock().clone())
    }

    /// Counts, current wave and concurrency status
    pub async fn progress(&self, id: MasterplanId) -> Result<MasterplanProgress> {
        let plan = self.loaded(id).await?;
        Ok(self.progress_of(&plan))
    }

    fn progress_of(&self, plan: &PlanRun) -> MasterplanProgress {
        let masterplan = plan.masterplan.lock().clone();
        let tracker = plan.tracker.lock();
        let counts = tracker.counts();
        let total = counts.total();
        let settled = tracker
            .atoms()
            .iter()
            .filter(|a| a.status.is_terminal() && !a.needs_review)
            .count();
        MasterplanProgress {
            masterplan_id: masterplan.id,
            name: masterplan.name,
            state: masterplan.state,
            counts,
            total_atoms: total,
            total_waves: tracker.waves().len(),
            current_wave: tracker.next_open_wave(),
            percent_complete: if total == 0 { 1.0 } else { settled as f64 / total as f64 },
            pending_reviews: plan.reviews.open_count(),
            concurrency: self.controller.status(),
        }
    }

    /// Graph row with its cached projection
    pub async fn graph(&self, id: MasterplanId) -> Result<DependencyGraphRecord> {
        Ok(self.loaded(id).await?.tracker.lock().graph().record())
    }

    /// Every wave aggregate
    pub async fn waves(&self, id: MasterplanId) -> Result<Vec<ExecutionWave>> {
        Ok(self.loaded(id).await?.tracker.lock().waves().to_vec())
    }

    /// One wave aggregate
    pub async fn wave(&self, id: MasterplanId, number: u32) -> Result<ExecutionWave> {
        Ok(self.loaded(id).await?.tracker.lock().wave(number)?.clone())
    }

    /// Atoms in wave order
    pub async fn atoms(&self, id: MasterplanId) -> Result<Vec<AtomicUnit>> {
        Ok(self
            .loaded(id)
            .await?
            .tracker
            .lock()
            .atoms()
            .into_iter()
            .cloned()
            .collect())
    }

    /// Atom with its validation, retry, review and transition history
    pub async fn atom(&self, atom_id: AtomId) -> Result<AtomDetail> {
        let plan = self.plan_of_atom(atom_id).await?;
        let atom = plan
            .tracker
            .lock()
            .atom(atom_id)
            .cloned()
            .ok_or(EngineError::UnknownAtom(atom_id))?;
        let review = plan
            .reviews
            .open_for(atom_id)
            .or_else(|| plan.reviews.entries(plan.id).into_iter().rev().find(|e| e.atom_id == atom_id));
        Ok(AtomDetail {
            validations: self.store.validations(atom_id).await?,
            retries: self.store.retries(atom_id).await?,
            transitions: self.audit.history(atom_id),
            review,
            atom,
        })
    }

    async fn plan_of_atom(&self, atom_id: AtomId) -> Result<Arc<PlanRun>> {
        let loaded = self
            .plans
            .iter()
            .find(|p| p.tracker.lock().atom(atom_id).is_some())
            .map(|p| Arc::clone(p.value()));
        if let Some(plan) = loaded {
            return Ok(plan);
        }
        match self.store.get_atom(atom_id).await {
            Ok(atom) => self.loaded(atom.masterplan_id).await,
            Err(_) => Err(EngineError::UnknownAtom(atom_id)),
        }
    }

    /// Composite precision for a masterplan
    pub async fn precision(&self, id: MasterplanId) -> Result<PrecisionScore> {
        let plan = self.loaded(id).await?;
        Ok(self.precision_of(&plan, None).await)
    }

    /// Composite precision for one wave
    pub async fn wave_precision(&self, id: MasterplanId, wave: u32) -> Result<PrecisionScore> {
        let plan = self.loaded(id).await?;
        plan.tracker.lock().wave(wave)?;
        Ok(self.precision_of(&plan, Some(wave)).await)
    }

    async fn precision_of(&self, plan: &PlanRun, wave: Option<u32>) -> PrecisionScore {
        let atoms: Vec<AtomicUnit> = plan
            .tracker
            .lock()
            .atoms()
            .into_iter()
            .filter(|a| wave.map_or(true, |w| a.wave_number == Some(w)))
            .cloned()
            .collect();
        let mut tests = Vec::new();
        let mut outcomes = Vec::with_capacity(atoms.len());
        for atom in &atoms {
            let all_levels_passed = plan.levels.get(&atom.id).is_some_and(|v| *v);
            if let Some(spec) = plan.specs.get(&atom.id) {
                tests.extend(self.tests.run(spec, atom, all_levels_passed).await);
            }
            outcomes.push(AtomOutcome {
                succeeded: atom.status.is_success(),
                all_levels_passed,
            });
        }
        let policy = plan.masterplan.lock().precision.clone();
        PrecisionScore::compute(&policy, &tests, &outcomes)
    }

    /// Pending review entries, most urgent first, optionally for one masterplan
    #[must_use]
    pub fn pending_reviews(&self, masterplan: Option<MasterplanId>) -> Vec<HumanReviewQueueEntry> {
        let mut pending: Vec<HumanReviewQueueEntry> = self
            .plans
            .iter()
            .filter(|p| masterplan.map_or(true, |m| p.id == m))
            .flat_map(|p| p.reviews.pending(masterplan))
            .collect();
        pending.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        pending
    }

    /// Take a review entry
    pub async fn claim_review(&self, id: ReviewId, assignee: &str) -> Result<HumanReviewQueueEntry> {
        let plan = self.plan_of_review(id)?;
        let entry = plan.reviews.claim(id, assignee)?;
        if let Err(e) = self.store.put_review(entry.clone()).await {
            store_failed("put_review", &e);
        }
        info!(review_id = %id, assignee, "Review claimed");
        Ok(entry)
    }

    /// Apply a reviewer decision to the held atom and close the entry
    ///
    /// Edited code is re-validated and recorded; regenerated atoms run again
    /// on the next [`Self::resume`].
    pub async fn resolve_review(
        &self,
        id: ReviewId,
        resolution: ReviewResolution,
        edited_code: Option<String>,
        feedback: Option<String>,
    ) -> Result<HumanReviewQueueEntry> {
        let plan = self.plan_of_review(id)?;
        let entry = plan.reviews.get(id).ok_or(EngineError::UnknownReview(id))?;
        if !entry.status.is_open() {
            return Err(ReviewError::NotOpen { id, status: entry.status }.into());
        }
        if resolution == ReviewResolution::Edit && edited_code.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(ReviewError::MissingEditedCode.into());
        }

        let status = plan
            .tracker
            .lock()
            .resolve_review(entry.atom_id, resolution, edited_code.clone())?;
        let resolved = plan.reviews.resolve(id, resolution, edited_code.clone(), feedback)?;
        if let Err(e) = self.store.put_review(resolved.clone()).await {
            store_failed("put_review", &e);
        }

        match (resolution, edited_code) {
            (ReviewResolution::Edit, Some(code)) => self.revalidate(&plan, entry.atom_id, &code).await,
            (ReviewResolution::Regenerate, _) => {
                plan.levels.remove(&entry.atom_id);
            }
            _ => {}
        }
        self.persist_atoms(&plan).await;
        if plan.reviews.open_count() == 0 && plan.masterplan.lock().state == MasterplanState::AwaitingReview {
            self.persist_masterplan(plan.set_state(MasterplanState::Running)).await;
        }
        info!(review_id = %id, atom_id = %entry.atom_id, ?resolution, %status, "Review applied");
        Ok(resolved)
    }

    /// Run the validation levels over reviewer-edited code
    async fn revalidate(&self, plan: &PlanRun, atom_id: AtomId, code: &str) {
        let Some(spec) = plan.specs.get(&atom_id) else { return };
        let report = {
            let tracker = plan.tracker.lock();
            let Some(atom) = tracker.atom(atom_id) else { return };
            let graph = tracker.graph();
            let snapshots: Vec<(AtomicSpec, AtomStatus, bool, atomex_core::DependencyType)> = graph
                .edges()
                .iter()
                .filter(|e| e.from_atom == atom_id)
                .filter_map(|e| {
                    let prereq = tracker.atom(e.to_atom)?;
                    Some((plan.specs.get(&e.to_atom)?.clone(), prereq.status, prereq.needs_review, e.dependency_type))
                })
                .collect();
            let views: Vec<DependencyView<'_>> = snapshots
                .iter()
                .map(|(spec, status, needs_review, dependency_type)| DependencyView {
                    spec,
                    status: *status,
                    needs_review: *needs_review,
                    dependency_type: *dependency_type,
                })
                .collect();
            ValidationPipeline::new(self.config.atomizer.clone()).run(&ValidationContext {
                spec,
                atom,
                code,
                dependencies: &views,
            })
        };
        plan.levels.insert(atom_id, report.all_passed());
        for result in report.results {
            if let Err(e) = self.store.append_validation(result).await {
                store_failed("append_validation", &e);
            }
        }
    }

    fn plan_of_review(&self, id: ReviewId) -> Result<Arc<PlanRun>> {
        self.plans
            .iter()
            .find(|p| p.reviews.get(id).is_some())
            .map(|p| Arc::clone(p.value()))
            .ok_or(EngineError::UnknownReview(id))
    }

    /// Manual concurrency limit; returns the previous limit
    pub fn override_limit(&self, limit: usize) -> Result<usize> {
        let previous = self.controller.override_limit(limit)?;
        info!(previous, limit, "Concurrency limit overridden");
        Ok(previous)
    }

    async fn persist_masterplan(&self, masterplan: Masterplan) {
        if let Err(e) = self.store.put_masterplan(masterplan).await {
            store_failed("put_masterplan", &e);
        }
    }

    async fn persist_wave(&self, plan: &PlanRun, wave: u32) {
        let row = plan.tracker.lock().wave(wave).ok().cloned();
        if let Some(row) = row {
            if let Err(e) = self.store.update_wave(row).await {
                store_failed("update_wave", &e);
            }
        }
    }

    /// Write every atom and wave row from the tracker
    async fn persist_atoms(&self, plan: &PlanRun) {
        let (atoms, waves): (Vec<AtomicUnit>, Vec<ExecutionWave>) = {
            let tracker = plan.tracker.lock();
            (tracker.atoms().into_iter().cloned().collect(), tracker.waves().to_vec())
        };
        for atom in atoms {
            if let Err(e) = self.store.put_atom(atom).await {
                store_failed("put_atom", &e);
            }
        }
        for wave in waves {
            if let Err(e) = self.store.update_wave(wave).await {
                store_failed("update_wave", &e);
            }
        }
    }
}

/// Whether the latest result of every level passed
fn all_levels_passed(results: &[ValidationResult]) -> bool {
    let mut latest = [None; 4];
    for result in results {
        latest[usize::from(result.level.as_u8() - 1)] = Some(result.passed);
    }
    latest.iter().all(|passed| *passed == Some(true))
}
