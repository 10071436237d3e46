//! Per-atom attempt loop
//!
//! A worker owns one RUNNING atom from dispatch to its terminal outcome:
//! generate under a permit and a timeout, validate, then either conclude or
//! plan a retry, back off and re-acquire a permit. Cancellation stops retries
//! from being dispatched.

use atomex_concurrency::{ConcurrencyController, DispatchPermit};
use atomex_core::{
    next_status, AtomEvent, AtomStatus, AtomicSpec, AtomicUnit, BackendError, DependencyType,
    ExecutionStore, GenerationBackend, GenerationOutput, GenerationRequest, HumanReviewQueueEntry, TransitionLog,
    ValidationResult,
};
use atomex_validation::{
    analyze_backend_error, confidence, review_priority, AtomValidator, AttemptRecord, Decision, DependencyView,
    RetryPlan, RetryPlanner, Verdict,
};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Prerequisite state captured at dispatch time
#[derive(Debug, Clone)]
pub(crate) struct DependencySnapshot {
    pub(crate) spec: AtomicSpec,
    pub(crate) status: AtomStatus,
    pub(crate) needs_review: bool,
    pub(crate) dependency_type: DependencyType,
}

impl DependencySnapshot {
    fn view(&self) -> DependencyView<'_> {
        DependencyView {
            spec: &self.spec,
            status: self.status,
            needs_review: self.needs_review,
            dependency_type: self.dependency_type,
        }
    }
}

/// One atom handed to a worker
pub(crate) struct Dispatch {
    pub(crate) atom: AtomicUnit,
    pub(crate) spec: AtomicSpec,
    pub(crate) dependencies: Vec<DependencySnapshot>,
    /// Permit for the first attempt
    pub(crate) permit: DispatchPermit,
}

/// Terminal outcome reported back to the tracker
#[derive(Debug)]
pub(crate) struct AtomRun {
    pub(crate) atom: AtomicUnit,
    pub(crate) review: Option<HumanReviewQueueEntry>,
    pub(crate) all_levels_passed: bool,
    pub(crate) reason: String,
}

pub(crate) struct Worker {
    pub(crate) backend: Arc<dyn GenerationBackend>,
    pub(crate) store: Arc<dyn ExecutionStore>,
    pub(crate) controller: Arc<ConcurrencyController>,
    pub(crate) validator: AtomValidator,
    pub(crate) planner: RetryPlanner,
    pub(crate) audit: Arc<TransitionLog>,
    pub(crate) timeout: Duration,
    /// Masterplan cancel flag
    pub(crate) cancel: watch::Receiver<bool>,
}

impl Worker {
    /// Drive one atom to a terminal outcome; a panic fails only this atom
    pub(crate) async fn execute(self: Arc<Self>, dispatch: Dispatch) -> AtomRun {
        let fallback = dispatch.atom.clone();
        match AssertUnwindSafe(self.attempt_loop(dispatch)).catch_unwind().await {
            Ok(run) => run,
            Err(_) => {
                error!(atom_id = %fallback.id, "Worker panicked, escalating atom");
                escalate_failure(fallback, 1, "worker panicked".to_string(), Vec::new())
            }
        }
    }

    async fn attempt_loop(&self, dispatch: Dispatch) -> AtomRun {
        let Dispatch {
            mut atom,
            spec,
            dependencies,
            permit,
        } = dispatch;
        let views: Vec<DependencyView<'_>> = dependencies.iter().map(DependencySnapshot::view).collect();

        let mut permit = Some(permit);
        // Set while the current attempt is a retry
        let mut retry: Option<RetryPlan> = None;

        loop {
            let held = match permit.take() {
                Some(p) => p,
                None => match self.acquire_unless_cancelled().await {
                    Some(p) => p,
                    None => return retry_cancelled(atom),
                },
            };
            atom.attempts += 1;
            let (prompt_context, temperature) = retry.as_ref().map_or_else(
                || (Vec::new(), self.planner.config().temperature_for(1)),
                |plan| (plan.prompt_context.clone(), plan.temperature),
            );
            debug!(atom_id = %atom.id, attempt = atom.attempts, temperature, "Generating atom");
            let generated = self
                .generate(GenerationRequest {
                    spec: spec.clone(),
                    prompt_context,
                    temperature,
                    attempt: atom.attempts,
                })
                .await;
            drop(held);

            let (analysis, record) = match generated {
                Ok(output) => {
                    let verdict = self.validator.evaluate(&spec, &atom, &output.code, &views).await;
                    self.persist_results(&verdict.results).await;
                    verdict.apply_to(&mut atom);
                    let Decision::Retry { analysis } = &verdict.decision else {
                        let completed = verdict.status() == AtomStatus::Completed;
                        if let Some(plan) = retry.take() {
                            if completed {
                                self.planner
                                    .learn_fix(&spec, plan.analysis.category, plan.analysis.suggestions.join("; "))
                                    .await;
                            }
                            self.close_retry(&atom, plan, attempt_record(output), completed).await;
                        }
                        return conclude(atom, &verdict);
                    };
                    (analysis.clone(), attempt_record(output))
                }
                Err(e) => {
                    warn!(atom_id = %atom.id, attempt = atom.attempts, error = %e, "Generation failed");
                    let analysis = analyze_backend_error(&e);
                    let record = AttemptRecord {
                        error: Some(e.to_string()),
                        ..AttemptRecord::default()
                    };
                    if !atom.can_retry() {
                        if let Some(plan) = retry.take() {
                            self.close_retry(&atom, plan, record, false).await;
                        }
                        let conf = confidence(0, 0.0, atom.attempts, atom.max_attempts, false);
                        let reason = format!(
                            "retries exhausted after {} attempts ({})",
                            atom.attempts,
                            analysis.category.as_str()
                        );
                        atom.confidence = conf;
                        return escalate_failure(atom, review_priority(conf), reason, analysis.suggestions);
                    }
                    (analysis, record)
                }
            };

            if let Some(plan) = retry.take() {
                self.close_retry(&atom, plan, record, false).await;
            }
            let plan = self.planner.plan(&spec, &atom, analysis).await;
            self.record_retry(&atom, plan.attempt);
            if let Err(e) = self.store.put_atom(atom.clone()).await {
                store_failed("put_atom", &e);
            }
            if !self.back_off(plan.backoff).await {
                return retry_cancelled(atom);
            }
            retry = Some(plan);
        }
    }

    /// Sleep out a retry backoff; false when the masterplan was cancelled
    async fn back_off(&self, backoff: Duration) -> bool {
        let mut cancel = self.cancel.clone();
        let slept = tokio::select! {
            () = tokio::time::sleep(backoff) => true,
            _ = cancel.wait_for(|cancelled| *cancelled) => false,
        };
        slept && !*self.cancel.borrow()
    }

    async fn acquire_unless_cancelled(&self) -> Option<DispatchPermit> {
        if *self.cancel.borrow() {
            return None;
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            permit = self.controller.acquire() => Some(permit),
            _ = cancel.wait_for(|cancelled| *cancelled) => None,
        }
    }

    async fn close_retry(&self, atom: &AtomicUnit, plan: RetryPlan, outcome: AttemptRecord, success: bool) {
        let row = RetryPlanner::history_row(atom, plan, outcome, success);
        if let Err(e) = self.store.append_retry(row).await {
            store_failed("append_retry", &e);
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    async fn persist_results(&self, results: &[ValidationResult]) {
        for result in results {
            if let Err(e) = self.store.append_validation(result.clone()).await {
                store_failed("append_validation", &e);
            }
        }
    }

    /// RUNNING -> RUNNING through the lifecycle, into the audit trail
    fn record_retry(&self, atom: &AtomicUnit, next_attempt: u32) {
        match next_status(atom.id, atom.status, AtomEvent::Retry) {
            Ok(to) => self
                .audit
                .record(atom.id, atom.status, to, format!("retry, attempt {next_attempt}")),
            Err(e) => warn!(atom_id = %atom.id, error = %e, "Retry transition rejected"),
        }
    }
}

fn attempt_record(output: GenerationOutput) -> AttemptRecord {
    AttemptRecord {
        code: Some(output.code),
        error: None,
        tokens_used: output.tokens_used,
        cost_usd: output.cost_usd,
    }
}

fn conclude(mut atom: AtomicUnit, verdict: &Verdict) -> AtomRun {
    atom.status = verdict.status();
    atom.completed_at = Some(Utc::now());
    let reason = match &verdict.decision {
        Decision::Accept => "validated".to_string(),
        Decision::Hold { .. } => format!("validated, held at confidence {:.2}", verdict.confidence),
        Decision::ManualReview { .. } => "manual review required".to_string(),
        Decision::Exhausted { analysis, .. } => format!("retries exhausted ({})", analysis.category.as_str()),
        Decision::Retry { .. } => "retry pending".to_string(),
    };
    info!(
        atom_id = %atom.id,
        status = %atom.status,
        attempts = atom.attempts,
        confidence = verdict.confidence,
        held = atom.needs_review,
        "Atom concluded"
    );
    AtomRun {
        review: verdict.review_entry(&atom),
        all_levels_passed: verdict.all_levels_passed,
        atom,
        reason,
    }
}

/// FAILED and held: the masterplan was cancelled with a retry pending
fn retry_cancelled(mut atom: AtomicUnit) -> AtomRun {
    let conf = confidence(0, 0.0, atom.attempts, atom.max_attempts, false);
    atom.confidence = conf;
    let reason = format!("cancelled before attempt {}", atom.attempts + 1);
    info!(atom_id = %atom.id, attempts = atom.attempts, "Retry dropped by cancellation");
    escalate_failure(atom, review_priority(conf), reason, Vec::new())
}

/// FAILED, held, with a review entry
fn escalate_failure(mut atom: AtomicUnit, priority: u8, reason: String, suggestions: Vec<String>) -> AtomRun {
    atom.status = AtomStatus::Failed;
    atom.needs_review = true;
    atom.review_priority = Some(priority);
    atom.completed_at = Some(Utc::now());
    let entry = HumanReviewQueueEntry::new(atom.id, atom.masterplan_id, atom.confidence, priority, reason.clone())
        .with_suggestions(suggestions);
    warn!(atom_id = %atom.id, attempts = atom.attempts, %reason, "Atom failed");
    AtomRun {
        atom,
        review: Some(entry),
        all_levels_passed: false,
        reason,
    }
}

pub(crate) fn store_failed(operation: &'static str, error: &atomex_core::StoreError) {
    metrics::counter!("atomex_store_errors_total", "operation" => operation).increment(1);
    error!(operation, error = %error, "Store write failed, continuing");
}
