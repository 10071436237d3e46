//! Per-attempt verdict: validate, repair guards once, then decide

use crate::atomicity::AtomicityReport;
use crate::confidence::{confidence, review_priority};
use crate::levels::{DependencyView, LevelReport, ValidationContext, ValidationPipeline};
use crate::repair::RepairAgent;
use crate::retry::analyze_results;
use atomex_core::{
    AtomStatus, AtomicSpec, AtomicUnit, AtomizerConfig, ErrorAnalysis, GuardConstraint, HumanReviewQueueEntry,
    ReviewConfig, ValidationResult,
};
use tracing::{debug, warn};

/// What happens to the atom after this attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// All levels passed with enough confidence
    Accept,
    /// All levels passed but confidence is below the threshold
    Hold {
        /// Review urgency
        priority: u8,
    },
    /// A custom constraint failed; only a human may fix it
    ManualReview {
        /// Unverifiable constraints
        constraints: Vec<GuardConstraint>,
        /// Review urgency
        priority: u8,
    },
    /// Try again with feedback
    Retry {
        /// What went wrong
        analysis: ErrorAnalysis,
    },
    /// Out of attempts
    Exhausted {
        /// Last failure
        analysis: ErrorAnalysis,
        /// Review urgency
        priority: u8,
    },
}

/// Outcome of validating one generation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Final code, including any injected guards
    pub code: String,
    /// Every result produced, the repair revalidation included
    pub results: Vec<ValidationResult>,
    /// Size and shape of the final code
    pub atomicity: AtomicityReport,
    /// Levels passed by the final code
    pub levels_passed: usize,
    /// All four levels passed
    pub all_levels_passed: bool,
    /// Confidence in the final code
    pub confidence: f64,
    /// Repair inserted at least one guard
    pub guard_injected: bool,
    /// What happens next
    pub decision: Decision,
}

impl Verdict {
    /// Status the attempt leaves the atom in; `Running` means retry
    #[must_use]
    pub fn status(&self) -> AtomStatus {
        match self.decision {
            Decision::Accept | Decision::Hold { .. } => AtomStatus::Completed,
            Decision::ManualReview { .. } | Decision::Exhausted { .. } => AtomStatus::Failed,
            Decision::Retry { .. } => AtomStatus::Running,
        }
    }

    /// Whether the atom waits on a reviewer
    #[must_use]
    pub fn needs_review(&self) -> bool {
        matches!(
            self.decision,
            Decision::Hold { .. } | Decision::ManualReview { .. } | Decision::Exhausted { .. }
        )
    }

    /// Review priority, when the atom is escalated
    #[must_use]
    pub fn review_priority(&self) -> Option<u8> {
        match self.decision {
            Decision::Hold { priority }
            | Decision::ManualReview { priority, .. }
            | Decision::Exhausted { priority, .. } => Some(priority),
            Decision::Accept | Decision::Retry { .. } => None,
        }
    }

    /// Review entry to enqueue, if the atom is escalated
    #[must_use]
    pub fn review_entry(&self, atom: &AtomicUnit) -> Option<HumanReviewQueueEntry> {
        let entry = |priority: u8, reason: String| {
            HumanReviewQueueEntry::new(atom.id, atom.masterplan_id, self.confidence, priority, reason)
        };
        match &self.decision {
            Decision::Accept | Decision::Retry { .. } => None,
            Decision::Hold { priority } => Some(entry(
                *priority,
                format!("confidence {:.2} below review threshold", self.confidence),
            )),
            Decision::ManualReview { constraints, priority } => {
                let listed = constraints.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
                Some(entry(*priority, format!("manual review required: {listed}")).manual_only())
            }
            Decision::Exhausted { analysis, priority } => Some(
                entry(
                    *priority,
                    format!(
                        "retries exhausted after {} attempts ({})",
                        atom.attempts,
                        analysis.category.as_str()
                    ),
                )
                .with_suggestions(analysis.suggestions.clone()),
            ),
        }
    }

    /// Copy measurements and confidence onto the atom
    pub fn apply_to(&self, atom: &mut AtomicUnit) {
        self.atomicity.apply_to(atom);
        atom.code = Some(self.code.clone());
        atom.confidence = self.confidence;
        atom.needs_review = self.needs_review();
        atom.review_priority = self.review_priority();
    }
}

/// Runs the validation levels and decides the atom's fate
#[derive(Debug, Clone)]
pub struct AtomValidator {
    pipeline: ValidationPipeline,
    repair: RepairAgent,
    review: ReviewConfig,
}

impl Default for AtomValidator {
    fn default() -> Self {
        Self::new(AtomizerConfig::default(), ReviewConfig::default())
    }
}

impl AtomValidator {
    /// Validator whose repair agent learns nothing
    #[must_use]
    pub fn new(atomizer: AtomizerConfig, review: ReviewConfig) -> Self {
        Self {
            pipeline: ValidationPipeline::new(atomizer),
            repair: RepairAgent::new(),
            review,
        }
    }

    /// Use a repair agent (e.g. one backed by a pattern store)
    #[must_use]
    pub fn with_repair(mut self, repair: RepairAgent) -> Self {
        self.repair = repair;
        self
    }

    /// Validate `code` generated for `atom`, whose `attempts` already counts
    /// this attempt
    pub async fn evaluate(
        &self,
        spec: &AtomicSpec,
        atom: &AtomicUnit,
        code: &str,
        dependencies: &[DependencyView<'_>],
    ) -> Verdict {
        let mut report = self.run(spec, atom, code, dependencies);
        let mut results = report.results.clone();
        let mut code = code.to_string();
        let mut guard_injected = false;

        if !report.all_passed() {
            let violated = report.violated_guards();
            let manual: Vec<GuardConstraint> = violated.iter().filter(|g| g.is_manual_only()).cloned().collect();
            if !manual.is_empty() {
                let confidence = self.confidence(&report, atom, false);
                return Verdict {
                    code,
                    results,
                    levels_passed: report.levels_passed(),
                    all_levels_passed: false,
                    atomicity: report.atomicity,
                    confidence,
                    guard_injected,
                    decision: Decision::ManualReview {
                        constraints: manual,
                        priority: review_priority(confidence),
                    },
                };
            }
            if report.only_guard_failures() {
                match self.repair.repair(&code, spec.language, &spec.name, &violated).await {
                    Ok(outcome) if !outcome.injected.is_empty() => {
                        code = outcome.code;
                        guard_injected = true;
                        report = self.run(spec, atom, &code, dependencies);
                        results.extend(report.results.iter().cloned());
                        debug!(atom_id = %atom.id, passed = report.all_passed(), "Revalidated after guard repair");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(atom_id = %atom.id, error = %e, "Guard repair failed"),
                }
            }
        }

        let confidence = self.confidence(&report, atom, guard_injected);
        let decision = if report.all_passed() {
            if confidence < self.review.confidence_threshold {
                Decision::Hold {
                    priority: review_priority(confidence),
                }
            } else {
                Decision::Accept
            }
        } else if atom.can_retry() {
            Decision::Retry {
                analysis: analyze_results(&report.results),
            }
        } else {
            Decision::Exhausted {
                analysis: analyze_results(&report.results),
                priority: review_priority(confidence),
            }
        };

        Verdict {
            code,
            results,
            levels_passed: report.levels_passed(),
            all_levels_passed: report.all_passed(),
            atomicity: report.atomicity,
            confidence,
            guard_injected,
            decision,
        }
    }

    fn run(
        &self,
        spec: &AtomicSpec,
        atom: &AtomicUnit,
        code: &str,
        dependencies: &[DependencyView<'_>],
    ) -> LevelReport {
        self.pipeline.run(&ValidationContext {
            spec,
            atom,
            code,
            dependencies,
        })
    }

    fn confidence(&self, report: &LevelReport, atom: &AtomicUnit, guard_injected: bool) -> f64 {
        confidence(
            report.levels_passed(),
            report.atomicity.score,
            atom.attempts,
            atom.max_attempts,
            guard_injected,
        )
    }
}
