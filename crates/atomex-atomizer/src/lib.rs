//! # Atomex Atomizer
//!
//! Gatekeeper between specs and the scheduler:
//! - Per-spec validation with scored, rule-named errors and warnings
//! - Whole-batch graph validation (duplicates, dangling references, cycles)
//! - Dependency classification for diagnostics
//!
//! [`Atomizer::prepare`] runs all three and either returns a batch that is
//! safe to schedule or rejects it outright. No partial graphs are produced.

pub mod classify;
pub mod error;
pub mod graph_validator;
pub mod spec_validator;

pub use classify::{classify, classify_all, ClassifiedDependency};
pub use error::AtomizerError;
pub use graph_validator::{validate_graph, GraphIssue, GraphValidation};
pub use spec_validator::{BatchValidation, Severity, SpecIssue, SpecRule, SpecValidation, SpecValidator};

use atomex_core::{AtomicSpec, AtomizerConfig, SpecId};
use tracing::{info, warn};

/// Specs ready to become a dependency graph
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    /// Accepted specs in topological order
    pub specs: Vec<AtomicSpec>,
    /// Accepted ids, prerequisites first
    pub topological_order: Vec<SpecId>,
    /// Classified edges between accepted specs
    pub dependencies: Vec<ClassifiedDependency>,
    /// Reports for every input spec
    pub reports: Vec<SpecValidation>,
    /// Reports for specs left out
    pub rejected: Vec<SpecValidation>,
}

/// Spec and graph validation front door
#[derive(Debug, Clone, Default)]
pub struct Atomizer {
    validator: SpecValidator,
}

impl Atomizer {
    /// Create with bounds
    #[inline]
    #[must_use]
    pub fn new(config: AtomizerConfig) -> Self {
        Self {
            validator: SpecValidator::new(config),
        }
    }

    /// Validate a single spec
    #[inline]
    #[must_use]
    pub fn validate(&self, spec: &AtomicSpec) -> SpecValidation {
        self.validator.validate(spec)
    }

    /// Validate specs, then the graph of the accepted ones
    ///
    /// Rejected specs are reported and dropped. Depending on a rejected spec
    /// makes the reference dangling, which rejects the batch.
    pub fn prepare(&self, specs: &[AtomicSpec]) -> Result<PreparedBatch, AtomizerError> {
        if specs.is_empty() {
            return Err(AtomizerError::Empty);
        }

        let batch = self.validator.validate_batch(specs);
        for report in &batch.rejected {
            warn!(
                spec = %report.spec_id,
                score = report.score,
                rules = ?report.errors.iter().map(|e| e.rule).collect::<Vec<_>>(),
                "Spec rejected"
            );
        }
        if batch.accepted.is_empty() {
            return Err(AtomizerError::AllRejected(batch.rejected));
        }

        let graph = validate_graph(&batch.accepted);
        if !graph.valid {
            return Err(AtomizerError::GraphInvalid {
                issues: graph.errors,
                reports: batch.reports,
            });
        }

        let mut by_id: std::collections::HashMap<SpecId, AtomicSpec> =
            batch.accepted.iter().map(|s| (s.id.clone(), s.clone())).collect();
        let ordered: Vec<AtomicSpec> = graph
            .topological_order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        let dependencies = classify_all(&ordered);

        info!(
            accepted = ordered.len(),
            rejected = batch.rejected.len(),
            dependencies = dependencies.len(),
            "Spec batch prepared"
        );

        Ok(PreparedBatch {
            specs: ordered,
            topological_order: graph.topological_order,
            dependencies,
            reports: batch.reports,
            rejected: batch.rejected,
        })
    }
}
