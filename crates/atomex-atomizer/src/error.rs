//! Atomizer errors

use crate::graph_validator::GraphIssue;
use crate::spec_validator::SpecValidation;

/// Batch preparation failures
#[derive(Debug, thiserror::Error)]
pub enum AtomizerError {
    /// Empty input
    #[error("no specs supplied")]
    Empty,

    /// Every spec was rejected
    #[error("all {} specs rejected", .0.len())]
    AllRejected(Vec<SpecValidation>),

    /// Graph is cyclic, has dangling references or duplicate ids
    #[error("dependency graph invalid: {}", summarize(.issues))]
    GraphInvalid {
        /// Every problem found
        issues: Vec<GraphIssue>,
        /// Per-spec reports, including rejected specs
        reports: Vec<SpecValidation>,
    },
}

impl AtomizerError {
    /// Check if the batch contained a dependency cycle
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        match self {
            Self::GraphInvalid { issues, .. } => issues.iter().any(|i| matches!(i, GraphIssue::Cycle { .. })),
            _ => false,
        }
    }
}

fn summarize(issues: &[GraphIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
