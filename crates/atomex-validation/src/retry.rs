//! Failure analysis and retry planning

use atomex_core::{
    AtomRetryHistory, AtomicSpec, AtomicUnit, BackendError, ErrorAnalysis, ErrorCategory, ErrorPatternKey, IssueCode,
    PatternStore, RetryConfig, ValidationLevel, ValidationResult,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Classify a failed validation pass
#[must_use]
pub fn analyze_results(results: &[ValidationResult]) -> ErrorAnalysis {
    let failed: Vec<&ValidationResult> = results.iter().filter(|r| !r.passed).collect();
    let category = failed.first().map_or(ErrorCategory::Integration, |r| category_of(r));
    let mut failed_levels: Vec<ValidationLevel> = failed.iter().map(|r| r.level).collect();
    failed_levels.dedup();
    let messages = failed
        .iter()
        .flat_map(|r| r.issues.iter().map(move |i| format!("level {}: {}", r.level.as_u8(), i.message)))
        .collect();
    let mut suggestions: Vec<String> = Vec::new();
    for code in failed.iter().flat_map(|r| r.issues.iter().map(|i| i.code)) {
        let hint = suggestion_for(code).to_string();
        if !suggestions.contains(&hint) {
            suggestions.push(hint);
        }
    }
    ErrorAnalysis {
        category,
        failed_levels,
        messages,
        suggestions,
    }
}

/// Classify a backend failure
#[must_use]
pub fn analyze_backend_error(error: &BackendError) -> ErrorAnalysis {
    let category = match error {
        BackendError::Timeout(_) => ErrorCategory::Timeout,
        BackendError::Failed(_) | BackendError::RateLimited => ErrorCategory::Generation,
    };
    ErrorAnalysis {
        category,
        failed_levels: Vec::new(),
        messages: vec![error.to_string()],
        suggestions: vec!["Return a single complete function and nothing else".to_string()],
    }
}

fn category_of(result: &ValidationResult) -> ErrorCategory {
    match result.level {
        ValidationLevel::Atomic => ErrorCategory::Syntax,
        ValidationLevel::Module => ErrorCategory::Import,
        ValidationLevel::Component if result.issues.iter().all(|i| i.code == IssueCode::GuardMissing) => {
            ErrorCategory::Guard
        }
        ValidationLevel::Component => ErrorCategory::Type,
        ValidationLevel::System => ErrorCategory::Integration,
    }
}

fn suggestion_for(code: IssueCode) -> &'static str {
    match code {
        IssueCode::EmptyCode | IssueCode::MissingDefinition => "Emit exactly one complete function definition",
        IssueCode::UnbalancedDelimiters => "Check that every bracket and brace is closed",
        IssueCode::Placeholder => "Replace placeholders with a working implementation",
        IssueCode::LocExceeded => "Shorten the implementation to fit the line budget",
        IssueCode::ComplexityExceeded => "Reduce branching; move conditions into early returns",
        IssueCode::UnresolvedImport => "Only import declared modules or those provided by dependencies",
        IssueCode::MissingOutputType => "Return a value of the declared output type",
        IssueCode::MissingInput => "Use the declared parameter names in the signature",
        IssueCode::GuardMissing => "Enforce every listed business constraint before doing work",
        IssueCode::DependencyUnsatisfied => "Wait for prerequisites to complete",
        IssueCode::MissingDependencyReference => "Call the prerequisite functions instead of reimplementing them",
        IssueCode::DuplicateSymbol => "Do not redefine functions provided by other atoms",
    }
}

/// Next attempt for a failed atom
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    /// 1-based attempt about to run
    pub attempt: u32,
    /// Temperature for the next attempt
    pub temperature: f64,
    /// Wait before re-dispatching
    pub backoff: Duration,
    /// Feedback appended to the generation prompt
    pub prompt_context: Vec<String>,
    /// Failure that triggered this retry
    pub analysis: ErrorAnalysis,
}

/// Output and usage of one attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptRecord {
    /// Code returned, if any
    pub code: Option<String>,
    /// Backend error, if any
    pub error: Option<String>,
    /// Tokens billed
    pub tokens_used: u64,
    /// Cost in USD
    pub cost_usd: f64,
}

/// Builds retry plans: escalating temperature, feedback and backoff
#[derive(Clone)]
pub struct RetryPlanner {
    config: RetryConfig,
    patterns: Option<Arc<dyn PatternStore>>,
}

impl std::fmt::Debug for RetryPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPlanner")
            .field("config", &self.config)
            .field("patterns", &self.patterns.is_some())
            .finish()
    }
}

impl RetryPlanner {
    /// Planner without learned fixes
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config, patterns: None }
    }

    /// Consult learned fixes when building feedback
    #[must_use]
    pub fn with_patterns(mut self, patterns: Arc<dyn PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Retry settings
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Key used to look up and record fixes for an atom's failures
    #[must_use]
    pub fn pattern_key(spec: &AtomicSpec, category: ErrorCategory) -> ErrorPatternKey {
        ErrorPatternKey {
            category,
            endpoint_pattern: spec.module_name(),
            entity: spec
                .guards
                .iter()
                .map(|g| g.entity().to_string())
                .find(|e| !e.is_empty())
                .unwrap_or_else(|| spec.name.clone()),
        }
    }

    /// Plan the attempt after `atom.attempts`
    pub async fn plan(
        &self,
        spec: &AtomicSpec,
        atom: &AtomicUnit,
        analysis: ErrorAnalysis,
    ) -> RetryPlan {
        let failed_attempt = atom.attempts.max(1);
        let attempt = failed_attempt + 1;
        let temperature = self.config.temperature_for(attempt);
        let known_fixes = self.known_fixes(spec, analysis.category).await;

        let mut prompt_context = vec![format!(
            "Attempt {failed_attempt} failed ({}).",
            analysis.category.as_str()
        )];
        prompt_context.extend(analysis.messages.iter().map(|m| format!("Problem: {m}")));
        prompt_context.extend(analysis.suggestions.iter().map(|s| format!("Fix: {s}")));
        prompt_context.extend(known_fixes.iter().map(|f| format!("Known fix: {f}")));

        debug!(
            atom_id = %atom.id,
            attempt,
            temperature,
            category = analysis.category.as_str(),
            "Planned retry"
        );
        metrics::counter!("atomex_retries_total", "category" => analysis.category.as_str()).increment(1);

        RetryPlan {
            attempt,
            temperature,
            backoff: self.config.backoff_for(failed_attempt),
            prompt_context,
            analysis,
        }
    }

    /// History row for a retry attempt once its outcome is known
    #[must_use]
    pub fn history_row(
        atom: &AtomicUnit,
        plan: RetryPlan,
        outcome: AttemptRecord,
        success: bool,
    ) -> AtomRetryHistory {
        AtomRetryHistory {
            atom_id: atom.id,
            attempt: plan.attempt,
            temperature: plan.temperature,
            prompt_variation: plan.prompt_context.join("\n"),
            error_analysis: plan.analysis,
            success,
            result: outcome.code,
            error: outcome.error,
            tokens_used: outcome.tokens_used,
            cost_usd: outcome.cost_usd,
            created_at: Utc::now(),
        }
    }

    /// Remember what eventually fixed a category of failure
    pub async fn learn_fix(&self, spec: &AtomicSpec, category: ErrorCategory, fix: impl Into<String>) {
        let Some(store) = &self.patterns else { return };
        if let Err(e) = store.record_error_fix(Self::pattern_key(spec, category), fix.into()).await {
            warn!(error = %e, spec = %spec.id, "Failed to record error pattern");
        }
    }

    async fn known_fixes(&self, spec: &AtomicSpec, category: ErrorCategory) -> Vec<String> {
        let Some(store) = &self.patterns else {
            return Vec::new();
        };
        match store.known_fixes(&Self::pattern_key(spec, category)).await {
            Ok(fixes) => fixes,
            Err(e) => {
                warn!(error = %e, spec = %spec.id, "Pattern store unavailable, continuing without known fixes");
                Vec::new()
            }
        }
    }
}
