//! Atomicity metrics for generated code

use crate::inspect;
use atomex_core::{AtomicSpec, AtomicUnit, AtomizerConfig, Language};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DECISION_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|elif|for|while|case|catch|except|match|select)\b|&&|\|\||\band\b|\bor\b")
        .expect("valid regex")
});
static TERNARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\?\s[^?:]*\s:\s").expect("valid regex"));

/// Measured size and shape of one generated atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicityReport {
    /// Non-blank, non-comment lines
    pub loc: u32,
    /// Cyclomatic complexity estimate
    pub complexity: f64,
    /// 1.0 is perfectly atomic
    pub score: f64,
    /// Budget breaches, human readable
    pub violations: Vec<String>,
    /// No breach
    pub is_atomic: bool,
}

impl AtomicityReport {
    /// Copy the measurements onto the atom
    pub fn apply_to(&self, atom: &mut AtomicUnit) {
        atom.loc = self.loc;
        atom.complexity = self.complexity;
        atom.atomicity_score = self.score;
        atom.atomicity_violations.clone_from(&self.violations);
        atom.is_atomic = self.is_atomic;
    }
}

/// Cyclomatic complexity: 1 + decision points
#[must_use]
pub fn cyclomatic_complexity(code: &str, language: Language) -> f64 {
    let stripped = inspect::strip_strings(code, language);
    let mut decisions = 0usize;
    for line in stripped.lines() {
        let line = inspect::strip_line_comment(line, language);
        decisions += DECISION_KEYWORDS
            .find_iter(line)
            .filter(|m| {
                // `and`/`or` are operators only in Python
                language == Language::Python || !matches!(m.as_str(), "and" | "or")
            })
            .count();
        if matches!(language, Language::TypeScript | Language::JavaScript | Language::Go) {
            decisions += TERNARY.find_iter(line).count();
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let complexity = 1.0 + decisions as f64;
    complexity
}

/// Measure code against the spec's atomicity budget
#[must_use]
pub fn assess(code: &str, spec: &AtomicSpec, config: &AtomizerConfig) -> AtomicityReport {
    let loc = inspect::count_loc(code, spec.language);
    let complexity = cyclomatic_complexity(code, spec.language);
    let max_complexity = if spec.max_complexity > 0.0 {
        spec.max_complexity
    } else {
        config.max_complexity
    };
    let max_loc = config.max_loc.max(spec.target_loc);

    let mut violations = Vec::new();
    let mut score: f64 = 1.0;

    if loc == 0 {
        violations.push("no executable lines".to_string());
        score = 0.0;
    }
    if loc > max_loc {
        violations.push(format!("{loc} LOC exceeds limit of {max_loc}"));
        let over = f64::from(loc - max_loc) / f64::from(max_loc.max(1));
        score -= 0.4 * over.min(1.0).max(0.25);
    }
    if complexity > max_complexity {
        violations.push(format!("complexity {complexity} exceeds limit of {max_complexity}"));
        let over = (complexity - max_complexity) / max_complexity.max(1.0);
        score -= 0.3 * over.min(1.0).max(0.25);
    }
    let defs = inspect::definitions(code, spec.language).len();
    if defs > 1 {
        violations.push(format!("{defs} definitions in one atom"));
        score -= 0.2;
    }

    AtomicityReport {
        loc,
        complexity,
        score: score.clamp(0.0, 1.0),
        is_atomic: violations.is_empty(),
        violations,
    }
}
