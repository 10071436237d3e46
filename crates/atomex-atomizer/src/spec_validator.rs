//! Atomic spec validation
//!
//! A spec is valid iff it has no hard errors. The score starts at 1.0 and
//! each violated rule subtracts its fixed penalty, floored at 0.0.

use atomex_core::{AtomicSpec, AtomizerConfig, SpecId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Validation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecRule {
    /// One action, one conjunction, no multi-step connectives
    SingleResponsibility,
    /// Target LOC above the maximum
    LocTooHigh,
    /// Target LOC below the minimum
    LocTooLow,
    /// Complexity bound above the maximum
    Complexity,
    /// No test cases
    MissingTests,
    /// No output type
    MissingOutputType,
    /// Non-trivial spec without inputs
    MissingInputs,
    /// Larger spec without imports
    MissingImports,
    /// Pure spec describes side effects
    Purity,
    /// Missing inputs, output type or tests
    Testability,
}

impl SpecRule {
    /// Score penalty for violating this rule
    #[must_use]
    pub fn penalty(self) -> f64 {
        match self {
            SpecRule::SingleResponsibility | SpecRule::MissingTests => 0.3,
            SpecRule::Purity => 0.25,
            SpecRule::LocTooHigh | SpecRule::Complexity => 0.2,
            SpecRule::MissingOutputType | SpecRule::Testability => 0.1,
            SpecRule::LocTooLow | SpecRule::MissingInputs | SpecRule::MissingImports => 0.05,
        }
    }
}

/// Error or warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Rejects the spec
    Error,
    /// Lowers the score only
    Warning,
}

/// One violated rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecIssue {
    /// Rule that fired
    pub rule: SpecRule,
    /// Error rejects, warning only lowers the score
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Actionable correction
    pub suggestion: String,
}

/// Validation report for one spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecValidation {
    /// Spec this report is about
    pub spec_id: SpecId,
    /// True when there are no errors
    pub valid: bool,
    /// 1.0 minus rule penalties, floored at 0
    pub score: f64,
    /// Violations that reject the spec
    pub errors: Vec<SpecIssue>,
    /// Violations that only lower the score
    pub warnings: Vec<SpecIssue>,
}

impl SpecValidation {
    /// Rules violated, errors first
    pub fn rules(&self) -> impl Iterator<Item = SpecRule> + '_ {
        self.errors.iter().chain(&self.warnings).map(|i| i.rule)
    }

    /// Whether a rule was violated
    #[must_use]
    pub fn violates(&self, rule: SpecRule) -> bool {
        self.rules().any(|r| r == rule)
    }
}

/// Result of validating many specs
#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    /// Specs with no hard errors, input order preserved
    pub accepted: Vec<AtomicSpec>,
    /// Reports for rejected specs
    pub rejected: Vec<SpecValidation>,
    /// Reports for every spec, input order preserved
    pub reports: Vec<SpecValidation>,
}

// Lemmas; inflected forms are matched by suffix stripping.
const ACTION_VERBS: &[&str] = &[
    "add", "build", "calculate", "check", "compute", "convert", "create", "decode", "delete", "emit",
    "encode", "fetch", "filter", "format", "generate", "insert", "load", "merge", "notify", "parse",
    "persist", "process", "publish", "read", "remove", "render", "save", "send", "serialize", "sort",
    "split", "store", "transform", "update", "upload", "validate", "write",
];

const CONJUNCTIONS: &[&str] = &["and", "or", "plus", "also"];

const SIDE_EFFECT_VERBS: &[&str] = &[
    "append", "commit", "delete", "download", "emit", "insert", "log", "modify", "mutate", "notify",
    "persist", "print", "publish", "remove", "save", "send", "store", "update", "upload", "write",
];

static MULTI_STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(then|after that|followed by|finally|subsequently|afterwards)\b")
        .expect("valid regex")
});

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("valid regex"));

/// Map an inflected word to a lemma from `lemmas`
fn lemma_of<'a>(word: &str, lemmas: &[&'a str]) -> Option<&'a str> {
    let w = word.to_ascii_lowercase();
    lemmas.iter().copied().find(|lemma| {
        w == *lemma
            || ["s", "es", "d", "ed", "ing"].iter().any(|suffix| {
                w.strip_suffix(suffix).is_some_and(|stem| {
                    stem == *lemma
                        || lemma.strip_suffix('e').is_some_and(|l| stem == l)
                        || (matches!(*suffix, "ed" | "ing") && undoubled(stem) == Some(*lemma))
                })
            })
    })
}

/// "formatt" -> "format", "logg" -> "log"
fn undoubled(stem: &str) -> Option<&str> {
    let bytes = stem.as_bytes();
    let [.., a, b] = bytes else { return None };
    (a == b && !b"aeiou".contains(b)).then_some(&stem[..stem.len() - 1])
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    WORD.find_iter(text).map(|m| m.as_str())
}

/// Spec validator
#[derive(Debug, Clone, Default)]
pub struct SpecValidator {
    config: AtomizerConfig,
}

impl SpecValidator {
    /// Create with bounds
    #[inline]
    #[must_use]
    pub fn new(config: AtomizerConfig) -> Self {
        Self { config }
    }

    /// Validate one spec
    #[must_use]
    pub fn validate(&self, spec: &AtomicSpec) -> SpecValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_single_responsibility(spec, &mut errors);
        self.check_size(spec, &mut errors, &mut warnings);
        self.check_tests(spec, &mut errors);
        self.check_signature(spec, &mut warnings);
        self.check_purity(spec, &mut errors);
        self.check_testability(spec, &mut warnings);

        let penalty: f64 = errors.iter().chain(&warnings).map(|i: &SpecIssue| i.rule.penalty()).sum();
        let score = (1.0 - penalty).max(0.0);
        let valid = errors.is_empty();

        debug!(
            spec = %spec.id,
            valid,
            score,
            errors = errors.len(),
            warnings = warnings.len(),
            "Spec validated"
        );

        SpecValidation {
            spec_id: spec.id.clone(),
            valid,
            score,
            errors,
            warnings,
        }
    }

    /// Validate every spec and partition accepted from rejected
    #[must_use]
    pub fn validate_batch(&self, specs: &[AtomicSpec]) -> BatchValidation {
        let mut batch = BatchValidation::default();
        for spec in specs {
            let report = self.validate(spec);
            if report.valid {
                batch.accepted.push(spec.clone());
            } else {
                batch.rejected.push(report.clone());
            }
            batch.reports.push(report);
        }
        batch
    }

    fn check_single_responsibility(&self, spec: &AtomicSpec, errors: &mut Vec<SpecIssue>) {
        let verbs: BTreeSet<&str> = words(&spec.description)
            .filter_map(|w| lemma_of(w, ACTION_VERBS))
            .collect();
        let conjunctions = words(&spec.description)
            .filter(|w| CONJUNCTIONS.contains(&w.to_ascii_lowercase().as_str()))
            .count();
        let connective = MULTI_STEP.find(&spec.description).map(|m| m.as_str().to_string());

        let mut reasons = Vec::new();
        if verbs.len() > 1 {
            reasons.push(format!(
                "{} actions ({})",
                verbs.len(),
                verbs.iter().copied().collect::<Vec<_>>().join(", ")
            ));
        }
        if conjunctions > 1 {
            reasons.push(format!("{conjunctions} conjunctions"));
        }
        if let Some(word) = connective {
            reasons.push(format!("multi-step connective '{word}'"));
        }
        if !reasons.is_empty() {
            errors.push(SpecIssue {
                rule: SpecRule::SingleResponsibility,
                severity: Severity::Error,
                message: format!("description does more than one thing: {}", reasons.join(", ")),
                suggestion: "split the spec into one spec per action".into(),
            });
        }
    }

    fn check_size(&self, spec: &AtomicSpec, errors: &mut Vec<SpecIssue>, warnings: &mut Vec<SpecIssue>) {
        let c = &self.config;
        if spec.target_loc > c.max_loc {
            errors.push(SpecIssue {
                rule: SpecRule::LocTooHigh,
                severity: Severity::Error,
                message: format!("target of {} lines exceeds {}", spec.target_loc, c.max_loc),
                suggestion: format!("decompose into units of at most {} lines", c.max_loc),
            });
        } else if spec.target_loc < c.min_loc {
            warnings.push(SpecIssue {
                rule: SpecRule::LocTooLow,
                severity: Severity::Warning,
                message: format!("target of {} lines is below {}", spec.target_loc, c.min_loc),
                suggestion: "consider merging with a neighbouring spec".into(),
            });
        }
        if spec.max_complexity > c.max_complexity {
            errors.push(SpecIssue {
                rule: SpecRule::Complexity,
                severity: Severity::Error,
                message: format!(
                    "complexity bound {:.1} exceeds {:.1}",
                    spec.max_complexity, c.max_complexity
                ),
                suggestion: "move branches into separate specs".into(),
            });
        }
    }

    fn check_tests(&self, spec: &AtomicSpec, errors: &mut Vec<SpecIssue>) {
        if spec.test_cases.is_empty() {
            errors.push(SpecIssue {
                rule: SpecRule::MissingTests,
                severity: Severity::Error,
                message: "no test cases".into(),
                suggestion: "add at least one input/output example".into(),
            });
        }
    }

    fn check_signature(&self, spec: &AtomicSpec, warnings: &mut Vec<SpecIssue>) {
        if spec.output_type.is_none() {
            warnings.push(SpecIssue {
                rule: SpecRule::MissingOutputType,
                severity: Severity::Warning,
                message: "no output type".into(),
                suggestion: "declare the return type".into(),
            });
        }
        if spec.target_loc > self.config.trivial_loc && spec.input_types.is_empty() {
            warnings.push(SpecIssue {
                rule: SpecRule::MissingInputs,
                severity: Severity::Warning,
                message: "non-trivial spec declares no inputs".into(),
                suggestion: "declare input names and types".into(),
            });
        }
        if spec.target_loc > self.config.imports_loc_threshold && spec.imports.is_empty() {
            warnings.push(SpecIssue {
                rule: SpecRule::MissingImports,
                severity: Severity::Warning,
                message: format!("{}-line spec declares no imports", spec.target_loc),
                suggestion: "list the modules the unit needs".into(),
            });
        }
    }

    fn check_purity(&self, spec: &AtomicSpec, errors: &mut Vec<SpecIssue>) {
        if !spec.must_be_pure {
            return;
        }
        let effects: BTreeSet<&str> = words(&spec.description)
            .filter_map(|w| lemma_of(w, SIDE_EFFECT_VERBS))
            .collect();
        if !effects.is_empty() {
            errors.push(SpecIssue {
                rule: SpecRule::Purity,
                severity: Severity::Error,
                message: format!(
                    "pure spec describes side effects: {}",
                    effects.into_iter().collect::<Vec<_>>().join(", ")
                ),
                suggestion: "drop the purity flag or move the effect into its own spec".into(),
            });
        }
    }

    fn check_testability(&self, spec: &AtomicSpec, warnings: &mut Vec<SpecIssue>) {
        let mut missing = Vec::new();
        if spec.input_types.is_empty() {
            missing.push("inputs");
        }
        if spec.output_type.is_none() {
            missing.push("output type");
        }
        if spec.test_cases.is_empty() {
            missing.push("test cases");
        }
        if !missing.is_empty() {
            warnings.push(SpecIssue {
                rule: SpecRule::Testability,
                severity: Severity::Warning,
                message: format!("not independently testable, missing {}", missing.join(", ")),
                suggestion: "declare a full signature and an example".into(),
            });
        }
    }
}
