//! The four validation levels
//!
//! ATOMIC checks the code on its own, MODULE its imports, COMPONENT its
//! contract and guards, SYSTEM its fit with the atoms it depends on. Every
//! level always runs so that each one leaves a result behind.

use crate::atomicity::{self, AtomicityReport};
use crate::inspect;
use atomex_core::{
    AtomStatus, AtomicSpec, AtomicUnit, AtomizerConfig, DependencyType, GuardConstraint, IssueCode, Language,
    ValidationIssue, ValidationLevel, ValidationResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:TODO|FIXME|XXX)\b|unimplemented!|todo!\(|NotImplementedError|not implemented|^\s*(?:pass|\.\.\.)\s*$")
        .expect("valid regex")
});
static COMPARISON: Lazy<Regex> = Lazy::new(|| Regex::new(r"<=?|>=?").expect("valid regex"));
static ABSENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bis None\b|\bis not None\b|\bNone\b|\bnull\b|\bnil\b|\bundefined\b|is_none\(\)|is_some\(\)|let Some\(|\bnot\s+\w")
        .expect("valid regex")
});

const PYTHON_STDLIB: &[&str] = &[
    "abc", "asyncio", "collections", "copy", "dataclasses", "datetime", "decimal", "enum", "functools", "hashlib",
    "itertools", "json", "logging", "math", "operator", "os", "pathlib", "random", "re", "statistics", "string",
    "sys", "time", "typing", "uuid",
];
const RUST_STDLIB: &[&str] = &["std", "core", "alloc", "crate", "self", "super"];
const JS_STDLIB: &[&str] = &["assert", "crypto", "events", "fs", "os", "path", "url", "util"];
const GO_STDLIB: &[&str] = &[
    "bytes", "context", "encoding/json", "errors", "fmt", "io", "math", "os", "regexp", "sort", "strconv", "strings",
    "sync", "time", "unicode",
];

fn stdlib(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => PYTHON_STDLIB,
        Language::Rust => RUST_STDLIB,
        Language::TypeScript | Language::JavaScript => JS_STDLIB,
        Language::Go => GO_STDLIB,
    }
}

/// A prerequisite as the SYSTEM level sees it
#[derive(Debug, Clone, Copy)]
pub struct DependencyView<'a> {
    /// Prerequisite spec
    pub spec: &'a AtomicSpec,
    /// Prerequisite status
    pub status: AtomStatus,
    /// Prerequisite held for review
    pub needs_review: bool,
    /// How the dependent uses it
    pub dependency_type: DependencyType,
}

impl DependencyView<'_> {
    fn satisfied(&self) -> bool {
        self.status == AtomStatus::Completed && !self.needs_review
    }
}

/// Everything a validation pass looks at
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Spec under validation
    pub spec: &'a AtomicSpec,
    /// Atom under validation
    pub atom: &'a AtomicUnit,
    /// Candidate code
    pub code: &'a str,
    /// Prerequisites at dispatch time
    pub dependencies: &'a [DependencyView<'a>],
}

/// Results of one pass through all four levels
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    /// One result per level, in level order
    pub results: Vec<ValidationResult>,
    /// Size and shape of the code
    pub atomicity: AtomicityReport,
}

impl LevelReport {
    /// Levels that passed
    #[must_use]
    pub fn levels_passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Every level passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Result for a level
    #[must_use]
    pub fn level(&self, level: ValidationLevel) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.level == level)
    }

    /// Guard constraints reported as violated
    #[must_use]
    pub fn violated_guards(&self) -> Vec<GuardConstraint> {
        self.results
            .iter()
            .flat_map(ValidationResult::violated_constraints)
            .cloned()
            .collect()
    }

    /// The only failures are missing guards
    #[must_use]
    pub fn only_guard_failures(&self) -> bool {
        let mut any = false;
        for issue in self.results.iter().flat_map(|r| &r.issues) {
            if issue.code != IssueCode::GuardMissing || issue.constraint.is_none() {
                return false;
            }
            any = true;
        }
        any
    }
}

/// Runs the four levels in order
#[derive(Debug, Clone, Default)]
pub struct ValidationPipeline {
    config: AtomizerConfig,
}

impl ValidationPipeline {
    /// Pipeline using the atomizer budgets
    #[must_use]
    pub fn new(config: AtomizerConfig) -> Self {
        Self { config }
    }

    /// Validate at every level
    #[must_use]
    pub fn run(&self, ctx: &ValidationContext<'_>) -> LevelReport {
        let atomicity = atomicity::assess(ctx.code, ctx.spec, &self.config);
        let results = ValidationLevel::ALL
            .iter()
            .map(|&level| {
                let started = Instant::now();
                let issues = match level {
                    ValidationLevel::Atomic => atomic_issues(ctx, &atomicity),
                    ValidationLevel::Module => module_issues(ctx),
                    ValidationLevel::Component => component_issues(ctx),
                    ValidationLevel::System => system_issues(ctx),
                };
                let mut result = ValidationResult::from_issues(ctx.atom.id, level, issues);
                result.execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                debug!(
                    atom_id = %ctx.atom.id,
                    level = level.as_u8(),
                    passed = result.passed,
                    issues = result.issues.len(),
                    "Validation level finished"
                );
                result
            })
            .collect();
        LevelReport { results, atomicity }
    }
}

fn atomic_issues(ctx: &ValidationContext<'_>, atomicity: &AtomicityReport) -> Vec<ValidationIssue> {
    let language = ctx.spec.language;
    if ctx.code.trim().is_empty() {
        return vec![ValidationIssue::new(IssueCode::EmptyCode, "generated code is empty")];
    }
    let mut issues = Vec::new();
    if let Some((line, message)) = inspect::unbalanced_delimiter(ctx.code, language) {
        issues.push(ValidationIssue::new(IssueCode::UnbalancedDelimiters, message).at_line(line));
    }
    if inspect::definitions(ctx.code, language).is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::MissingDefinition,
            format!("no {language} function definition found"),
        ));
    }
    for (idx, line) in ctx.code.lines().enumerate() {
        if PLACEHOLDER.is_match(line) {
            issues.push(
                ValidationIssue::new(IssueCode::Placeholder, format!("placeholder left in code: {}", line.trim()))
                    .at_line(idx + 1),
            );
        }
    }
    // Extra helper definitions only lower the atomicity score
    for violation in &atomicity.violations {
        let code = if violation.starts_with("complexity") {
            IssueCode::ComplexityExceeded
        } else if violation.contains("LOC exceeds") {
            IssueCode::LocExceeded
        } else {
            continue;
        };
        issues.push(ValidationIssue::new(code, violation.clone()));
    }
    issues
}

fn module_issues(ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
    let language = ctx.spec.language;
    let mut allowed: HashSet<String> = stdlib(language).iter().map(|s| (*s).to_string()).collect();
    allowed.extend(ctx.spec.imports.iter().map(|i| inspect::normalize_import(i, language)));
    allowed.extend(
        ctx.dependencies
            .iter()
            .map(|d| inspect::normalize_import(&d.spec.module_name(), language)),
    );
    inspect::imports(ctx.code, language)
        .into_iter()
        .filter(|(module, _)| !allowed.contains(module))
        .map(|(module, line)| {
            ValidationIssue::new(
                IssueCode::UnresolvedImport,
                format!("import '{module}' is neither declared nor provided by a dependency"),
            )
            .at_line(line)
        })
        .collect()
}

fn component_issues(ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
    let language = ctx.spec.language;
    let mut issues = Vec::new();
    if let Some(def) = inspect::primary_definition(ctx.code, language, &ctx.spec.name) {
        let (sig, _) = inspect::signature(ctx.code, language, &def);
        for name in ctx.spec.input_types.keys() {
            if !inspect::mentions_identifier(&sig, name) {
                issues.push(
                    ValidationIssue::new(IssueCode::MissingInput, format!("parameter '{name}' missing from signature"))
                        .at_line(def.line + 1),
                );
            }
        }
        if let Some(output) = &ctx.spec.output_type {
            if !declares_output(ctx.code, &sig, language) {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::MissingOutputType,
                        format!("'{}' never produces its {output} result", def.name),
                    )
                    .at_line(def.line + 1),
                );
            }
        }
    }
    for guard in &ctx.spec.guards {
        if !guard_enforced(ctx.code, language, guard) {
            issues.push(
                ValidationIssue::new(IssueCode::GuardMissing, format!("guard not enforced: {guard}"))
                    .violating(guard.clone()),
            );
        }
    }
    issues
}

fn declares_output(code: &str, sig: &str, language: Language) -> bool {
    let returns = code.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("return ") || t == "return" || t.starts_with("return(")
    });
    match language {
        Language::Rust => sig.contains("->"),
        Language::Python => sig.contains("->") || returns,
        Language::TypeScript => returns || sig.contains("=>"),
        Language::JavaScript => returns,
        Language::Go => {
            let after_params = sig.rfind(')').map_or("", |at| &sig[at + 1..]);
            let trimmed = after_params.trim().trim_end_matches('{').trim();
            !trimmed.is_empty() || returns
        }
    }
}

/// Marker comment written by the repair agent
#[must_use]
pub fn guard_marker(guard: &GuardConstraint) -> String {
    format!("atomex:guard {} {}", guard.class().as_str(), guard.subject())
}

/// Whether the code enforces a guard, by marker or by a recognizable check
#[must_use]
pub fn guard_enforced(code: &str, language: Language, guard: &GuardConstraint) -> bool {
    if code.contains(&guard_marker(guard)) {
        return true;
    }
    match guard {
        GuardConstraint::Custom { expected_snippet, .. } => {
            expected_snippet.as_deref().is_some_and(|snippet| code.contains(snippet))
        }
        GuardConstraint::StatusTransition { entity, field, allowed } => {
            let subject = format!("{entity}.{field}");
            code.contains(&subject) && allowed.iter().all(|status| code.contains(status.as_str()))
        }
        GuardConstraint::Quantity { entity, field, .. } => {
            let subject = format!("{entity}.{field}");
            code.lines()
                .map(|l| inspect::strip_line_comment(l, language))
                .any(|l| l.contains(&subject) && COMPARISON.is_match(l))
        }
        GuardConstraint::Existence { entity } => code
            .lines()
            .map(|l| inspect::strip_line_comment(l, language))
            .any(|l| inspect::mentions_identifier(l, entity) && ABSENCE.is_match(l)),
    }
}

fn system_issues(ctx: &ValidationContext<'_>) -> Vec<ValidationIssue> {
    let language = ctx.spec.language;
    let mut issues = Vec::new();
    for dep in ctx.dependencies {
        if !dep.satisfied() {
            let state = if dep.needs_review {
                "awaiting review".to_string()
            } else {
                dep.status.to_string()
            };
            issues.push(ValidationIssue::new(
                IssueCode::DependencyUnsatisfied,
                format!("dependency '{}' is {state}", dep.spec.name),
            ));
        }
        if dep.dependency_type == DependencyType::FunctionCall
            && !inspect::mentions_identifier(ctx.code, &dep.spec.name)
        {
            issues.push(ValidationIssue::new(
                IssueCode::MissingDependencyReference,
                format!("expected a call to '{}'", dep.spec.name),
            ));
        }
    }
    let defs = inspect::definitions(ctx.code, language);
    let dep_names: HashSet<&str> = ctx.dependencies.iter().map(|d| d.spec.name.as_str()).collect();
    let mut seen = HashSet::new();
    for def in &defs {
        if !seen.insert(def.name.as_str()) {
            issues.push(
                ValidationIssue::new(IssueCode::DuplicateSymbol, format!("'{}' defined more than once", def.name))
                    .at_line(def.line + 1),
            );
        } else if dep_names.contains(def.name.as_str()) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::DuplicateSymbol,
                    format!("'{}' redefines a dependency", def.name),
                )
                .at_line(def.line + 1),
            );
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomex_core::{MasterplanId, TestCase};
    use pretty_assertions::assert_eq;

    fn spec() -> AtomicSpec {
        AtomicSpec::new("ship", "ship_order", "Ship a paid order")
            .with_input("order", "Order")
            .with_output("Order")
            .with_target_loc(6)
            .with_test(TestCase::new("ok", serde_json::json!({}), serde_json::json!({})))
    }

    fn run(spec: &AtomicSpec, code: &str, deps: &[DependencyView<'_>]) -> LevelReport {
        let atom = AtomicUnit::from_spec(MasterplanId::new(), spec, 3);
        let ctx = ValidationContext {
            spec,
            atom: &atom,
            code,
            dependencies: deps,
        };
        ValidationPipeline::default().run(&ctx)
    }

    fn failing(report: &LevelReport) -> Vec<(ValidationLevel, IssueCode)> {
        report
            .results
            .iter()
            .flat_map(|r| r.issues.iter().map(move |i| (r.level, i.code)))
            .collect()
    }

    const GOOD: &str = "def ship_order(order):\n    order.shipped = True\n    return order\n";

    #[test]
    fn clean_code_passes_all_levels() {
        let report = run(&spec(), GOOD, &[]);
        assert_eq!(report.results.len(), 4);
        assert!(report.all_passed(), "{:?}", failing(&report));
        assert_eq!(report.levels_passed(), 4);
    }

    #[test]
    fn every_level_runs_even_after_atomic_failure() {
        let report = run(&spec(), "", &[]);
        assert_eq!(report.results.len(), 4);
        assert_eq!(failing(&report)[0], (ValidationLevel::Atomic, IssueCode::EmptyCode));
        assert!(!report.level(ValidationLevel::Atomic).unwrap().passed);
    }

    #[test]
    fn placeholders_and_imports_are_reported() {
        let code = "import requests\n\ndef ship_order(order):\n    # TODO\n    return order\n";
        let report = run(&spec(), code, &[]);
        assert_eq!(
            failing(&report),
            vec![
                (ValidationLevel::Atomic, IssueCode::Placeholder),
                (ValidationLevel::Module, IssueCode::UnresolvedImport),
            ]
        );
    }

    #[test]
    fn dependency_module_import_is_allowed() {
        let dep = AtomicSpec::new("pay", "pay_order", "Pay for an order").with_target_file("billing/payments.py");
        let view = DependencyView {
            spec: &dep,
            status: AtomStatus::Completed,
            needs_review: false,
            dependency_type: DependencyType::FunctionCall,
        };
        let code = "from payments import pay_order\n\ndef ship_order(order):\n    pay_order(order)\n    return order\n";
        let report = run(&spec(), code, &[view]);
        assert!(report.all_passed(), "{:?}", failing(&report));
    }

    #[test]
    fn contract_and_guard_checks() {
        let spec = spec().with_guard(GuardConstraint::StatusTransition {
            entity: "order".into(),
            field: "status".into(),
            allowed: vec!["paid".into()],
        });
        let code = "def ship_order(parcel):\n    parcel.shipped = True\n";
        let report = run(&spec, code, &[]);
        let component = report.level(ValidationLevel::Component).unwrap();
        let codes: Vec<IssueCode> = component.issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![IssueCode::MissingInput, IssueCode::MissingOutputType, IssueCode::GuardMissing]
        );
        assert_eq!(report.violated_guards().len(), 1);
        assert!(!report.only_guard_failures());

        let guarded = "def ship_order(order):\n    if order.status not in (\"paid\",):\n        raise ValueError()\n    return order\n";
        assert!(run(&spec, guarded, &[]).all_passed());

        let unguarded = "def ship_order(order):\n    return order\n";
        let report = run(&spec, unguarded, &[]);
        assert!(report.only_guard_failures());
    }

    #[test]
    fn system_level_checks_prerequisites() {
        let dep = AtomicSpec::new("pay", "pay_order", "Pay for an order");
        let view = DependencyView {
            spec: &dep,
            status: AtomStatus::Completed,
            needs_review: true,
            dependency_type: DependencyType::FunctionCall,
        };
        let code = "def ship_order(order):\n    return order\n\ndef pay_order(order):\n    return order\n";
        let report = run(&spec(), code, &[view]);
        let system: Vec<IssueCode> = report
            .level(ValidationLevel::System)
            .unwrap()
            .issues
            .iter()
            .map(|i| i.code)
            .collect();
        assert_eq!(system, vec![IssueCode::DependencyUnsatisfied, IssueCode::DuplicateSymbol]);
    }

    #[test]
    fn custom_guard_needs_snippet() {
        let guard = GuardConstraint::Custom {
            description: "only on weekdays".into(),
            expected_snippet: Some("is_weekday(".into()),
        };
        assert!(!guard_enforced(GOOD, Language::Python, &guard));
        assert!(guard_enforced("if is_weekday(now):", Language::Python, &guard));
    }
}
