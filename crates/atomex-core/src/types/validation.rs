//! Validation results, retry history and error analysis

use super::ids::{AtomId, ValidationResultId};
use super::spec::GuardConstraint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation hierarchy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationLevel {
    /// Syntax and self-containment
    Atomic = 1,
    /// Import resolution
    Module = 2,
    /// Types and contracts
    Component = 3,
    /// Cross-atom integration
    System = 4,
}

impl ValidationLevel {
    /// Levels in execution order
    pub const ALL: [ValidationLevel; 4] = [
        ValidationLevel::Atomic,
        ValidationLevel::Module,
        ValidationLevel::Component,
        ValidationLevel::System,
    ];

    /// Numeric level
    #[inline]
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Test category checked at this level
    #[inline]
    #[must_use]
    pub fn category(self) -> TestCategory {
        match self {
            ValidationLevel::Atomic => TestCategory::Syntax,
            ValidationLevel::Module => TestCategory::ImportResolution,
            ValidationLevel::Component => TestCategory::TypeContract,
            ValidationLevel::System => TestCategory::Integration,
        }
    }
}

/// What a validation result tested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    /// Syntax, self-containment, atomicity
    Syntax,
    /// Imports resolve
    ImportResolution,
    /// Signature and contracts
    TypeContract,
    /// Works with the rest of the masterplan
    Integration,
}

/// Machine-readable issue code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// Nothing but whitespace
    EmptyCode,
    /// Brackets, braces or parentheses do not balance
    UnbalancedDelimiters,
    /// No function definition at all
    MissingDefinition,
    /// TODO, `pass`, `unimplemented!` and similar
    Placeholder,
    /// Over the line budget
    LocExceeded,
    /// Over the complexity budget
    ComplexityExceeded,
    /// Module outside the stdlib and the declared imports
    UnresolvedImport,
    /// Declared output type never produced
    MissingOutputType,
    /// Declared parameter absent from the signature
    MissingInput,
    /// Business constraint not enforced
    GuardMissing,
    /// Prerequisite not completed, or held for review
    DependencyUnsatisfied,
    /// Function-call prerequisite never referenced
    MissingDependencyReference,
    /// Defined twice, or redefines a prerequisite
    DuplicateSymbol,
}

/// One structured problem found by a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Code
    pub code: IssueCode,
    /// Message
    pub message: String,
    /// 1-based line, if known
    pub line: Option<usize>,
    /// Guard constraint this issue violates
    pub constraint: Option<GuardConstraint>,
}

impl ValidationIssue {
    /// Create an issue
    #[must_use]
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            line: None,
            constraint: None,
        }
    }

    /// At line
    #[inline]
    #[must_use]
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Violating a guard
    #[inline]
    #[must_use]
    pub fn violating(mut self, constraint: GuardConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }
}

/// Outcome of one validation level for one atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Result id
    pub id: ValidationResultId,
    /// Validated atom
    pub atom_id: AtomId,
    /// Level that produced the result
    pub level: ValidationLevel,
    /// No issues at this level
    pub passed: bool,
    /// Test category for the level
    pub category: TestCategory,
    /// Pass line, or issue messages one per line
    pub raw_output: String,
    /// Issues found
    pub issues: Vec<ValidationIssue>,
    /// Time spent on the level
    pub execution_time_ms: u64,
    /// Recording time
    pub created_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Build a result from issues; passes iff there are none
    #[must_use]
    pub fn from_issues(atom_id: AtomId, level: ValidationLevel, issues: Vec<ValidationIssue>) -> Self {
        let raw_output = if issues.is_empty() {
            format!("level {} passed", level.as_u8())
        } else {
            issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            id: ValidationResultId::new(),
            atom_id,
            level,
            passed: issues.is_empty(),
            category: level.category(),
            raw_output,
            issues,
            execution_time_ms: 0,
            created_at: Utc::now(),
        }
    }

    /// Guard constraints this result reports as violated
    pub fn violated_constraints(&self) -> impl Iterator<Item = &GuardConstraint> {
        self.issues.iter().filter_map(|i| i.constraint.as_ref())
    }
}

/// Broad class of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Backend returned an error
    Generation,
    /// Backend call timed out
    Timeout,
    /// Syntax or self-containment
    Syntax,
    /// Import resolution
    Import,
    /// Type or contract mismatch
    Type,
    /// Business-logic guard missing
    Guard,
    /// Cross-atom integration
    Integration,
}

impl ErrorCategory {
    /// Stable label
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Generation => "generation",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Import => "import",
            ErrorCategory::Type => "type",
            ErrorCategory::Guard => "guard",
            ErrorCategory::Integration => "integration",
        }
    }
}

/// Structured analysis fed back into the retry prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    /// Primary category
    pub category: ErrorCategory,
    /// Levels that failed
    pub failed_levels: Vec<ValidationLevel>,
    /// Problem descriptions
    pub messages: Vec<String>,
    /// Suggested corrections
    pub suggestions: Vec<String>,
}

/// One retry attempt (attempts beyond the first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRetryHistory {
    /// Retried atom
    pub atom_id: AtomId,
    /// Attempt number, 2 or more
    pub attempt: u32,
    /// Temperature used by this attempt
    pub temperature: f64,
    /// Feedback sent with this attempt
    pub prompt_variation: String,
    /// Failure of the previous attempt that caused the retry
    pub error_analysis: ErrorAnalysis,
    /// This attempt produced code that was accepted
    pub success: bool,
    /// Code this attempt returned
    pub result: Option<String>,
    /// Backend error this attempt hit
    pub error: Option<String>,
    /// Tokens billed for this attempt
    pub tokens_used: u64,
    /// Cost of this attempt in USD
    pub cost_usd: f64,
    /// Recording time
    pub created_at: DateTime<Utc>,
}
