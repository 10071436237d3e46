//! Pre-generation atomic specifications

use super::ids::SpecId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Target language of a generated atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python
    #[default]
    Python,
    /// Rust
    Rust,
    /// TypeScript
    TypeScript,
    /// JavaScript
    JavaScript,
    /// Go
    Go,
}

impl Language {
    /// Line comment prefix
    #[inline]
    #[must_use]
    pub fn comment_prefix(self) -> &'static str {
        match self {
            Language::Python => "#",
            Language::Rust | Language::TypeScript | Language::JavaScript | Language::Go => "//",
        }
    }

    /// Whether blocks are delimited by indentation rather than braces
    #[inline]
    #[must_use]
    pub fn indentation_blocks(self) -> bool {
        matches!(self, Language::Python)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Language::Python => "python",
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
        };
        f.write_str(name)
    }
}

/// Acceptance test priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPriority {
    /// Must pass (100% required)
    #[default]
    Must,
    /// Should pass (95% required)
    Should,
}

/// Input/output example attached to a spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Short name
    pub name: String,
    /// Input value
    pub input: serde_json::Value,
    /// Expected output value
    pub expected_output: serde_json::Value,
    /// Priority for precision scoring
    #[serde(default)]
    pub priority: TestPriority,
}

impl TestCase {
    /// Create a MUST test case
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: serde_json::Value,
        expected_output: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            expected_output,
            priority: TestPriority::Must,
        }
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: TestPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Classes of business-logic constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintClass {
    /// Entity must be in one of a set of statuses
    StatusTransition,
    /// Numeric field must be within bounds
    Quantity,
    /// Entity must exist
    Existence,
    /// Free-form constraint, never auto-repaired
    Custom,
}

impl ConstraintClass {
    /// Stable label used in markers and pattern keys
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintClass::StatusTransition => "status_transition",
            ConstraintClass::Quantity => "quantity",
            ConstraintClass::Existence => "existence",
            ConstraintClass::Custom => "custom",
        }
    }
}

/// A business-logic guard the generated method must enforce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardConstraint {
    /// `entity.field` must be one of `allowed`
    StatusTransition {
        /// Entity variable name
        entity: String,
        /// Status field
        field: String,
        /// Allowed source statuses
        allowed: Vec<String>,
    },
    /// `entity.field` must lie in `[min, max]`
    Quantity {
        /// Entity variable name
        entity: String,
        /// Numeric field
        field: String,
        /// Inclusive lower bound
        min: Option<i64>,
        /// Inclusive upper bound
        max: Option<i64>,
    },
    /// `entity` must be present
    Existence {
        /// Entity variable name
        entity: String,
    },
    /// Anything else; verified by snippet when one is given
    Custom {
        /// Human description
        description: String,
        /// Text that must appear in compliant code
        expected_snippet: Option<String>,
    },
}

impl GuardConstraint {
    /// Constraint class
    #[must_use]
    pub fn class(&self) -> ConstraintClass {
        match self {
            GuardConstraint::StatusTransition { .. } => ConstraintClass::StatusTransition,
            GuardConstraint::Quantity { .. } => ConstraintClass::Quantity,
            GuardConstraint::Existence { .. } => ConstraintClass::Existence,
            GuardConstraint::Custom { .. } => ConstraintClass::Custom,
        }
    }

    /// Entity the constraint applies to (empty for custom constraints)
    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            GuardConstraint::StatusTransition { entity, .. }
            | GuardConstraint::Quantity { entity, .. }
            | GuardConstraint::Existence { entity } => entity,
            GuardConstraint::Custom { .. } => "",
        }
    }

    /// Short subject, e.g. `order.status`
    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            GuardConstraint::StatusTransition { entity, field, .. }
            | GuardConstraint::Quantity { entity, field, .. } => format!("{entity}.{field}"),
            GuardConstraint::Existence { entity } => entity.clone(),
            GuardConstraint::Custom { description, .. } => description.clone(),
        }
    }

    /// Whether this constraint may only be fixed by a human
    #[inline]
    #[must_use]
    pub fn is_manual_only(&self) -> bool {
        matches!(self, GuardConstraint::Custom { .. })
    }
}

impl std::fmt::Display for GuardConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.class().as_str(), self.subject())
    }
}

/// Specification of one atom, before generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicSpec {
    /// Spec id (unique within a masterplan)
    pub id: SpecId,
    /// Sequence number from the atomizer
    pub sequence: u32,
    /// Symbol to generate
    pub name: String,
    /// Natural-language description
    pub description: String,
    /// Ordered input name -> type
    #[serde(default)]
    pub input_types: IndexMap<String, String>,
    /// Output type
    #[serde(default)]
    pub output_type: Option<String>,
    /// Target line count
    pub target_loc: u32,
    /// Cyclomatic complexity bound
    pub max_complexity: f64,
    /// Required imports
    #[serde(default)]
    pub imports: Vec<String>,
    /// Specs that must complete first
    #[serde(default)]
    pub dependencies: Vec<SpecId>,
    /// Preconditions
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// Postconditions
    #[serde(default)]
    pub postconditions: Vec<String>,
    /// Acceptance tests
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    /// No side effects allowed
    #[serde(default)]
    pub must_be_pure: bool,
    /// Repeated calls must be safe
    #[serde(default)]
    pub must_be_idempotent: bool,
    /// Target language
    #[serde(default)]
    pub language: Language,
    /// Target file
    #[serde(default)]
    pub target_file: Option<String>,
    /// Business-logic guards
    #[serde(default)]
    pub guards: Vec<GuardConstraint>,
}

impl AtomicSpec {
    /// Create a spec with defaults (target 10 LOC, complexity bound 3.0)
    #[must_use]
    pub fn new(id: impl Into<SpecId>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: 0,
            name: name.into(),
            description: description.into(),
            input_types: IndexMap::new(),
            output_type: None,
            target_loc: 10,
            max_complexity: 3.0,
            imports: Vec::new(),
            dependencies: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            test_cases: Vec::new(),
            must_be_pure: false,
            must_be_idempotent: false,
            language: Language::default(),
            target_file: None,
            guards: Vec::new(),
        }
    }

    /// With sequence number
    #[inline]
    #[must_use]
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Add an input
    #[inline]
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.input_types.insert(name.into(), ty.into());
        self
    }

    /// With output type
    #[inline]
    #[must_use]
    pub fn with_output(mut self, ty: impl Into<String>) -> Self {
        self.output_type = Some(ty.into());
        self
    }

    /// With target LOC
    #[inline]
    #[must_use]
    pub fn with_target_loc(mut self, loc: u32) -> Self {
        self.target_loc = loc;
        self
    }

    /// With complexity bound
    #[inline]
    #[must_use]
    pub fn with_max_complexity(mut self, complexity: f64) -> Self {
        self.max_complexity = complexity;
        self
    }

    /// Add a required import
    #[inline]
    #[must_use]
    pub fn with_import(mut self, import: impl Into<String>) -> Self {
        self.imports.push(import.into());
        self
    }

    /// Add a dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, spec: impl Into<SpecId>) -> Self {
        let spec = spec.into();
        if !self.dependencies.contains(&spec) {
            self.dependencies.push(spec);
        }
        self
    }

    /// Add a test case
    #[inline]
    #[must_use]
    pub fn with_test(mut self, test: TestCase) -> Self {
        self.test_cases.push(test);
        self
    }

    /// Mark pure
    #[inline]
    #[must_use]
    pub fn pure(mut self) -> Self {
        self.must_be_pure = true;
        self
    }

    /// With language
    #[inline]
    #[must_use]
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// With target file
    #[inline]
    #[must_use]
    pub fn with_target_file(mut self, file: impl Into<String>) -> Self {
        self.target_file = Some(file.into());
        self
    }

    /// Add a guard constraint
    #[inline]
    #[must_use]
    pub fn with_guard(mut self, guard: GuardConstraint) -> Self {
        self.guards.push(guard);
        self
    }

    /// Module path other atoms import this one by
    #[must_use]
    pub fn module_name(&self) -> String {
        match &self.target_file {
            Some(file) => file
                .rsplit('/')
                .next()
                .unwrap_or(file)
                .split('.')
                .next()
                .unwrap_or(file)
                .to_string(),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_deduplicates_dependencies() {
        let spec = AtomicSpec::new("b", "total", "Compute order total")
            .depends_on("a")
            .depends_on("a");
        assert_eq!(spec.dependencies, vec![SpecId::new("a")]);
    }

    #[test]
    fn module_name_prefers_target_file_stem() {
        let spec = AtomicSpec::new("a", "parse_order", "Parse an order")
            .with_target_file("orders/parsing.py");
        assert_eq!(spec.module_name(), "parsing");

        let bare = AtomicSpec::new("b", "parse_order", "Parse an order");
        assert_eq!(bare.module_name(), "parse_order");
    }

    #[test]
    fn guard_constraint_tagged_serialization() {
        let guard = GuardConstraint::Existence {
            entity: "order".into(),
        };
        let value = serde_json::to_value(&guard).unwrap();
        assert_eq!(value, json!({"kind": "existence", "entity": "order"}));
        assert!(!guard.is_manual_only());
        assert_eq!(guard.to_string(), "existence order");
    }
}
