//! Composite precision score and acceptance tests

use async_trait::async_trait;
use atomex_core::{AtomicSpec, AtomicUnit, PrecisionPolicy, TestPriority};
use serde::{Deserialize, Serialize};

const SPEC_WEIGHT: f64 = 0.50;
const INTEGRATION_WEIGHT: f64 = 0.30;
const VALIDATION_WEIGHT: f64 = 0.20;

/// Result of one acceptance test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test name
    pub name: String,
    /// MUST or SHOULD
    pub priority: TestPriority,
    /// Test passed
    pub passed: bool,
}

/// Per-atom inputs to the integration and validation components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomOutcome {
    /// Finished with a successful execution status
    pub succeeded: bool,
    /// Latest validation passed all four levels
    pub all_levels_passed: bool,
}

/// Weighted precision: 0.5 spec conformance, 0.3 integration, 0.2 validation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecisionScore {
    /// Passed MUST tests over MUST tests
    pub must_rate: f64,
    /// Passed SHOULD tests over SHOULD tests
    pub should_rate: f64,
    /// MUST rate until every MUST passes, then graded by SHOULD rate
    pub spec_conformance: f64,
    /// Atoms that succeeded
    pub integration_pass: f64,
    /// Atoms whose latest validation passed every level
    pub validation_pass: f64,
    /// Weighted total
    pub composite: f64,
    /// Minimum acceptable composite
    pub gate: f64,
    /// Goal composite
    pub target: f64,
}

fn rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let r = passed as f64 / total as f64;
    r
}

impl PrecisionScore {
    /// Score a masterplan or a wave
    ///
    /// Empty categories count as fully passing.
    #[must_use]
    pub fn compute(policy: &PrecisionPolicy, tests: &[TestOutcome], atoms: &[AtomOutcome]) -> Self {
        let (must, must_passed) = count(tests, TestPriority::Must);
        let (should, should_passed) = count(tests, TestPriority::Should);
        let must_rate = rate(must_passed, must);
        let should_rate = rate(should_passed, should);

        #[allow(clippy::float_cmp)]
        let spec_conformance = if must_rate == 1.0 {
            if should_rate >= policy.should_pass_required {
                1.0
            } else {
                0.75 + 0.25 * should_rate
            }
        } else {
            must_rate
        };

        let integration_pass = rate(atoms.iter().filter(|a| a.succeeded).count(), atoms.len());
        let validation_pass = rate(atoms.iter().filter(|a| a.all_levels_passed).count(), atoms.len());
        let composite = (SPEC_WEIGHT * spec_conformance
            + INTEGRATION_WEIGHT * integration_pass
            + VALIDATION_WEIGHT * validation_pass)
            .clamp(0.0, 1.0);

        Self {
            must_rate,
            should_rate,
            spec_conformance,
            integration_pass,
            validation_pass,
            composite,
            gate: policy.gate,
            target: policy.target,
        }
    }

    /// Composite at or above the gate
    #[must_use]
    pub fn meets_gate(&self) -> bool {
        self.composite >= self.gate
    }

    /// Composite at or above the target
    #[must_use]
    pub fn meets_target(&self) -> bool {
        self.composite >= self.target
    }
}

fn count(tests: &[TestOutcome], priority: TestPriority) -> (usize, usize) {
    tests
        .iter()
        .filter(|t| t.priority == priority)
        .fold((0, 0), |(total, passed), t| (total + 1, passed + usize::from(t.passed)))
}

/// Runs an atom's acceptance tests
#[async_trait]
pub trait AcceptanceTestRunner: Send + Sync {
    /// Outcomes for every test case in the spec
    async fn run(&self, spec: &AtomicSpec, atom: &AtomicUnit, all_levels_passed: bool) -> Vec<TestOutcome>;
}

/// Passes a test iff the atom completed with every level passing
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralTestRunner;

#[async_trait]
impl AcceptanceTestRunner for StructuralTestRunner {
    async fn run(&self, spec: &AtomicSpec, atom: &AtomicUnit, all_levels_passed: bool) -> Vec<TestOutcome> {
        let passed = atom.status.is_success() && all_levels_passed;
        spec.test_cases
            .iter()
            .map(|t| TestOutcome {
                name: t.name.clone(),
                priority: t.priority,
                passed,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test(priority: TestPriority, passed: bool) -> TestOutcome {
        TestOutcome {
            name: "t".into(),
            priority,
            passed,
        }
    }

    fn ok() -> AtomOutcome {
        AtomOutcome {
            succeeded: true,
            all_levels_passed: true,
        }
    }

    #[test]
    fn perfect_inputs_score_exactly_one() {
        let tests = vec![test(TestPriority::Must, true), test(TestPriority::Should, true)];
        let score = PrecisionScore::compute(&PrecisionPolicy::default(), &tests, &[ok(), ok()]);
        assert!((score.composite - 1.0).abs() < f64::EPSILON);
        assert!(score.meets_gate() && score.meets_target());
    }

    #[test]
    fn empty_categories_pass() {
        let score = PrecisionScore::compute(&PrecisionPolicy::default(), &[], &[]);
        assert!((score.composite - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weak_should_tests_cap_conformance() {
        let tests = vec![
            test(TestPriority::Must, true),
            test(TestPriority::Should, true),
            test(TestPriority::Should, false),
        ];
        let score = PrecisionScore::compute(&PrecisionPolicy::default(), &tests, &[ok()]);
        assert!((score.spec_conformance - (0.75 + 0.25 * 0.5)).abs() < 1e-9);
        assert!(!score.meets_gate());
    }

    #[test]
    fn failed_must_test_uses_must_rate() {
        let tests = vec![test(TestPriority::Must, true), test(TestPriority::Must, false)];
        let atoms = [
            ok(),
            AtomOutcome {
                succeeded: false,
                all_levels_passed: false,
            },
        ];
        let score = PrecisionScore::compute(&PrecisionPolicy::default(), &tests, &atoms);
        assert!((score.spec_conformance - 0.5).abs() < 1e-9);
        assert!((score.composite - (0.25 + 0.15 + 0.10)).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_composite_in_unit_interval(
            tests in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..40),
            atoms in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..40),
        ) {
            let tests: Vec<TestOutcome> = tests
                .into_iter()
                .map(|(must, passed)| test(if must { TestPriority::Must } else { TestPriority::Should }, passed))
                .collect();
            let atoms: Vec<AtomOutcome> = atoms
                .into_iter()
                .map(|(succeeded, all_levels_passed)| AtomOutcome { succeeded, all_levels_passed })
                .collect();
            let score = PrecisionScore::compute(&PrecisionPolicy::default(), &tests, &atoms);
            prop_assert!((0.0..=1.0).contains(&score.composite));
            prop_assert!((0.0..=1.0).contains(&score.spec_conformance));
        }
    }
}
