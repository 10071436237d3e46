use atomex_core::{
    AtomStatus, AtomicSpec, AtomicUnit, AtomizerConfig, DependencyType, ErrorCategory, GuardConstraint, Language,
    MasterplanId, ReviewConfig, TestCase, TestPriority,
};
use atomex_validation::{
    inject_guard, AcceptanceTestRunner, AtomOutcome, AtomValidator, Decision, DependencyView, HumanReviewQueue,
    PrecisionScore, StructuralTestRunner,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn reserve_spec() -> AtomicSpec {
    AtomicSpec::new("reserve", "reserve_stock", "Reserve stock for an order")
        .with_input("order", "Order")
        .with_output("Order")
        .with_target_loc(8)
        .with_test(TestCase::new("reserves", serde_json::json!({}), serde_json::json!({})))
        .with_test(TestCase::new("logs", serde_json::json!({}), serde_json::json!({})).with_priority(TestPriority::Should))
}

fn atom(spec: &AtomicSpec, attempts: u32) -> AtomicUnit {
    let mut atom = AtomicUnit::from_spec(MasterplanId::new(), spec, 3);
    atom.status = AtomStatus::Running;
    atom.attempts = attempts;
    atom
}

const CLEAN: &str = "def reserve_stock(order):\n    order.reserved = True\n    return order\n";

#[tokio::test]
async fn clean_first_attempt_is_accepted() {
    let spec = reserve_spec();
    let unit = atom(&spec, 1);
    let verdict = AtomValidator::default().evaluate(&spec, &unit, CLEAN, &[]).await;
    assert_eq!(verdict.decision, Decision::Accept);
    assert_eq!(verdict.status(), AtomStatus::Completed);
    assert_eq!(verdict.results.len(), 4);
    assert!((verdict.confidence - 1.0).abs() < 1e-9);
    assert!(verdict.review_entry(&unit).is_none());
}

#[tokio::test]
async fn missing_guard_is_repaired_and_revalidated() {
    let spec = reserve_spec().with_guard(GuardConstraint::Quantity {
        entity: "order".into(),
        field: "qty".into(),
        min: Some(1),
        max: None,
    });
    let unit = atom(&spec, 1);
    let verdict = AtomValidator::default().evaluate(&spec, &unit, CLEAN, &[]).await;

    assert!(verdict.guard_injected);
    assert_eq!(verdict.results.len(), 8, "both passes are kept");
    assert!(verdict.all_levels_passed);
    assert!(verdict.code.contains("if order.qty < 1:"));
    assert!((verdict.confidence - 0.95).abs() < 1e-9);
    assert_eq!(verdict.decision, Decision::Accept);

    let (again, changed) = inject_guard(&verdict.code, Language::Python, "reserve_stock", &spec.guards[0]).unwrap();
    assert!(!changed);
    assert_eq!(again, verdict.code);
}

#[tokio::test]
async fn custom_constraint_goes_to_manual_review() {
    let spec = reserve_spec().with_guard(GuardConstraint::Custom {
        description: "warehouse must be open".into(),
        expected_snippet: Some("warehouse_open(".into()),
    });
    let unit = atom(&spec, 1);
    let verdict = AtomValidator::default().evaluate(&spec, &unit, CLEAN, &[]).await;
    assert!(matches!(verdict.decision, Decision::ManualReview { .. }));
    assert_eq!(verdict.status(), AtomStatus::Failed);
    let entry = verdict.review_entry(&unit).unwrap();
    assert!(entry.manual_only);
    assert!(entry.reason.starts_with("manual review required"));
}

#[tokio::test]
async fn failures_retry_then_exhaust_with_one_review_entry() {
    let spec = reserve_spec();
    let broken = "import requests\n\ndef reserve_stock(order):\n    return order\n";
    let validator = AtomValidator::default();

    let verdict = validator.evaluate(&spec, &atom(&spec, 1), broken, &[]).await;
    match &verdict.decision {
        Decision::Retry { analysis } => assert_eq!(analysis.category, ErrorCategory::Import),
        other => panic!("expected retry, got {other:?}"),
    }
    assert_eq!(verdict.status(), AtomStatus::Running);

    let last = atom(&spec, 3);
    let verdict = validator.evaluate(&spec, &last, broken, &[]).await;
    assert!(matches!(verdict.decision, Decision::Exhausted { .. }));

    let queue = HumanReviewQueue::new();
    let entry = verdict.review_entry(&last).unwrap();
    assert!(queue.escalate(entry.clone()).1);
    assert!(!queue.escalate(verdict.review_entry(&last).unwrap()).1);
    assert_eq!(queue.pending(None).len(), 1);
    assert!(!entry.suggested_fixes.is_empty());
}

#[tokio::test]
async fn low_confidence_completion_is_held() {
    let spec = reserve_spec();
    let validator = AtomValidator::new(
        AtomizerConfig::default(),
        ReviewConfig {
            confidence_threshold: 0.99,
        },
    );
    let unit = atom(&spec, 3);
    let verdict = validator.evaluate(&spec, &unit, CLEAN, &[]).await;
    assert!(matches!(verdict.decision, Decision::Hold { .. }));
    assert_eq!(verdict.status(), AtomStatus::Completed);

    let mut updated = unit.clone();
    verdict.apply_to(&mut updated);
    assert!(updated.needs_review);
    assert!(updated.review_priority.is_some());
    assert_eq!(updated.loc, 3);
}

#[tokio::test]
async fn held_dependency_fails_system_level() {
    let dep_spec = AtomicSpec::new("load", "load_order", "Load an order");
    let spec = reserve_spec().depends_on("load");
    let view = DependencyView {
        spec: &dep_spec,
        status: AtomStatus::Completed,
        needs_review: true,
        dependency_type: DependencyType::Temporal,
    };
    let verdict = AtomValidator::default()
        .evaluate(&spec, &atom(&spec, 1), CLEAN, &[view])
        .await;
    match verdict.decision {
        Decision::Retry { analysis } => assert_eq!(analysis.category, ErrorCategory::Integration),
        other => panic!("expected retry, got {other:?}"),
    }
}

#[tokio::test]
async fn structural_runner_feeds_precision() {
    let spec = reserve_spec();
    let mut done = atom(&spec, 1);
    done.status = AtomStatus::Completed;
    let outcomes = StructuralTestRunner.run(&spec, &done, true).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.passed));

    let score = PrecisionScore::compute(
        &atomex_core::PrecisionPolicy::default(),
        &outcomes,
        &[AtomOutcome {
            succeeded: true,
            all_levels_passed: true,
        }],
    );
    assert!((score.composite - 1.0).abs() < f64::EPSILON);
}

proptest! {
    #[test]
    fn prop_guard_injection_is_idempotent(
        entity in "[a-z]{1,8}",
        field in "[a-z]{1,8}",
        lo in proptest::option::of(-50i64..50),
        hi in proptest::option::of(50i64..500),
        lang in prop_oneof![
            Just(Language::Python),
            Just(Language::Rust),
            Just(Language::TypeScript),
            Just(Language::Go),
        ],
    ) {
        prop_assume!(lo.is_some() || hi.is_some());
        let code = match lang {
            Language::Python => "def f(x):\n    return x\n",
            Language::Rust => "fn f(x: u32) -> u32 {\n    x\n}\n",
            Language::TypeScript | Language::JavaScript => "function f(x) {\n  return x;\n}\n",
            Language::Go => "func f(x int) error {\n\treturn nil\n}\n",
        };
        let guard = GuardConstraint::Quantity { entity, field, min: lo, max: hi };
        let (once, changed) = inject_guard(code, lang, "f", &guard).unwrap();
        prop_assert!(changed);
        let (twice, changed) = inject_guard(&once, lang, "f", &guard).unwrap();
        prop_assert!(!changed);
        prop_assert_eq!(once, twice);
    }
}
