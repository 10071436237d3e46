//! # Atomex Validation
//!
//! Everything that happens between a generation attempt and the atom's next
//! status:
//! - four-level validation of generated code ([`ValidationPipeline`])
//! - atomicity metrics and confidence
//! - guard repair for missing business-logic checks ([`RepairAgent`])
//! - retry planning with escalating temperature and feedback ([`RetryPlanner`])
//! - the human review queue ([`HumanReviewQueue`])
//! - composite precision scoring ([`PrecisionScore`])

pub mod atomicity;
pub mod confidence;
pub mod error;
pub mod inspect;
pub mod levels;
pub mod precision;
pub mod repair;
pub mod retry;
pub mod review;
pub mod validator;

pub use atomicity::{assess, cyclomatic_complexity, AtomicityReport};
pub use confidence::{confidence, review_priority};
pub use error::{RepairError, ReviewError};
pub use levels::{guard_enforced, guard_marker, DependencyView, LevelReport, ValidationContext, ValidationPipeline};
pub use precision::{AcceptanceTestRunner, AtomOutcome, PrecisionScore, StructuralTestRunner, TestOutcome};
pub use repair::{inject_guard, render_guard, strategy_for, GuardStrategy, RepairAgent, RepairOutcome};
pub use retry::{analyze_backend_error, analyze_results, AttemptRecord, RetryPlan, RetryPlanner};
pub use review::HumanReviewQueue;
pub use validator::{AtomValidator, Decision, Verdict};
