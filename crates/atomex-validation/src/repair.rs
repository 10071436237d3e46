//! Guard repair: inject missing business-logic checks into generated code
//!
//! Each constraint class maps to one strategy through [`strategy_for`]. The
//! rendered clause starts with a marker comment, which makes injection
//! idempotent and lets the COMPONENT level recognize the guard.

use crate::error::RepairError;
use crate::inspect;
use crate::levels::guard_marker;
use atomex_core::{ConstraintClass, GuardConstraint, GuardPatternKey, Language, PatternStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a constraint class is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStrategy {
    /// Reject unless the status is in the allowed set
    StatusCheck,
    /// Reject values outside bounds
    RangeCheck,
    /// Reject a missing entity
    PresenceCheck,
    /// Escalate to a human
    ManualReview,
}

/// Strategy table
#[must_use]
pub fn strategy_for(class: ConstraintClass) -> GuardStrategy {
    match class {
        ConstraintClass::StatusTransition => GuardStrategy::StatusCheck,
        ConstraintClass::Quantity => GuardStrategy::RangeCheck,
        ConstraintClass::Existence => GuardStrategy::PresenceCheck,
        ConstraintClass::Custom => GuardStrategy::ManualReview,
    }
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bound_condition(subject: &str, min: Option<i64>, max: Option<i64>, or: &str) -> Option<String> {
    match (min, max) {
        (Some(lo), Some(hi)) => Some(format!("{subject} < {lo} {or} {subject} > {hi}")),
        (Some(lo), None) => Some(format!("{subject} < {lo}")),
        (None, Some(hi)) => Some(format!("{subject} > {hi}")),
        (None, None) => None,
    }
}

/// Guard clause lines for `language`, without indentation
pub fn render_guard(language: Language, guard: &GuardConstraint) -> Result<Vec<String>, RepairError> {
    let marker = format!("{} {}", language.comment_prefix(), guard_marker(guard));
    let (condition, message) = match (guard, language) {
        (GuardConstraint::Custom { .. }, _) => return Err(RepairError::ManualOnly(guard.clone())),
        (GuardConstraint::StatusTransition { entity, field, allowed }, _) => {
            if allowed.is_empty() {
                return Err(RepairError::Unrenderable(guard.clone()));
            }
            let subject = format!("{entity}.{field}");
            let list = quoted_list(allowed);
            let condition = match language {
                Language::Python => format!("{subject} not in ({list},)"),
                Language::Rust => format!("![{list}].contains(&{subject}.as_str())"),
                Language::TypeScript | Language::JavaScript => format!("![{list}].includes({subject})"),
                Language::Go => allowed
                    .iter()
                    .map(|a| format!("{subject} != \"{a}\""))
                    .collect::<Vec<_>>()
                    .join(" && "),
            };
            (condition, format!("{subject} must be one of: {}", allowed.join(", ")))
        }
        (GuardConstraint::Quantity { entity, field, min, max }, _) => {
            let subject = format!("{entity}.{field}");
            let or = if language == Language::Python { "or" } else { "||" };
            let condition =
                bound_condition(&subject, *min, *max, or).ok_or_else(|| RepairError::Unrenderable(guard.clone()))?;
            let range = format!(
                "[{}, {}]",
                min.map_or_else(|| "-inf".to_string(), |v| v.to_string()),
                max.map_or_else(|| "inf".to_string(), |v| v.to_string())
            );
            (condition, format!("{subject} must be within {range}"))
        }
        (GuardConstraint::Existence { entity }, _) => {
            let condition = match language {
                Language::Python => format!("{entity} is None"),
                Language::Rust => format!("{entity}.is_none()"),
                Language::TypeScript | Language::JavaScript => format!("{entity} == null"),
                Language::Go => format!("{entity} == nil"),
            };
            (condition, format!("{entity} must exist"))
        }
    };
    let message = message.replace('"', "'");
    let lines = match language {
        Language::Python => vec![marker, format!("if {condition}:"), format!("    raise ValueError(\"{message}\")")],
        Language::Rust => vec![
            marker,
            format!("if {condition} {{"),
            format!("    return Err(\"{message}\".into());"),
            "}".to_string(),
        ],
        Language::TypeScript | Language::JavaScript => vec![
            marker,
            format!("if ({condition}) {{"),
            format!("    throw new Error(\"{message}\");"),
            "}".to_string(),
        ],
        Language::Go => vec![
            marker,
            format!("if {condition} {{"),
            format!("    return errors.New(\"{message}\")"),
            "}".to_string(),
        ],
    };
    Ok(lines)
}

/// Insert a guard right after the method signature; a no-op when present
pub fn inject_guard(
    code: &str,
    language: Language,
    method: &str,
    guard: &GuardConstraint,
) -> Result<(String, bool), RepairError> {
    if code.contains(&guard_marker(guard)) {
        return Ok((code.to_string(), false));
    }
    let clause = render_guard(language, guard)?;
    let def = inspect::primary_definition(code, language, method).ok_or(RepairError::NoSignature)?;
    let (_, body_line) = inspect::signature(code, language, &def);

    let lines: Vec<&str> = code.lines().collect();
    let def_indent = inspect::indentation(lines[def.line]);
    let body_indent = lines
        .iter()
        .skip(body_line + 1)
        .find(|l| !l.trim().is_empty())
        .map(|l| inspect::indentation(l))
        .filter(|indent| indent.len() > def_indent.len())
        .map_or_else(|| format!("{def_indent}    "), ToString::to_string);

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + clause.len());
    out.extend(lines[..=body_line].iter().map(ToString::to_string));
    out.extend(clause.iter().map(|l| format!("{body_indent}{l}")));
    out.extend(lines[body_line + 1..].iter().map(ToString::to_string));
    let mut repaired = out.join("\n");
    if code.ends_with('\n') {
        repaired.push('\n');
    }
    Ok((repaired, true))
}

/// Result of a repair pass
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    /// Code after repair
    pub code: String,
    /// Guards actually inserted by this pass
    pub injected: Vec<GuardConstraint>,
}

/// Applies guard strategies and learns the signatures it injects
#[derive(Clone, Default)]
pub struct RepairAgent {
    patterns: Option<Arc<dyn PatternStore>>,
}

impl std::fmt::Debug for RepairAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairAgent")
            .field("patterns", &self.patterns.is_some())
            .finish()
    }
}

impl RepairAgent {
    /// Agent without a pattern store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record injected guards in a pattern store
    #[must_use]
    pub fn with_patterns(mut self, patterns: Arc<dyn PatternStore>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Inject every guard; fails on the first one that cannot be automated
    pub async fn repair(
        &self,
        code: &str,
        language: Language,
        method: &str,
        guards: &[GuardConstraint],
    ) -> Result<RepairOutcome, RepairError> {
        if let Some(manual) = guards.iter().find(|g| strategy_for(g.class()) == GuardStrategy::ManualReview) {
            return Err(RepairError::ManualOnly(manual.clone()));
        }
        let mut current = code.to_string();
        let mut injected = Vec::new();
        for guard in guards {
            let (next, changed) = inject_guard(&current, language, method, guard)?;
            current = next;
            if changed {
                debug!(method, guard = %guard, "Injected guard clause");
                self.learn(language, method, guard).await;
                injected.push(guard.clone());
            }
        }
        if !injected.is_empty() {
            info!(method, count = injected.len(), "Repaired missing guards");
        }
        Ok(RepairOutcome {
            code: current,
            injected,
        })
    }

    async fn learn(&self, language: Language, method: &str, guard: &GuardConstraint) {
        let Some(store) = &self.patterns else { return };
        let key = GuardPatternKey {
            class: guard.class(),
            entity: guard.entity().to_string(),
            method: method.to_string(),
        };
        let signature = match render_guard(language, guard) {
            Ok(lines) => lines.join("\n"),
            Err(_) => return,
        };
        if let Err(e) = store.record_guard(key, signature).await {
            warn!(error = %e, method, "Failed to record guard pattern");
        }
    }
}
