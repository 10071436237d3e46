//! Dependency classification
//!
//! Classification and strength are diagnostic; ordering never reads them.

use atomex_core::{AtomicSpec, DependencyType, SpecId};
use serde::{Deserialize, Serialize};

/// A dependency between two accepted specs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedDependency {
    /// Dependent
    pub from: SpecId,
    /// Prerequisite
    pub to: SpecId,
    /// Inferred from names, types and modules
    pub dependency_type: DependencyType,
    /// Coupling strength in [0, 1]
    pub strength: f64,
}

/// Classify why `dependent` needs `prerequisite`
///
/// First match wins: import, data flow, function call, type, temporal.
#[must_use]
pub fn classify(dependent: &AtomicSpec, prerequisite: &AtomicSpec) -> DependencyType {
    let module = prerequisite.module_name();
    let imports_it = dependent
        .imports
        .iter()
        .any(|import| mentions(import, &module) || mentions(import, &prerequisite.name));
    if imports_it {
        return DependencyType::Import;
    }

    if let Some(output) = prerequisite.output_type.as_deref() {
        let output = normalize_type(output);
        if dependent.input_types.values().any(|ty| normalize_type(ty) == output) {
            return DependencyType::DataFlow;
        }
    }

    if mentions(&dependent.description, &prerequisite.name) {
        return DependencyType::FunctionCall;
    }

    if let (Some(theirs), Some(ours)) = (&prerequisite.output_type, &dependent.output_type) {
        if mentions(ours, &normalize_type(theirs)) {
            return DependencyType::Type;
        }
    }

    DependencyType::Temporal
}

/// Classify every dependency of every spec
#[must_use]
pub fn classify_all(specs: &[AtomicSpec]) -> Vec<ClassifiedDependency> {
    let by_id: std::collections::HashMap<&SpecId, &AtomicSpec> = specs.iter().map(|s| (&s.id, s)).collect();
    specs
        .iter()
        .flat_map(|spec| {
            spec.dependencies.iter().filter_map(|dep| by_id.get(dep)).map(|prereq| {
                let dependency_type = classify(spec, prereq);
                ClassifiedDependency {
                    from: spec.id.clone(),
                    to: prereq.id.clone(),
                    dependency_type,
                    strength: dependency_type.default_strength(),
                }
            })
        })
        .collect()
}

fn normalize_type(ty: &str) -> String {
    ty.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_lowercase()
}

/// Whole-identifier, case-insensitive containment
fn mentions(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let haystack = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}
