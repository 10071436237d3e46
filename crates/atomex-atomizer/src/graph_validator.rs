//! Dependency graph validation over specs
//!
//! Cycle detection is an iterative depth-first search with an explicit
//! stack and white/gray/black colouring, so deep chains never overflow the
//! call stack. Any problem rejects the whole batch.

use atomex_core::{AtomicSpec, SpecId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A structural problem with the spec graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphIssue {
    /// Two specs share an id
    DuplicateSpec {
        /// The repeated id
        spec: SpecId,
    },
    /// Dependency on a spec not in the batch
    DanglingDependency {
        /// Dependent spec
        spec: SpecId,
        /// Missing prerequisite
        missing: SpecId,
    },
    /// Dependency cycle; the first id is repeated at the end
    Cycle {
        /// Specs along the cycle
        path: Vec<SpecId>,
    },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphIssue::DuplicateSpec { spec } => write!(f, "duplicate spec id {spec}"),
            GraphIssue::DanglingDependency { spec, missing } => {
                write!(f, "{spec} depends on unknown spec {missing}")
            }
            GraphIssue::Cycle { path } => {
                let rendered: Vec<&str> = path.iter().map(SpecId::as_str).collect();
                write!(f, "cycle {}", rendered.join(" -> "))
            }
        }
    }
}

/// Graph validation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphValidation {
    /// No errors found
    pub valid: bool,
    /// Every structural problem, in discovery order
    pub errors: Vec<GraphIssue>,
    /// Prerequisites first; empty when invalid
    pub topological_order: Vec<SpecId>,
}

impl GraphValidation {
    /// Cycles found
    pub fn cycles(&self) -> impl Iterator<Item = &[SpecId]> {
        self.errors.iter().filter_map(|e| match e {
            GraphIssue::Cycle { path } => Some(path.as_slice()),
            _ => None,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Validate the dependency structure of a batch
#[must_use]
pub fn validate_graph(specs: &[AtomicSpec]) -> GraphValidation {
    let mut errors = Vec::new();

    let mut index: IndexMap<&SpecId, usize> = IndexMap::with_capacity(specs.len());
    for spec in specs {
        if index.contains_key(&spec.id) {
            errors.push(GraphIssue::DuplicateSpec { spec: spec.id.clone() });
        } else {
            index.insert(&spec.id, index.len());
        }
    }

    // Adjacency over the first occurrence of each id
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); index.len()];
    let mut seen = vec![false; index.len()];
    for spec in specs {
        let Some(&from) = index.get(&spec.id) else { continue };
        if std::mem::replace(&mut seen[from], true) {
            continue;
        }
        for dep in &spec.dependencies {
            match index.get(dep) {
                Some(&to) => adjacency[from].push(to),
                None => errors.push(GraphIssue::DanglingDependency {
                    spec: spec.id.clone(),
                    missing: dep.clone(),
                }),
            }
        }
    }

    let ids: Vec<&SpecId> = index.keys().copied().collect();
    let (order, cycles) = depth_first(&adjacency);
    for cycle in cycles {
        let path: Vec<SpecId> = cycle.into_iter().map(|i| ids[i].clone()).collect();
        warn!(cycle = ?path, "Dependency cycle detected");
        errors.push(GraphIssue::Cycle { path });
    }

    let valid = errors.is_empty();
    let topological_order = if valid {
        order.into_iter().map(|i| ids[i].clone()).collect()
    } else {
        Vec::new()
    };
    debug!(specs = specs.len(), valid, issues = errors.len(), "Graph validated");

    GraphValidation {
        valid,
        errors,
        topological_order,
    }
}

/// Postorder (prerequisites first) plus every cycle closed by a back edge
fn depth_first(adjacency: &[Vec<usize>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    let n = adjacency.len();
    let mut color = vec![Color::White; n];
    let mut order = Vec::with_capacity(n);
    let mut cycles = Vec::new();
    // (node, index of next neighbour to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if color[start] != Color::White {
            continue;
        }
        color[start] = Color::Gray;
        stack.push((start, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if let Some(&dep) = adjacency[node].get(next) {
                top.1 += 1;
                match color[dep] {
                    Color::White => {
                        color[dep] = Color::Gray;
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut path: Vec<usize> = stack[from..].iter().map(|(n, _)| *n).collect();
                        path.push(dep);
                        cycles.push(path);
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                order.push(node);
                stack.pop();
            }
        }
    }
    (order, cycles)
}
