//! Testing utilities for the atomex workspace
//!
//! Spec fixtures, a scripted generation backend and a settable metrics
//! source.

#![allow(missing_docs)]

use async_trait::async_trait;
use atomex_concurrency::{MetricsSource, MetricsUnavailable, SystemSnapshot};
use atomex_core::{
    AtomicSpec, BackendError, GenerationBackend, GenerationOutput, GenerationRequest, SpecId, TestCase,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Small Python spec that passes every atomizer rule
pub fn spec(id: &str, sequence: u32, deps: &[&str]) -> AtomicSpec {
    let base = AtomicSpec::new(id, format!("step_{}", id.to_ascii_lowercase()), "Compute a value")
        .with_sequence(sequence)
        .with_input("x", "int")
        .with_output("int")
        .with_target_loc(6)
        .with_test(TestCase::new("returns_input", serde_json::json!(1), serde_json::json!(1)));
    deps.iter().fold(base, |s, d| s.depends_on(*d))
}

/// A -> B, A -> C, B -> D, C -> D, D -> E
pub fn diamond() -> Vec<AtomicSpec> {
    vec![
        spec("A", 1, &[]),
        spec("B", 2, &["A"]),
        spec("C", 3, &["A"]),
        spec("D", 4, &["B", "C"]),
        spec("E", 5, &["D"]),
    ]
}

/// S0 -> S1 -> ... -> S{n-1}
pub fn chain(n: usize) -> Vec<AtomicSpec> {
    (0..n)
        .map(|i| {
            let id = format!("S{i}");
            let prev = i.checked_sub(1).map(|p| format!("S{p}"));
            let deps: Vec<&str> = prev.as_deref().into_iter().collect();
            spec(&id, i as u32 + 1, &deps)
        })
        .collect()
}

/// `n` independent specs
pub fn wide(n: usize) -> Vec<AtomicSpec> {
    (0..n).map(|i| spec(&format!("W{i}"), i as u32 + 1, &[])).collect()
}

/// Python implementation that passes validation for a guard-free spec
pub fn clean_python(spec: &AtomicSpec) -> String {
    let params: Vec<&str> = spec.input_types.keys().map(String::as_str).collect();
    let value = params.first().copied().unwrap_or("0");
    format!(
        "def {}({}):\n    result = {value}\n    return result\n",
        spec.name,
        params.join(", ")
    )
}

/// One scripted backend response
#[derive(Debug, Clone)]
pub enum Step {
    Code(String),
    Fail(BackendError),
    /// Sleep, then answer with clean code
    Stall(Duration),
}

/// Backend that answers from per-spec scripts, then with [`clean_python`]
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<SpecId, VecDeque<Step>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a spec, consumed one per call
    #[must_use]
    pub fn script(self, spec: impl Into<SpecId>, steps: Vec<Step>) -> Self {
        self.scripts.lock().entry(spec.into()).or_default().extend(steps);
        self
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, spec: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.spec.id.as_str() == spec)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.requests.lock().push(request.clone());
        let step = self
            .scripts
            .lock()
            .get_mut(&request.spec.id)
            .and_then(VecDeque::pop_front);
        let code = match step {
            Some(Step::Code(code)) => code,
            Some(Step::Fail(error)) => return Err(error),
            Some(Step::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                clean_python(&request.spec)
            }
            None => clean_python(&request.spec),
        };
        Ok(GenerationOutput {
            code,
            tokens_used: 120,
            cost_usd: 0.001,
        })
    }
}

pub fn healthy_snapshot() -> SystemSnapshot {
    SystemSnapshot {
        cpu_percent: 30.0,
        memory_percent: 40.0,
        p95_latency_ms: 200.0,
        ..SystemSnapshot::default()
    }
}

pub fn overloaded_snapshot() -> SystemSnapshot {
    SystemSnapshot {
        cpu_percent: 97.0,
        p95_latency_ms: 4_000.0,
        ..healthy_snapshot()
    }
}

/// Returns whatever snapshot was last set; `None` means unavailable
#[derive(Debug)]
pub struct StaticMetricsSource(Mutex<Option<SystemSnapshot>>);

impl StaticMetricsSource {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self(Mutex::new(Some(snapshot)))
    }

    pub fn healthy() -> Self {
        Self::new(healthy_snapshot())
    }

    pub fn unavailable() -> Self {
        Self(Mutex::new(None))
    }

    pub fn set(&self, snapshot: Option<SystemSnapshot>) {
        *self.0.lock() = snapshot;
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn sample(&self) -> Result<SystemSnapshot, MetricsUnavailable> {
        self.0
            .lock()
            .clone()
            .ok_or_else(|| MetricsUnavailable("static source unset".into()))
    }
}
