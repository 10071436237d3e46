//! System load sampling and health evaluation

use crate::error::MetricsUnavailable;
use async_trait::async_trait;
use atomex_core::HealthThresholds;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// One sample of system load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Percent, 0 to 100
    pub cpu_percent: f64,
    /// Percent, 0 to 100
    pub memory_percent: f64,
    /// 95th percentile request latency
    pub p95_latency_ms: f64,
    /// Fraction of failed requests
    pub error_rate: f64,
    /// Requests in flight when sampled
    pub active_requests: usize,
    /// Sample time
    pub taken_at: DateTime<Utc>,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            p95_latency_ms: 0.0,
            error_rate: 0.0,
            active_requests: 0,
            taken_at: Utc::now(),
        }
    }
}

impl SystemSnapshot {
    /// Weighted load in [0, 1]
    ///
    /// 0.3 cpu + 0.3 memory + 0.3 latency (saturating at 1s) + 0.1 errors
    /// (saturating at 10%).
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        let cpu = (self.cpu_percent / 100.0).clamp(0.0, 1.0);
        let mem = (self.memory_percent / 100.0).clamp(0.0, 1.0);
        let latency = (self.p95_latency_ms / 1000.0).clamp(0.0, 1.0);
        let errors = (self.error_rate / 0.10).clamp(0.0, 1.0);
        0.3 * cpu + 0.3 * mem + 0.3 * latency + 0.1 * errors
    }
}

/// Per-dimension health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Every dimension within its threshold
    pub healthy: bool,
    /// CPU within threshold
    pub cpu_ok: bool,
    /// Memory within threshold
    pub memory_ok: bool,
    /// p95 latency within threshold
    pub latency_ok: bool,
    /// Error rate within threshold
    pub errors_ok: bool,
}

impl HealthReport {
    /// Evaluate a snapshot against thresholds
    #[must_use]
    pub fn evaluate(snapshot: &SystemSnapshot, thresholds: &HealthThresholds) -> Self {
        let cpu_ok = snapshot.cpu_percent <= thresholds.max_cpu_percent;
        let memory_ok = snapshot.memory_percent <= thresholds.max_memory_percent;
        let latency_ok = snapshot.p95_latency_ms <= thresholds.max_p95_latency_ms;
        let errors_ok = snapshot.error_rate <= thresholds.max_error_rate;
        Self {
            healthy: cpu_ok && memory_ok && latency_ok && errors_ok,
            cpu_ok,
            memory_ok,
            latency_ok,
            errors_ok,
        }
    }

    /// Everything fine
    #[must_use]
    pub fn all_ok() -> Self {
        Self {
            healthy: true,
            cpu_ok: true,
            memory_ok: true,
            latency_ok: true,
            errors_ok: true,
        }
    }
}

/// Direction of p95 latency over the retained history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTrend {
    /// Newer half of the history slower than the older half
    Rising,
    /// Newer half faster than the older half
    Falling,
    /// Within the band, or too few samples
    Stable,
}

/// Where snapshots come from
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Take a sample
    async fn sample(&self) -> Result<SystemSnapshot, MetricsUnavailable>;
}

/// Source for deployments without load metrics; always reports an idle system
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleMetricsSource;

#[async_trait]
impl MetricsSource for IdleMetricsSource {
    async fn sample(&self) -> Result<SystemSnapshot, MetricsUnavailable> {
        Ok(SystemSnapshot::default())
    }
}

/// Samples a source and keeps a bounded rolling history
pub struct MetricsMonitor {
    source: Arc<dyn MetricsSource>,
    history: RwLock<VecDeque<SystemSnapshot>>,
    capacity: usize,
}

impl std::fmt::Debug for MetricsMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsMonitor")
            .field("capacity", &self.capacity)
            .field("samples", &self.history.read().len())
            .finish_non_exhaustive()
    }
}

impl MetricsMonitor {
    /// Create with history capacity (at least 1)
    #[must_use]
    pub fn new(source: Arc<dyn MetricsSource>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            source,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Sample the source; an unavailable source yields a healthy default
    pub async fn sample(&self) -> SystemSnapshot {
        let snapshot = match self.source.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Metrics source unavailable, assuming healthy");
                SystemSnapshot::default()
            }
        };
        self.record(snapshot.clone());
        snapshot
    }

    /// Push a snapshot, evicting the oldest past capacity
    pub fn record(&self, snapshot: SystemSnapshot) {
        let mut history = self.history.write();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(snapshot);
    }

    /// Most recent snapshot
    #[must_use]
    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.history.read().back().cloned()
    }

    /// Copy of the history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<SystemSnapshot> {
        self.history.read().iter().cloned().collect()
    }

    /// Health of the latest snapshot; healthy before any sample
    #[must_use]
    pub fn is_healthy(&self, thresholds: &HealthThresholds) -> HealthReport {
        self.history
            .read()
            .back()
            .map_or_else(HealthReport::all_ok, |s| HealthReport::evaluate(s, thresholds))
    }

    /// Load factor of the latest snapshot
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.history.read().back().map_or(0.0, SystemSnapshot::load_factor)
    }

    /// Compare mean p95 latency of the older and newer halves of the history
    #[must_use]
    pub fn latency_trend(&self) -> LatencyTrend {
        let history = self.history.read();
        if history.len() < 4 {
            return LatencyTrend::Stable;
        }
        let half = history.len() / 2;
        let mean = |it: &mut dyn Iterator<Item = &SystemSnapshot>, n: usize| {
            it.map(|s| s.p95_latency_ms).sum::<f64>() / n as f64
        };
        let older = mean(&mut history.iter().take(half), half);
        let newer = mean(&mut history.iter().skip(history.len() - half), half);
        let tolerance = older.abs().max(1.0) * 0.1;
        if newer > older + tolerance {
            LatencyTrend::Rising
        } else if newer < older - tolerance {
            LatencyTrend::Falling
        } else {
            LatencyTrend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Down;

    #[async_trait]
    impl MetricsSource for Down {
        async fn sample(&self) -> Result<SystemSnapshot, MetricsUnavailable> {
            Err(MetricsUnavailable("no agent".into()))
        }
    }

    fn snap(cpu: f64, latency: f64) -> SystemSnapshot {
        SystemSnapshot {
            cpu_percent: cpu,
            p95_latency_ms: latency,
            ..SystemSnapshot::default()
        }
    }

    #[tokio::test]
    async fn unavailable_source_fails_open() {
        let monitor = MetricsMonitor::new(Arc::new(Down), 10);
        let snapshot = monitor.sample().await;
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert!(monitor.is_healthy(&HealthThresholds::default()).healthy);
        assert_eq!(monitor.history().len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let monitor = MetricsMonitor::new(Arc::new(Down), 3);
        for i in 0..5 {
            monitor.record(snap(f64::from(i), 0.0));
        }
        let cpus: Vec<f64> = monitor.history().iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn per_dimension_health() {
        let thresholds = HealthThresholds::default();
        let report = HealthReport::evaluate(&snap(95.0, 200.0), &thresholds);
        assert!(!report.healthy);
        assert!(!report.cpu_ok);
        assert!(report.latency_ok);
    }

    #[test]
    fn load_factor_weights_and_saturates() {
        let s = SystemSnapshot {
            cpu_percent: 100.0,
            memory_percent: 50.0,
            p95_latency_ms: 5_000.0,
            error_rate: 0.05,
            ..SystemSnapshot::default()
        };
        assert!((s.load_factor() - (0.3 + 0.15 + 0.3 + 0.05)).abs() < 1e-9);
        assert!(SystemSnapshot::default().load_factor().abs() < f64::EPSILON);
    }

    #[test]
    fn latency_trend_detects_growth() {
        let monitor = MetricsMonitor::new(Arc::new(Down), 10);
        for latency in [100.0, 100.0, 300.0, 300.0] {
            monitor.record(snap(10.0, latency));
        }
        assert_eq!(monitor.latency_trend(), LatencyTrend::Rising);
    }
}
