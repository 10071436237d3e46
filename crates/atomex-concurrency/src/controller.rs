//! Control loop tying metrics, limiter and gate together

use crate::error::ConcurrencyError;
use crate::gate::{DispatchGate, DispatchPermit};
use crate::herd::ThunderingHerdPrevention;
use crate::limiter::{Adjustment, LimitAdjuster};
use crate::monitor::{HealthReport, MetricsMonitor, MetricsSource, SystemSnapshot};
use atomex_core::{EngineConfig, HealthThresholds};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Outcome of one control evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Sample the decision was based on
    pub snapshot: SystemSnapshot,
    /// Health of that sample
    pub health: HealthReport,
    /// What the limiter did
    pub adjustment: Adjustment,
    /// Dispatches holding a permit at evaluation time
    pub in_flight: usize,
}

/// Point-in-time view for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyStatus {
    /// Current concurrency limit
    pub limit: usize,
    /// Permits currently issued
    pub in_flight: usize,
    /// Weighted load of the latest sample
    pub load_factor: f64,
    /// Consecutive healthy checks
    pub healthy_streak: u32,
}

/// Adaptive concurrency controller
#[derive(Debug)]
pub struct ConcurrencyController {
    monitor: MetricsMonitor,
    limiter: Arc<LimitAdjuster>,
    gate: Arc<DispatchGate>,
    herd: ThunderingHerdPrevention,
    thresholds: HealthThresholds,
}

impl ConcurrencyController {
    /// Build from engine config and a metrics source
    #[must_use]
    pub fn new(config: &EngineConfig, source: Arc<dyn MetricsSource>) -> Arc<Self> {
        let limiter = Arc::new(LimitAdjuster::new(config.limiter.clone()));
        let gate = DispatchGate::new(Arc::clone(&limiter));
        let controller = Arc::new(Self {
            monitor: MetricsMonitor::new(source, config.metrics.history_size),
            limiter,
            gate,
            herd: ThunderingHerdPrevention::new(config.herd.clone()),
            thresholds: config.health.clone(),
        });
        controller.publish();
        controller
    }

    /// Sample, judge health and adjust the limit once
    pub async fn evaluate(&self) -> Evaluation {
        let snapshot = self.monitor.sample().await;
        let health = HealthReport::evaluate(&snapshot, &self.thresholds);
        let adjustment = self.limiter.tick(health.healthy);
        if matches!(adjustment, Adjustment::Increased { .. }) {
            self.gate.limit_changed();
        }
        if !health.healthy {
            debug!(
                cpu_ok = health.cpu_ok,
                memory_ok = health.memory_ok,
                latency_ok = health.latency_ok,
                errors_ok = health.errors_ok,
                "Unhealthy metrics sample"
            );
        }
        metrics::counter!("atomex_limit_evaluations_total").increment(1);
        self.publish();
        Evaluation {
            snapshot,
            health,
            adjustment,
            in_flight: self.gate.in_flight(),
        }
    }

    /// Run `evaluate` every `interval` until `shutdown` flips to true
    pub fn spawn_control_loop(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        controller.evaluate().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Concurrency control loop stopped");
        })
    }

    /// Wait for a dispatch permit
    pub async fn acquire(&self) -> DispatchPermit {
        self.gate.acquire().await
    }

    /// Take a permit if one is free
    pub fn try_acquire(&self) -> Result<DispatchPermit, ConcurrencyError> {
        self.gate.try_acquire().ok_or(ConcurrencyError::LimitExceeded {
            limit: self.gate.limit(),
        })
    }

    /// Manual limit override
    pub fn override_limit(&self, limit: usize) -> Result<usize, ConcurrencyError> {
        let previous = self.limiter.set_limit(limit)?;
        self.gate.limit_changed();
        self.publish();
        info!(previous, limit, "Manual concurrency override applied");
        Ok(previous)
    }

    /// Live limit
    #[must_use]
    pub fn current_limit(&self) -> usize {
        self.limiter.current_limit()
    }

    /// Permits currently issued
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Permit gate shared with the queues
    #[must_use]
    pub fn gate(&self) -> &Arc<DispatchGate> {
        &self.gate
    }

    /// Sample history
    #[must_use]
    pub fn monitor(&self) -> &MetricsMonitor {
        &self.monitor
    }

    /// Burst staggering
    #[must_use]
    pub fn herd(&self) -> &ThunderingHerdPrevention {
        &self.herd
    }

    /// Snapshot for progress reporting
    #[must_use]
    pub fn status(&self) -> ConcurrencyStatus {
        ConcurrencyStatus {
            limit: self.limiter.current_limit(),
            in_flight: self.gate.in_flight(),
            load_factor: self.monitor.load_factor(),
            healthy_streak: self.limiter.healthy_streak(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish(&self) {
        metrics::gauge!("atomex_concurrency_limit").set(self.limiter.current_limit() as f64);
        metrics::gauge!("atomex_in_flight").set(self.gate.in_flight() as f64);
        metrics::gauge!("atomex_load_factor").set(self.monitor.load_factor());
    }
}
