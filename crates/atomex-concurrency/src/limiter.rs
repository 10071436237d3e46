//! AIMD concurrency limit
//!
//! Additive increase after a streak of healthy checks (rate limited by a
//! cooldown), multiplicative decrease on the first unhealthy check. Reads of
//! the current limit never take a lock.

use crate::error::ConcurrencyError;
use atomex_core::LimiterConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Result of one control tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum Adjustment {
    /// Additive increase after a healthy streak
    Increased {
        /// Limit before
        from: usize,
        /// Limit after
        to: usize,
    },
    /// Multiplicative decrease on an unhealthy check
    Decreased {
        /// Limit before
        from: usize,
        /// Limit after
        to: usize,
    },
    /// Held by cooldown, streak or bounds
    Unchanged {
        /// Current limit
        limit: usize,
    },
}

impl Adjustment {
    /// Limit after the tick
    #[must_use]
    pub fn limit(&self) -> usize {
        match *self {
            Self::Increased { to, .. } | Self::Decreased { to, .. } => to,
            Self::Unchanged { limit } => limit,
        }
    }
}

#[derive(Debug, Default)]
struct AdjusterState {
    healthy_streak: u32,
    last_adjustment: Option<Instant>,
}

/// Additive-increase / multiplicative-decrease limit
#[derive(Debug)]
pub struct LimitAdjuster {
    config: LimiterConfig,
    current: AtomicUsize,
    state: Mutex<AdjusterState>,
}

impl LimitAdjuster {
    /// Start at the configured initial limit, clamped into bounds
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let initial = config.initial_limit.clamp(config.min_limit, config.max_limit);
        Self {
            config,
            current: AtomicUsize::new(initial),
            state: Mutex::new(AdjusterState::default()),
        }
    }

    /// Current limit
    #[inline]
    #[must_use]
    pub fn current_limit(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Configured bounds
    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Consecutive healthy checks since the last decrease
    #[must_use]
    pub fn healthy_streak(&self) -> u32 {
        self.state.lock().healthy_streak
    }

    /// Feed one health verdict
    pub fn tick(&self, healthy: bool) -> Adjustment {
        self.tick_at(healthy, Instant::now())
    }

    /// Feed one health verdict observed at `now`
    pub fn tick_at(&self, healthy: bool, now: Instant) -> Adjustment {
        let mut state = self.state.lock();
        let from = self.current_limit();

        if healthy {
            state.healthy_streak = state.healthy_streak.saturating_add(1);
            let cooled = state
                .last_adjustment
                .map_or(true, |at| now.saturating_duration_since(at) >= self.config.cooldown());
            if state.healthy_streak < self.config.healthy_checks_required || !cooled || from >= self.config.max_limit
            {
                return Adjustment::Unchanged { limit: from };
            }
            let to = from.saturating_add(self.config.increase_step).min(self.config.max_limit);
            self.current.store(to, Ordering::Release);
            state.last_adjustment = Some(now);
            debug!(from, to, "Concurrency limit increased");
            return Adjustment::Increased { from, to };
        }

        state.healthy_streak = 0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let scaled = (from as f64 * self.config.decrease_factor).floor() as usize;
        let to = scaled.max(self.config.min_limit);
        if to >= from {
            return Adjustment::Unchanged { limit: from };
        }
        self.current.store(to, Ordering::Release);
        state.last_adjustment = Some(now);
        info!(from, to, "Concurrency limit decreased");
        Adjustment::Decreased { from, to }
    }

    /// Manual override; resets the healthy streak
    pub fn set_limit(&self, limit: usize) -> Result<usize, ConcurrencyError> {
        if limit < self.config.min_limit || limit > self.config.max_limit {
            return Err(ConcurrencyError::OverrideOutOfRange {
                requested: limit,
                min: self.config.min_limit,
                max: self.config.max_limit,
            });
        }
        let mut state = self.state.lock();
        let previous = self.current.swap(limit, Ordering::AcqRel);
        state.healthy_streak = 0;
        state.last_adjustment = Some(Instant::now());
        info!(previous, limit, "Concurrency limit overridden");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn adjuster() -> LimitAdjuster {
        LimitAdjuster::new(LimiterConfig {
            initial_limit: 100,
            min_limit: 10,
            max_limit: 500,
            increase_step: 5,
            decrease_factor: 0.75,
            cooldown_ms: 10_000,
            healthy_checks_required: 3,
        })
    }

    #[test]
    fn three_healthy_then_one_unhealthy() {
        let limiter = adjuster();
        let t0 = Instant::now();
        assert_eq!(limiter.tick_at(true, t0), Adjustment::Unchanged { limit: 100 });
        assert_eq!(limiter.tick_at(true, t0), Adjustment::Unchanged { limit: 100 });
        assert_eq!(limiter.tick_at(true, t0), Adjustment::Increased { from: 100, to: 105 });
        assert_eq!(limiter.tick_at(false, t0), Adjustment::Decreased { from: 105, to: 78 });
        assert_eq!(limiter.healthy_streak(), 0);
    }

    #[test]
    fn cooldown_gates_increases() {
        let limiter = adjuster();
        let t0 = Instant::now();
        for _ in 0..3 {
            limiter.tick_at(true, t0);
        }
        assert_eq!(limiter.current_limit(), 105);
        assert_eq!(
            limiter.tick_at(true, t0 + Duration::from_secs(5)),
            Adjustment::Unchanged { limit: 105 }
        );
        assert_eq!(
            limiter.tick_at(true, t0 + Duration::from_secs(10)),
            Adjustment::Increased { from: 105, to: 110 }
        );
    }

    #[test]
    fn decrease_floors_at_minimum() {
        let limiter = adjuster();
        let t0 = Instant::now();
        for _ in 0..20 {
            limiter.tick_at(false, t0);
        }
        assert_eq!(limiter.current_limit(), 10);
        assert_eq!(limiter.tick_at(false, t0), Adjustment::Unchanged { limit: 10 });
    }

    #[test]
    fn override_is_bounded() {
        let limiter = adjuster();
        assert_eq!(limiter.set_limit(200).unwrap(), 100);
        assert_eq!(limiter.current_limit(), 200);
        assert!(matches!(
            limiter.set_limit(9),
            Err(ConcurrencyError::OverrideOutOfRange { requested: 9, .. })
        ));
        assert!(limiter.set_limit(501).is_err());
    }
}
