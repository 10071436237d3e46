//! Engine configuration
//!
//! Every section has defaults; files may specify any subset. Load with
//! [`EngineConfig::from_path`] (TOML or YAML, chosen by extension) and check
//! consistency with [`EngineConfig::validate`].

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Spec validation
    pub atomizer: AtomizerConfig,
    /// AIMD limiter
    pub limiter: LimiterConfig,
    /// Health thresholds
    pub health: HealthThresholds,
    /// Metrics history
    pub metrics: MetricsConfig,
    /// Backpressure queue
    pub queue: QueueConfig,
    /// Thundering-herd mitigation
    pub herd: HerdConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Review escalation
    pub review: ReviewConfig,
    /// Default precision gates
    pub precision: PrecisionPolicy,
    /// Dispatch timing
    pub dispatch: DispatchConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "toml" => Self::from_toml_str(&text)?,
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Parse YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// With limiter settings
    #[inline]
    #[must_use]
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }

    /// With retry settings
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With herd settings
    #[inline]
    #[must_use]
    pub fn with_herd(mut self, herd: HerdConfig) -> Self {
        self.herd = herd;
        self
    }

    /// With queue capacity
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue.capacity = capacity;
        self
    }

    /// With precision policy
    #[inline]
    #[must_use]
    pub fn with_precision(mut self, precision: PrecisionPolicy) -> Self {
        self.precision = precision;
        self
    }

    /// With dispatch timing
    #[inline]
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limiter;
        if l.min_limit == 0 {
            return Err(invalid("limiter.min_limit must be at least 1"));
        }
        if !(l.min_limit <= l.initial_limit && l.initial_limit <= l.max_limit) {
            return Err(invalid(format!(
                "limiter requires min <= initial <= max, got {} / {} / {}",
                l.min_limit, l.initial_limit, l.max_limit
            )));
        }
        if !(l.decrease_factor > 0.0 && l.decrease_factor < 1.0) {
            return Err(invalid("limiter.decrease_factor must be in (0, 1)"));
        }
        if l.healthy_checks_required == 0 {
            return Err(invalid("limiter.healthy_checks_required must be at least 1"));
        }
        if self.atomizer.min_loc > self.atomizer.max_loc {
            return Err(invalid("atomizer.min_loc must not exceed max_loc"));
        }
        if self.metrics.history_size == 0 {
            return Err(invalid("metrics.history_size must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(invalid("queue.capacity must be at least 1"));
        }
        if self.herd.batch_size == 0 {
            return Err(invalid("herd.batch_size must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_temperature > self.retry.max_temperature {
            return Err(invalid("retry.base_temperature exceeds max_temperature"));
        }
        if !(0.0..=1.0).contains(&self.review.confidence_threshold) {
            return Err(invalid("review.confidence_threshold must be in [0, 1]"));
        }
        self.precision.validate()
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Spec validation bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomizerConfig {
    /// Below this LOC target: warning
    pub min_loc: u32,
    /// Above this LOC target: error
    pub max_loc: u32,
    /// Cyclomatic complexity bound
    pub max_complexity: f64,
    /// Specs with target LOC above this are non-trivial
    pub trivial_loc: u32,
    /// Specs with target LOC above this should declare imports
    pub imports_loc_threshold: u32,
}

impl Default for AtomizerConfig {
    fn default() -> Self {
        Self {
            min_loc: 5,
            max_loc: 15,
            max_complexity: 3.0,
            trivial_loc: 5,
            imports_loc_threshold: 7,
        }
    }
}

/// AIMD limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Limit at startup
    pub initial_limit: usize,
    /// Floor for decreases and overrides
    pub min_limit: usize,
    /// Ceiling for increases and overrides
    pub max_limit: usize,
    /// Additive increase
    pub increase_step: usize,
    /// Multiplicative decrease
    pub decrease_factor: f64,
    /// Minimum time between increases
    pub cooldown_ms: u64,
    /// Healthy streak needed before increasing
    pub healthy_checks_required: u32,
}

impl LimiterConfig {
    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_limit: 100,
            min_limit: 10,
            max_limit: 500,
            increase_step: 5,
            decrease_factor: 0.75,
            cooldown_ms: 10_000,
            healthy_checks_required: 3,
        }
    }
}

/// Health check thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// CPU percent
    pub max_cpu_percent: f64,
    /// Memory percent
    pub max_memory_percent: f64,
    /// p95 latency
    pub max_p95_latency_ms: f64,
    /// Error rate as a fraction
    pub max_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_percent: 85.0,
            max_p95_latency_ms: 1000.0,
            max_error_rate: 0.05,
        }
    }
}

/// Metrics history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Snapshots retained
    pub history_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

/// Backpressure queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending requests admitted
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Thundering-herd mitigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// Dispatches per batch
    pub batch_size: usize,
    /// Delay between batches
    pub batch_delay_ms: u64,
    /// Upper bound of per-dispatch jitter
    pub max_jitter_ms: u64,
    /// Fixed RNG seed for reproducible plans
    pub seed: Option<u64>,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 100,
            max_jitter_ms: 50,
            seed: None,
        }
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per atom, the first included
    pub max_attempts: u32,
    /// Temperature of the first attempt
    pub base_temperature: f64,
    /// Added per retry
    pub temperature_step: f64,
    /// Cap on the raised temperature
    pub max_temperature: f64,
    /// Backoff after the first failure, doubled per attempt
    pub backoff_base_ms: u64,
    /// Backoff cap
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    /// Temperature for a 1-based attempt
    #[must_use]
    pub fn temperature_for(&self, attempt: u32) -> f64 {
        let raised = self.base_temperature + self.temperature_step * f64::from(attempt.saturating_sub(1));
        raised.min(self.max_temperature)
    }

    /// Exponential backoff before re-dispatching after `attempt` failed
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_temperature: 0.2,
            temperature_step: 0.2,
            max_temperature: 1.0,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

/// Review escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Completed atoms below this confidence are held
    pub confidence_threshold: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
        }
    }
}

/// Precision gates, overridable per masterplan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionPolicy {
    /// Minimum acceptable composite score
    pub gate: f64,
    /// Desired composite score
    pub target: f64,
    /// SHOULD pass rate required for full conformance
    pub should_pass_required: f64,
}

impl PrecisionPolicy {
    /// Check bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.gate) || !in_unit(self.target) || !in_unit(self.should_pass_required) {
            return Err(invalid("precision values must be in [0, 1]"));
        }
        if self.gate > self.target {
            return Err(invalid("precision.gate must not exceed target"));
        }
        Ok(())
    }
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self {
            gate: 0.95,
            target: 0.98,
            should_pass_required: 0.95,
        }
    }
}

/// Dispatch timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-call generation timeout
    pub generation_timeout_ms: u64,
    /// Control loop period
    pub control_interval_ms: u64,
}

impl DispatchConfig {
    /// Generation timeout as a duration
    #[inline]
    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    /// Control interval as a duration
    #[inline]
    #[must_use]
    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            generation_timeout_ms: 30_000,
            control_interval_ms: 1_000,
        }
    }
}
