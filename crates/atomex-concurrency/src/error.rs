//! Concurrency controller errors

/// Resource and control errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConcurrencyError {
    /// Manual override outside the configured bounds
    #[error("limit {requested} outside [{min}, {max}]")]
    OverrideOutOfRange {
        /// Requested limit
        requested: usize,
        /// Lower bound
        min: usize,
        /// Upper bound
        max: usize,
    },

    /// Backpressure queue at capacity
    #[error("dispatch queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// All permits in use
    #[error("concurrency limit {limit} reached")]
    LimitExceeded {
        /// Current limit
        limit: usize,
    },
}

impl ConcurrencyError {
    /// Caller should back off and try again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::LimitExceeded { .. })
    }
}

/// Metrics source failure; the monitor treats it as healthy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metrics source unavailable: {0}")]
pub struct MetricsUnavailable(pub String);
