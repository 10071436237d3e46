//! Generation backend contract
//!
//! The backend turns a spec plus feedback into source code. Its output is
//! untrusted and always re-validated.

use crate::types::AtomicSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Spec to implement
    pub spec: AtomicSpec,
    /// Error feedback and known fixes from earlier attempts
    pub prompt_context: Vec<String>,
    /// Sampling temperature, raised on retries
    pub temperature: f64,
    /// 1-based
    pub attempt: u32,
}

/// Backend output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Generated source
    pub code: String,
    /// Tokens billed for the call
    pub tokens_used: u64,
    /// Cost of the call in USD
    pub cost_usd: f64,
}

impl GenerationOutput {
    /// Output with no cost accounting
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tokens_used: 0,
            cost_usd: 0.0,
        }
    }
}

/// Backend failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Model or service refused or failed
    #[error("generation failed: {0}")]
    Failed(String),

    /// Service overloaded
    #[error("backend rate limited")]
    RateLimited,

    /// Call exceeded its deadline
    #[error("generation timed out after {0}ms")]
    Timeout(u64),
}

impl BackendError {
    /// Every backend error is worth another attempt
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Code generator
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate code for a request
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError>;
}
