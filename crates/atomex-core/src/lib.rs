//! # Atomex Core
//!
//! Shared foundation for the atomic execution engine:
//! - Data model for specs, atoms, graphs, waves, validation and review
//! - Engine configuration (TOML / YAML)
//! - Store and generation backend contracts, with in-memory stores
//! - Atom status transition function and hash-chained audit trail

pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod patterns;
pub mod store;
pub mod types;

pub use audit::{StatusTransition, TransitionLog};
pub use backend::{BackendError, GenerationBackend, GenerationOutput, GenerationRequest};
pub use config::{
    AtomizerConfig, DispatchConfig, EngineConfig, HealthThresholds, HerdConfig, LimiterConfig,
    MetricsConfig, PrecisionPolicy, QueueConfig, RetryConfig, ReviewConfig,
};
pub use error::{AuditError, ConfigError, PatternStoreError, StoreError, TransitionError};
pub use lifecycle::{allowed_events, next_status, AtomEvent};
pub use patterns::{
    ErrorPattern, ErrorPatternKey, GuardPattern, GuardPatternKey, InMemoryPatternStore, PatternStore,
};
pub use store::{ExecutionStore, InMemoryStore};
pub use types::*;
