//! Learned guard and error patterns
//!
//! The pattern store is optional and best-effort. Callers log and ignore its
//! errors; running without one is a valid degraded configuration.

use crate::error::PatternStoreError;
use crate::types::{ConstraintClass, ErrorCategory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key for a learned guard: (constraint class, entity, method)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardPatternKey {
    /// Guard class
    pub class: ConstraintClass,
    /// Entity the guard protects
    pub entity: String,
    /// Method the guard was injected into
    pub method: String,
}

/// A guard clause that repaired a method before
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardPattern {
    /// Where the clause applies
    pub key: GuardPatternKey,
    /// Injected clause, marker included
    pub signature: String,
    /// Times reused
    pub uses: u32,
    /// First recorded
    pub learned_at: DateTime<Utc>,
}

/// Key for a learned error: (error type, endpoint pattern, entity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorPatternKey {
    /// Error type
    pub category: ErrorCategory,
    /// Module or endpoint the failing atom belongs to
    pub endpoint_pattern: String,
    /// Entity involved
    pub entity: String,
}

/// Fixes that resolved an error signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Error signature
    pub key: ErrorPatternKey,
    /// Distinct fixes, oldest first
    pub fixes: Vec<String>,
    /// Times the signature was seen
    pub occurrences: u32,
}

/// Storage for learned patterns
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Remember a guard signature; repeated records bump the use count
    async fn record_guard(&self, key: GuardPatternKey, signature: String) -> Result<(), PatternStoreError>;

    /// Look up a guard signature
    async fn find_guard(&self, key: &GuardPatternKey) -> Result<Option<GuardPattern>, PatternStoreError>;

    /// Remember a fix for an error signature
    async fn record_error_fix(&self, key: ErrorPatternKey, fix: String) -> Result<(), PatternStoreError>;

    /// Fixes known for an error signature
    async fn known_fixes(&self, key: &ErrorPatternKey) -> Result<Vec<String>, PatternStoreError>;
}

/// `moka`-backed pattern store
#[derive(Debug, Clone)]
pub struct InMemoryPatternStore {
    guards: Cache<GuardPatternKey, GuardPattern>,
    errors: Cache<ErrorPatternKey, ErrorPattern>,
}

impl InMemoryPatternStore {
    /// Create with max entries per pattern kind
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            guards: Cache::new(max_capacity),
            errors: Cache::new(max_capacity),
        }
    }

    /// Create with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            guards: Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build(),
            errors: Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build(),
        }
    }
}

impl Default for InMemoryPatternStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn record_guard(&self, key: GuardPatternKey, signature: String) -> Result<(), PatternStoreError> {
        let pattern = match self.guards.get(&key).await {
            Some(mut existing) => {
                existing.uses += 1;
                existing.signature = signature;
                existing
            }
            None => GuardPattern {
                key: key.clone(),
                signature,
                uses: 1,
                learned_at: Utc::now(),
            },
        };
        self.guards.insert(key, pattern).await;
        Ok(())
    }

    async fn find_guard(&self, key: &GuardPatternKey) -> Result<Option<GuardPattern>, PatternStoreError> {
        Ok(self.guards.get(key).await)
    }

    async fn record_error_fix(&self, key: ErrorPatternKey, fix: String) -> Result<(), PatternStoreError> {
        let mut pattern = self.errors.get(&key).await.unwrap_or_else(|| ErrorPattern {
            key: key.clone(),
            fixes: Vec::new(),
            occurrences: 0,
        });
        pattern.occurrences += 1;
        if !pattern.fixes.contains(&fix) {
            pattern.fixes.push(fix);
        }
        self.errors.insert(key, pattern).await;
        Ok(())
    }

    async fn known_fixes(&self, key: &ErrorPatternKey) -> Result<Vec<String>, PatternStoreError> {
        Ok(self.errors.get(key).await.map(|p| p.fixes).unwrap_or_default())
    }
}
