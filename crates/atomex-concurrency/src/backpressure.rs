//! Bounded FIFO in front of the dispatch gate

use crate::gate::{DispatchGate, DispatchPermit};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Rejected enqueue; hands the item back
#[derive(Debug, thiserror::Error)]
#[error("backpressure queue full (capacity {capacity})")]
pub struct QueueFull<T> {
    /// Item that was not accepted
    pub item: T,
    /// Queue capacity
    pub capacity: usize,
}

/// Requests waiting for a dispatch slot
///
/// Rejects with [`QueueFull`] at capacity instead of blocking the producer.
#[derive(Debug)]
pub struct BackpressureQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    gate: Arc<DispatchGate>,
    rejected: AtomicU64,
}

impl<T> BackpressureQueue<T> {
    /// Queue of `capacity` in front of `gate`
    #[must_use]
    pub fn new(capacity: usize, gate: Arc<DispatchGate>) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            gate,
            rejected: AtomicU64::new(0),
        }
    }

    /// Append, or give the item back when full
    pub fn try_enqueue(&self, item: T) -> Result<usize, QueueFull<T>> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            drop(items);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("atomex_queue_rejections_total").increment(1);
            warn!(capacity = self.capacity, "Backpressure queue full, rejecting request");
            return Err(QueueFull {
                item,
                capacity: self.capacity,
            });
        }
        items.push_back(item);
        Ok(items.len())
    }

    /// Pop the oldest item together with a dispatch permit
    ///
    /// Returns `None` when the queue is empty or the gate is at its limit.
    pub fn try_dequeue(&self) -> Option<(T, DispatchPermit)> {
        let permit = self.gate.try_acquire()?;
        let item = self.items.lock().pop_front()?;
        Some((item, permit))
    }

    /// Wait for a permit, then pop the oldest item
    pub async fn dequeue(&self) -> Option<(T, DispatchPermit)> {
        let permit = self.gate.acquire().await;
        let item = self.items.lock().pop_front()?;
        Some((item, permit))
    }

    /// Remove everything still queued
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Nothing queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Admission bound
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues refused since creation
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
