//! Dispatch gate bounded by the adaptive limit

use crate::limiter::LimitAdjuster;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Admits a dispatch only while in-flight work is below the current limit
///
/// Lowering the limit never revokes permits already held; in-flight work
/// drains naturally.
#[derive(Debug)]
pub struct DispatchGate {
    limiter: Arc<LimitAdjuster>,
    in_flight: AtomicUsize,
    notify: Notify,
}

impl DispatchGate {
    /// Gate over a limiter
    #[must_use]
    pub fn new(limiter: Arc<LimitAdjuster>) -> Arc<Self> {
        Arc::new(Self {
            limiter,
            in_flight: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    /// Dispatches holding a permit
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Limit currently enforced
    #[inline]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limiter.current_limit()
    }

    /// Free slots under the current limit
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.in_flight())
    }

    /// Take a permit without waiting
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<DispatchPermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.limiter.current_limit() {
                return None;
            }
            match self
                .in_flight
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Some(DispatchPermit {
                        gate: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait until a permit is available
    pub async fn acquire(self: &Arc<Self>) -> DispatchPermit {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    /// Wake waiters after the limit was raised
    pub fn limit_changed(&self) {
        self.notify.notify_waiters();
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }
}

/// Slot held for one dispatch; released on drop
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot"]
pub struct DispatchPermit {
    gate: Arc<DispatchGate>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
