use async_trait::async_trait;
use atomex_concurrency::{
    Adjustment, BackpressureQueue, ConcurrencyController, ConcurrencyError, LimitAdjuster, MetricsSource,
    MetricsUnavailable, SystemSnapshot,
};
use atomex_core::{EngineConfig, LimiterConfig};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Replays a fixed list of samples, then repeats the last one
struct Replay(Mutex<VecDeque<SystemSnapshot>>);

impl Replay {
    fn new(samples: Vec<SystemSnapshot>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(samples.into())))
    }
}

#[async_trait]
impl MetricsSource for Replay {
    async fn sample(&self) -> Result<SystemSnapshot, MetricsUnavailable> {
        let mut samples = self.0.lock();
        if samples.len() > 1 {
            Ok(samples.pop_front().unwrap_or_default())
        } else {
            samples.front().cloned().ok_or_else(|| MetricsUnavailable("empty".into()))
        }
    }
}

fn healthy() -> SystemSnapshot {
    SystemSnapshot {
        cpu_percent: 30.0,
        memory_percent: 40.0,
        p95_latency_ms: 200.0,
        ..SystemSnapshot::default()
    }
}

fn overloaded() -> SystemSnapshot {
    SystemSnapshot {
        cpu_percent: 97.0,
        ..healthy()
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().with_limiter(LimiterConfig {
        initial_limit: 100,
        min_limit: 10,
        max_limit: 500,
        increase_step: 5,
        decrease_factor: 0.75,
        cooldown_ms: 0,
        healthy_checks_required: 3,
    })
}

#[tokio::test]
async fn controller_grows_then_backs_off() {
    let source = Replay::new(vec![healthy(), healthy(), healthy(), overloaded()]);
    let controller = ConcurrencyController::new(&config(), source);

    let mut last = None;
    for _ in 0..4 {
        last = Some(controller.evaluate().await);
    }
    let last = last.unwrap();
    assert!(!last.health.healthy);
    assert!(!last.health.cpu_ok);
    assert_eq!(last.adjustment, Adjustment::Decreased { from: 105, to: 78 });
    assert_eq!(controller.current_limit(), 78);
    assert_eq!(controller.monitor().history().len(), 4);
}

#[tokio::test]
async fn override_wakes_blocked_dispatch() {
    let cfg = EngineConfig::default().with_limiter(LimiterConfig {
        initial_limit: 1,
        min_limit: 1,
        max_limit: 4,
        ..LimiterConfig::default()
    });
    let controller = ConcurrencyController::new(&cfg, Replay::new(vec![healthy()]));
    let _held = controller.try_acquire().unwrap();
    assert_eq!(
        controller.try_acquire().unwrap_err(),
        ConcurrencyError::LimitExceeded { limit: 1 }
    );

    let waiter = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            let _permit = controller.acquire().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.override_limit(2).unwrap();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(controller.override_limit(5).is_err());
}

#[test]
fn released_permit_wakes_waiting_acquire() {
    let cfg = EngineConfig::default().with_limiter(LimiterConfig {
        initial_limit: 1,
        min_limit: 1,
        max_limit: 4,
        ..LimiterConfig::default()
    });
    let controller = ConcurrencyController::new(&cfg, Replay::new(vec![healthy()]));
    let held = controller.try_acquire().unwrap();

    let mut waiter = tokio_test::task::spawn(controller.acquire());
    tokio_test::assert_pending!(waiter.poll());
    drop(held);
    assert!(waiter.is_woken());
    let _permit = tokio_test::assert_ready!(waiter.poll());
    assert_eq!(controller.in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn control_loop_stops_on_shutdown() {
    let controller = ConcurrencyController::new(&config(), Replay::new(vec![healthy()]));
    let (tx, rx) = watch::channel(false);
    let handle = controller.spawn_control_loop(Duration::from_millis(100), rx);

    tokio::time::sleep(Duration::from_millis(350)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(controller.monitor().history().len(), 3);
    assert_eq!(controller.current_limit(), 105);
}

#[test]
fn queue_drain_returns_pending_items() {
    let controller = ConcurrencyController::new(&config(), Replay::new(vec![healthy()]));
    let queue = BackpressureQueue::new(3, Arc::clone(controller.gate()));
    for i in 0..3 {
        queue.try_enqueue(i).unwrap();
    }
    assert!(queue.try_enqueue(3).is_err());
    assert_eq!(queue.drain(), vec![0, 1, 2]);
    assert!(queue.is_empty());
}

proptest! {
    #[test]
    fn prop_aimd_direction_and_bounds(ticks in proptest::collection::vec(any::<bool>(), 1..200)) {
        let cfg = LimiterConfig { cooldown_ms: 0, ..LimiterConfig::default() };
        let limiter = LimitAdjuster::new(cfg.clone());
        let now = Instant::now();
        for healthy in ticks {
            let before = limiter.current_limit();
            let adjustment = limiter.tick_at(healthy, now);
            let after = limiter.current_limit();
            prop_assert!(after >= cfg.min_limit && after <= cfg.max_limit);
            prop_assert_eq!(adjustment.limit(), after);
            if healthy {
                prop_assert!(after >= before);
            } else {
                prop_assert!(after <= before);
                if before > cfg.min_limit {
                    prop_assert!(after < before);
                }
            }
        }
    }
}
