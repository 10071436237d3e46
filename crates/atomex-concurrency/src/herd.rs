//! Thundering-herd mitigation: batch staggering plus jitter

use atomex_core::HerdConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Start offset for one dispatch in a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSlot {
    /// Position in the burst
    pub index: usize,
    /// Batch the dispatch belongs to
    pub batch: usize,
    /// Delay from the start of the burst
    pub delay: Duration,
}

/// Spreads a burst of dispatches into delayed batches
#[derive(Debug)]
pub struct ThunderingHerdPrevention {
    config: HerdConfig,
    rng: Mutex<StdRng>,
}

impl ThunderingHerdPrevention {
    /// Seeded from config when a seed is given
    #[must_use]
    pub fn new(config: HerdConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Offsets for `count` dispatches
    ///
    /// Batch `b` starts at `b * batch_delay`; each dispatch adds a uniform
    /// jitter in `[0, max_jitter]`.
    #[must_use]
    pub fn plan(&self, count: usize) -> Vec<DispatchSlot> {
        let batch_size = self.config.batch_size.max(1);
        let mut rng = self.rng.lock();
        (0..count)
            .map(|index| {
                let batch = index / batch_size;
                let jitter = if self.config.max_jitter_ms == 0 {
                    0
                } else {
                    rng.gen_range(0..=self.config.max_jitter_ms)
                };
                let base = self.config.batch_delay_ms.saturating_mul(batch as u64);
                DispatchSlot {
                    index,
                    batch,
                    delay: Duration::from_millis(base.saturating_add(jitter)),
                }
            })
            .collect()
    }

    /// Upper bound on any delay in a plan of `count`
    #[must_use]
    pub fn max_delay(&self, count: usize) -> Duration {
        if count == 0 {
            return Duration::ZERO;
        }
        let batches = (count - 1) / self.config.batch_size.max(1);
        Duration::from_millis(
            self.config
                .batch_delay_ms
                .saturating_mul(batches as u64)
                .saturating_add(self.config.max_jitter_ms),
        )
    }
}
