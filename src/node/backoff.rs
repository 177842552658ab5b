//! Randomized exponential retry delays.
//!
//! Attempt `a` (1-based) draws uniformly from `[min * 2^(a-1), max * 2^(a-1)]` and adds a stable
//! per-node offset of `jitter_step * (addr % 3)` so units that time out together do not retry in
//! the same second. Growth is bounded by the configured attempt cap rather than a ceiling.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_min: Duration,
    base_max: Duration,
    jitter_step: Duration,
}

impl BackoffPolicy {
    /// `base_min` and `base_max` are swapped if given out of order.
    pub fn new(base_min: Duration, base_max: Duration, jitter_step: Duration) -> Self {
        let (base_min, base_max) = if base_min <= base_max {
            (base_min, base_max)
        } else {
            (base_max, base_min)
        };
        Self {
            base_min,
            base_max,
            jitter_step,
        }
    }

    /// Whole-second window with the default one second jitter step.
    pub fn from_secs(base_min: u64, base_max: u64) -> Self {
        Self::new(
            Duration::from_secs(base_min),
            Duration::from_secs(base_max),
            Duration::from_secs(1),
        )
    }

    pub fn base_window(&self) -> (Duration, Duration) {
        (self.base_min, self.base_max)
    }

    /// Bounds of the random draw for `attempt`, before jitter.
    pub fn window(&self, attempt: u32) -> (Duration, Duration) {
        let factor = growth_factor(attempt);
        (
            self.base_min.saturating_mul(factor),
            self.base_max.saturating_mul(factor),
        )
    }

    pub fn stable_jitter(&self, node_addr: u16) -> Duration {
        self.jitter_step * u32::from(node_addr % 3)
    }

    pub fn next_delay(&self, attempt: u32, node_addr: u16) -> Duration {
        self.next_delay_with(&mut rand::thread_rng(), attempt, node_addr)
    }

    pub fn next_delay_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        attempt: u32,
        node_addr: u16,
    ) -> Duration {
        let (low, high) = self.window(attempt);
        let low_ns = duration_nanos(low);
        let high_ns = duration_nanos(high);
        let drawn = if low_ns >= high_ns {
            low_ns
        } else {
            rng.gen_range(low_ns..=high_ns)
        };
        Duration::from_nanos(drawn) + self.stable_jitter(node_addr)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(15, 80)
    }
}

fn growth_factor(attempt: u32) -> u32 {
    let exp = attempt.max(1) - 1;
    if exp >= 31 {
        u32::MAX
    } else {
        1u32 << exp
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
