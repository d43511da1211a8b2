//! Reconnect backoff (spec.md §4.6): exponential with full jitter.
//!
//! Shape grounded on an example pack contributor's
//! `abp-host::retry::compute_delay` (the teacher has no reconnect-backoff
//! of its own), adapted to draw jitter from the `rand` crate instead of
//! system-clock nanoseconds.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters. Defaults match spec.md §4.6: base 0.5s, multiplier
/// 2, cap 30s, full jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: u32,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2,
            max: Duration::from_secs(30),
        }
    }
}

/// The delay before reconnect attempt `attempt` (0-indexed), full jitter
/// applied: a uniform draw in `[0, capped_delay]`.
#[must_use]
pub fn compute_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = config.multiplier.saturating_pow(attempt);
    let nominal_ms = (config.base.as_millis() as u64).saturating_mul(u64::from(exp));
    let capped_ms = nominal_ms.min(config.max.as_millis() as u64);
    if capped_ms == 0 {
        return Duration::ZERO;
    }
    let jittered_ms = rand::thread_rng().gen_range(0..=capped_ms);
    Duration::from_millis(jittered_ms)
}
