//! Reconnect backoff.
//!
//! Delays grow as `base * 2^attempt`, are capped at `max`, and vary by
//! `±jitter` so a fleet of executors does not reconnect in lockstep.

use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter range as a fraction of the delay.
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl Backoff {
    /// No jitter, for deterministic schedules.
    #[must_use]
    pub fn fixed(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { base_delay_ms, max_delay_ms, jitter_factor: 0.0 }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let random = if self.jitter_factor > 0.0 { rand::random::<f64>() } else { 0.5 };
        Duration::from_millis(delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

/// `min(max, base * 2^attempt) * (1 + (2r - 1) * jitter)` for `r` in `[0, 1)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

/// Parse a `Retry-After` value given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        assert_eq!(delay_with_random(0, 1_000, 30_000, 0.0, 0.5), 1_000);
        assert_eq!(delay_with_random(1, 1_000, 30_000, 0.0, 0.5), 2_000);
        assert_eq!(delay_with_random(4, 1_000, 30_000, 0.0, 0.5), 16_000);
        assert_eq!(delay_with_random(5, 1_000, 30_000, 0.0, 0.5), 30_000);
        assert_eq!(delay_with_random(63, 1_000, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(delay_with_random(0, 1_000, 30_000, 0.2, 0.0), 800);
        assert_eq!(delay_with_random(0, 1_000, 30_000, 0.2, 0.5), 1_000);
        assert_eq!(delay_with_random(0, 1_000, 30_000, 0.2, 0.999_999), 1_200);
    }

    #[test]
    fn random_delay_stays_in_range() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let d = backoff.delay(2).as_millis();
            assert!((3_200..=4_800).contains(&d), "{d}");
        }
    }

    #[test]
    fn fixed_is_deterministic() {
        let backoff = Backoff::fixed(100, 1_000);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(9), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
