//! Backoff schedule for retryable failures.
//!
//! Delays double per failure starting at `base_delay_ms`, with up to
//! `jitter_ratio` (≤ 0.5) of the un-jittered delay added on top so parallel
//! jobs spread out. Since the jittered delay for failure `n` is below
//! `1.5 · base · 2^(n-1)` and the next un-jittered delay is `2 · base · 2^(n-1)`,
//! the sequence never decreases, and the cap keeps it bounded.

use crate::config::RetryPolicy;
use rand::Rng;
use std::time::Duration;

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the attempt that follows failure number `failures` (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.delay_with_unit(failures, rand::thread_rng().gen::<f64>())
    }

    /// Deterministic core of [`RetryPolicy::delay_for`]; `unit` is in `[0, 1)`.
    pub fn delay_with_unit(&self, failures: u32, unit: f64) -> Duration {
        let exp = failures.saturating_sub(1).min(30);
        let raw = (self.base_delay_ms as f64) * f64::from(1u32 << exp);
        let ratio = self.jitter_ratio.clamp(0.0, 0.5);
        let jitter = raw * ratio * unit.clamp(0.0, 0.999_999);
        let ms = (raw + jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Honour a server-requested delay, but never beyond the cap.
    ///
    /// `previous` is the delay used before the last attempt; the result is
    /// never shorter, so a large `Retry-After` is not undone by the next
    /// computed step.
    pub fn delay_with_hint(
        &self,
        failures: u32,
        retry_after_ms: Option<u64>,
        previous: Duration,
    ) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        let hinted = retry_after_ms.map_or(Duration::ZERO, |ms| Duration::from_millis(ms).min(cap));
        self.delay_for(failures).max(hinted).max(previous.min(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ratio: 0.5,
        }
    }

    #[test]
    fn doubles_without_jitter() {
        let p = policy();
        let ms: Vec<u128> = (1..=4).map(|n| p.delay_with_unit(n, 0.0).as_millis()).collect();
        assert_eq!(ms, vec![100, 200, 400, 800]);
    }

    #[test]
    fn capped() {
        let p = policy();
        assert_eq!(p.delay_with_unit(5, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.delay_with_unit(40, 0.99), Duration::from_millis(1_000));
    }

    #[test]
    fn non_decreasing_under_worst_case_jitter() {
        let p = policy();
        // Maximum jitter on n, no jitter on n + 1.
        for n in 1..12 {
            let hi = p.delay_with_unit(n, 0.999);
            let lo_next = p.delay_with_unit(n + 1, 0.0);
            assert!(hi <= lo_next, "n={n}: {hi:?} > {lo_next:?}");
        }
    }

    #[test]
    fn random_delays_stay_in_band() {
        let p = policy();
        for _ in 0..100 {
            let d = p.delay_for(2).as_millis();
            assert!((200..300).contains(&d), "{d}");
        }
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let p = policy();
        assert!(p.delay_with_hint(1, Some(700), Duration::ZERO) >= Duration::from_millis(700));
        assert_eq!(
            p.delay_with_hint(1, Some(60_000), Duration::ZERO),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn hinted_delay_is_not_followed_by_a_shorter_one() {
        let p = RetryPolicy {
            jitter_ratio: 0.0,
            ..policy()
        };
        let first = p.delay_with_hint(1, Some(900), Duration::ZERO);
        assert_eq!(first, Duration::from_millis(900));
        // Unhinted second failure computes 200ms; the earlier 900ms wins.
        let second = p.delay_with_hint(2, None, first);
        assert_eq!(second, first);
        let third = p.delay_with_hint(3, Some(100), second);
        assert_eq!(third, first);
        assert_eq!(
            p.delay_with_hint(2, None, Duration::from_secs(60)),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn attempt_budget() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..policy()
        };
        assert!(p.allows_another(2));
        assert!(!p.allows_another(3));
    }
}
