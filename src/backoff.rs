//! # Backoff strategy for delayed retries.
//!
//! [`BackoffStrategy`] computes the wait before the next retry attempt from
//! the previous wait; [`JitterPolicy`] optionally randomizes the result to
//! spread synchronized retries apart.

use std::time::Duration;

use rand::Rng;

/// Delay progression between retry attempts.
#[derive(Clone, Copy, Debug)]
pub struct BackoffStrategy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound on any computed delay.
    pub max: Duration,
    /// Multiplier applied to the previous delay.
    pub factor: f64,
    /// Randomization applied to the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffStrategy {
    /// Computes the delay following `prev`, or the initial delay when there
    /// was no previous attempt.
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let base = match prev {
            None => self.first,
            Some(d) => {
                let next = (d.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
                Duration::from_secs_f64(next)
            }
        };
        self.jitter.apply(base)
    }
}

/// Policy controlling randomization of retry delays.
///
/// - `None`: predictable delays, no randomization.
/// - `Full`: random delay in `[0, delay]` (most aggressive spreading).
/// - `Equal`: `delay/2 + random[0, delay/2]` (balanced).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    None,
    /// Full jitter: random delay in `[0, delay]`.
    Full,
    /// Equal jitter: half the delay preserved, half randomized.
    Equal,
}

impl Default for JitterPolicy {
    fn default() -> Self {
        JitterPolicy::None
    }
}

impl JitterPolicy {
    /// Applies this policy to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Self::full_jitter(delay),
            JitterPolicy::Equal => Self::equal_jitter(delay),
        }
    }

    /// Full jitter: random in [0, delay].
    fn full_jitter(delay: Duration) -> Duration {
        let ms = (delay.as_millis().min(u128::from(u64::MAX))) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=ms))
    }

    /// Equal jitter: delay/2 + random[0, delay/2].
    fn equal_jitter(delay: Duration) -> Duration {
        let ms = (delay.as_millis().min(u128::from(u64::MAX))) as u64;
        let half = ms / 2;
        if half == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        Duration::from_millis(half + rng.random_range(0..=half))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_then_growth_capped_at_max() {
        let strategy = BackoffStrategy {
            first: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        let d1 = strategy.next(None);
        let d2 = strategy.next(Some(d1));
        let d3 = strategy.next(Some(d2));
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            assert!(JitterPolicy::Full.apply(delay) <= delay);
        }
    }

    #[test]
    fn equal_jitter_preserves_half() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = JitterPolicy::Equal.apply(delay);
            assert!(jittered >= delay / 2);
            assert!(jittered <= delay);
        }
    }
}
