//! Retry backoff math
//!
//! Deterministic delay computation from `(strategy, priority, attempt)` plus
//! bounded jitter. Pure so the clamp property can be tested without a RNG.

use crate::models::{Priority, RetryStrategy};
use std::time::Duration;

/// Default retry budget per message.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Base delay before the first retry, tuned per priority.
pub fn base_delay(priority: Priority) -> Duration {
    match priority {
        Priority::Urgent => Duration::from_millis(500),
        Priority::High => Duration::from_millis(1_000),
        Priority::Normal => Duration::from_millis(2_000),
        Priority::Low => Duration::from_millis(5_000),
    }
}

/// Ceiling on any computed delay, tuned per priority.
pub fn max_delay(priority: Priority) -> Duration {
    match priority {
        Priority::Urgent => Duration::from_millis(60_000),
        Priority::High => Duration::from_millis(180_000),
        Priority::Normal => Duration::from_millis(300_000),
        Priority::Low => Duration::from_millis(600_000),
    }
}

/// Jitter factor applied on top of the deterministic delay.
pub fn jitter_factor(strategy: RetryStrategy) -> f64 {
    match strategy {
        RetryStrategy::Exp => 0.10,
        RetryStrategy::Linear => 0.05,
        RetryStrategy::Fixed => 0.20,
    }
}

/// Compute the delay before retry number `attempt + 1`.
///
/// `unit` is a uniform random sample in `[0, 1)` supplied by the caller;
/// the result is `backoff(strategy, attempt) * (1 + jitter * unit)` clamped
/// to the priority's `[base, max]` window.
pub fn backoff_delay(
    strategy: RetryStrategy,
    priority: Priority,
    attempt: u32,
    unit: f64,
) -> Duration {
    let base = base_delay(priority).as_millis() as f64;
    let max = max_delay(priority).as_millis() as f64;

    let raw = match strategy {
        // Exponent capped so the f64 never overflows on absurd attempt counts.
        RetryStrategy::Exp => base * 2f64.powi(attempt.min(32) as i32),
        RetryStrategy::Linear => base * f64::from(attempt + 1),
        RetryStrategy::Fixed => base,
    };

    let jittered = raw * (1.0 + jitter_factor(strategy) * unit.clamp(0.0, 1.0));

    Duration::from_millis(jittered.clamp(base, max) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STRATEGIES: [RetryStrategy; 3] = [
        RetryStrategy::Exp,
        RetryStrategy::Linear,
        RetryStrategy::Fixed,
    ];

    const ALL_PRIORITIES: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    #[test]
    fn test_delay_clamped_for_all_attempts() {
        // Every strategy, priority and attempt <= 10 stays in [base, max],
        // for jitter samples across the unit interval.
        for strategy in ALL_STRATEGIES {
            for priority in ALL_PRIORITIES {
                for attempt in 0..=10 {
                    for unit in [0.0, 0.25, 0.5, 0.999] {
                        let delay = backoff_delay(strategy, priority, attempt, unit);
                        assert!(
                            delay >= base_delay(priority),
                            "{:?}/{:?} attempt {} below base",
                            strategy,
                            priority,
                            attempt
                        );
                        assert!(
                            delay <= max_delay(priority),
                            "{:?}/{:?} attempt {} above max",
                            strategy,
                            priority,
                            attempt
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_exponential_doubles() {
        let d0 = backoff_delay(RetryStrategy::Exp, Priority::Normal, 0, 0.0);
        let d1 = backoff_delay(RetryStrategy::Exp, Priority::Normal, 1, 0.0);
        let d2 = backoff_delay(RetryStrategy::Exp, Priority::Normal, 2, 0.0);

        assert_eq!(d0, Duration::from_millis(2_000));
        assert_eq!(d1, Duration::from_millis(4_000));
        assert_eq!(d2, Duration::from_millis(8_000));
    }

    #[test]
    fn test_exponential_hits_ceiling() {
        // 2000ms * 2^10 = ~2048s, far beyond the 300s NORMAL ceiling
        let delay = backoff_delay(RetryStrategy::Exp, Priority::Normal, 10, 0.0);
        assert_eq!(delay, max_delay(Priority::Normal));
    }

    #[test]
    fn test_linear_growth() {
        let d0 = backoff_delay(RetryStrategy::Linear, Priority::High, 0, 0.0);
        let d3 = backoff_delay(RetryStrategy::Linear, Priority::High, 3, 0.0);

        assert_eq!(d0, Duration::from_millis(1_000));
        assert_eq!(d3, Duration::from_millis(4_000));
    }

    #[test]
    fn test_fixed_stays_at_base() {
        for attempt in 0..=10 {
            let delay = backoff_delay(RetryStrategy::Fixed, Priority::Low, attempt, 0.0);
            assert_eq!(delay, Duration::from_millis(5_000));
        }
    }

    #[test]
    fn test_jitter_bounded() {
        // FIXED carries the widest jitter: at most +20%
        let min = backoff_delay(RetryStrategy::Fixed, Priority::Urgent, 0, 0.0);
        let max = backoff_delay(RetryStrategy::Fixed, Priority::Urgent, 0, 0.999);

        assert_eq!(min, Duration::from_millis(500));
        assert!(max <= Duration::from_millis(600));
        assert!(max > min);
    }

    #[test]
    fn test_unit_out_of_range_is_clamped() {
        let delay = backoff_delay(RetryStrategy::Fixed, Priority::Urgent, 0, 5.0);
        assert_eq!(delay, Duration::from_millis(600));
    }
}
