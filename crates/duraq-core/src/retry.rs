//! Pure retry/backoff logic over a job's remaining wait schedule and a
//! handler's backoff signal.
//!
//! Nothing here touches the database or the registry directly - these are
//! plain functions over values, which is what makes the backoff math and
//! the retry-chain length independently testable without a store.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Bounds on per-queue backoff duration.
#[derive(Debug, Clone, Copy)]
pub struct BackoffBounds {
    /// Backoff jumps to this value on the first backoff-signalling
    /// failure (when the queue's backoff was previously zero).
    pub min_backoff: Duration,
    /// Backoff never exceeds this value.
    pub max_backoff: Duration,
}

impl Default for BackoffBounds {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// The next backoff value for a queue, given its current value and the
/// configured bounds.
///
/// - If `current` is zero, jump to `bounds.min_backoff`.
/// - Otherwise double it, capped at `bounds.max_backoff`.
///
/// Called only when a handler error signals `should_backoff`.
pub fn next_backoff(current: Duration, bounds: BackoffBounds) -> Duration {
    if current.is_zero() {
        bounds.min_backoff
    } else {
        current.saturating_mul(2).min(bounds.max_backoff)
    }
}

/// The result of applying the retry schedule to a handler failure.
pub struct RetrySpawn {
    /// When the successor row becomes eligible.
    pub run_after: DateTime<Utc>,
    /// The successor's retry schedule: the original schedule minus its
    /// consumed head.
    pub retry_waits: Vec<chrono::Duration>,
}

/// Compute the successor job's schedule, consuming the head of
/// `retry_waits`. Returns `None` if the schedule is exhausted (no retry).
pub fn next_retry(now: DateTime<Utc>, retry_waits: &[chrono::Duration]) -> Option<RetrySpawn> {
    let (head, tail) = retry_waits.split_first()?;
    Some(RetrySpawn {
        run_after: now + *head,
        retry_waits: tail.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_backoff_jumps_to_min() {
        let bounds = BackoffBounds::default();
        assert_eq!(next_backoff(Duration::ZERO, bounds), bounds.min_backoff);
    }

    #[test]
    fn backoff_doubles_on_each_signal() {
        let bounds = BackoffBounds::default();
        let b1 = next_backoff(Duration::ZERO, bounds);
        let b2 = next_backoff(b1, bounds);
        let b3 = next_backoff(b2, bounds);
        assert_eq!(b1, Duration::from_millis(100));
        assert_eq!(b2, Duration::from_millis(200));
        assert_eq!(b3, Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let bounds = BackoffBounds {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        let b1 = next_backoff(Duration::ZERO, bounds);
        let b2 = next_backoff(b1, bounds);
        let b3 = next_backoff(b2, bounds);
        assert_eq!(b1, Duration::from_millis(100));
        assert_eq!(b2, Duration::from_millis(200));
        assert_eq!(b3, Duration::from_millis(300));
    }

    #[test]
    fn backoff_monotonicity_property_for_k_failures() {
        let bounds = BackoffBounds::default();
        let mut backoff = Duration::ZERO;
        for k in 1..=6u32 {
            backoff = next_backoff(backoff, bounds);
            let expected = bounds
                .min_backoff
                .saturating_mul(2u32.pow(k - 1))
                .min(bounds.max_backoff);
            assert_eq!(backoff, expected, "k={k}");
        }
    }

    #[test]
    fn next_retry_is_none_when_schedule_exhausted() {
        assert!(next_retry(Utc::now(), &[]).is_none());
    }

    #[test]
    fn next_retry_consumes_head_and_keeps_tail() {
        let now = Utc::now();
        let waits = vec![chrono::Duration::milliseconds(100), chrono::Duration::milliseconds(200)];
        let spawn = next_retry(now, &waits).unwrap();
        assert_eq!(spawn.run_after, now + chrono::Duration::milliseconds(100));
        assert_eq!(spawn.retry_waits, vec![chrono::Duration::milliseconds(200)]);
    }

    #[test]
    fn next_retry_on_last_element_leaves_empty_tail() {
        let now = Utc::now();
        let waits = vec![chrono::Duration::milliseconds(300)];
        let spawn = next_retry(now, &waits).unwrap();
        assert!(spawn.retry_waits.is_empty());
    }
}
