//! Test harness utilities shared by `duraq-postgres`'s integration suite
//! and exposed for downstream consumers, following the host framework's
//! convention of a separate `*-testing` crate rather than `#[cfg(test)]`
//! helpers duplicated per crate.
//!
//! `duraq_core::job::JobStore` takes `&mut PgConnection` directly rather
//! than a generic executor, so a pure in-memory stand-in cannot implement
//! the same trait without a real Postgres connection. What this crate
//! offers instead:
//!
//! - [`ManualClock`] - a settable clock for computing expected timestamps
//!   (backoff pauses, retry `run_after`) without depending on wall-clock
//!   jitter between "when the test computed the expectation" and "when
//!   the attempt actually ran".
//! - [`dates_match`] - tolerance-based `DateTime` comparison, since a
//!   timestamp round-tripped through Postgres can differ from the
//!   in-memory value by a sub-millisecond rounding error.
//! - Direct-SQL row helpers ([`count_jobs_in_queue`], [`fetch_job_by_id`])
//!   that query the `jobs` table without going through `JobStore`, so
//!   tests can assert on-disk state independently of the code under test.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::types::PgInterval;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

/// A settable clock, for tests that need a fixed `now` to compute expected
/// `run_after`/`paused_until` values deterministically.
///
/// `duraq-core`'s worker and store call `Utc::now()` directly rather than
/// taking an injected clock - the core's own tests (see `retry.rs`) pass
/// an explicit `now` into the pure retry functions instead. This clock is
/// for integration tests that need to pin down "the instant the test
/// observed" independently of when assertions run afterward.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// A clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// A clock frozen at the current wall-clock time.
    pub fn at_now() -> Self {
        Self::new(Utc::now())
    }

    /// The clock's current value.
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("ManualClock mutex poisoned")
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("ManualClock mutex poisoned");
        *now += delta;
    }

    /// Set the clock to an exact value.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("ManualClock mutex poisoned") = at;
    }
}

/// Whether two timestamps are equal within a small tolerance.
///
/// Postgres `timestamptz` has microsecond resolution; a value that round
/// trips through the database can differ from the in-memory original by a
/// sub-millisecond rounding error, so exact `==` comparison is too strict
/// for assertions that span a database write.
pub fn dates_match(left: DateTime<Utc>, right: DateTime<Utc>) -> bool {
    (left - right).abs() < Duration::milliseconds(1)
}

/// Count rows in `jobs` for `queue_name`, regardless of eligibility. Bypasses
/// `JobStore` so tests can assert on-disk state the store itself is being
/// tested against.
pub async fn count_jobs_in_queue(pool: &PgPool, queue_name: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE queue_name = $1")
        .bind(queue_name)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// A direct-SQL snapshot of one job row, independent of `JobStore`.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub queue_name: String,
    pub data: Vec<u8>,
    pub run_after: DateTime<Utc>,
    pub retry_waits: Vec<Duration>,
    pub ran_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Fetch a job row by id directly, for asserting disposition state
/// (`ran_at`, `last_error`) or schedule state (`run_after`, `retry_waits`)
/// without exercising `get_next_job`.
pub async fn fetch_job_by_id(pool: &PgPool, id: i64) -> Result<Option<JobRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, queue_name, data, run_after, retry_waits, ran_at, last_error FROM jobs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let retry_waits: Vec<PgInterval> = row.get("retry_waits");
        JobRow {
            id: row.get("id"),
            queue_name: row.get("queue_name"),
            data: row.get("data"),
            run_after: row.get("run_after"),
            retry_waits: retry_waits
                .into_iter()
                .map(|i| Duration::microseconds(i.microseconds))
                .collect(),
            ran_at: row.get("ran_at"),
            last_error: row.get("last_error"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_starts_at_given_value() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn manual_clock_advances_by_delta() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), start + Duration::seconds(5));
    }

    #[test]
    fn manual_clock_set_overwrites_value() {
        let clock = ManualClock::at_now();
        let later = Utc::now() + Duration::hours(1);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn dates_match_tolerates_submillisecond_drift() {
        let a = Utc::now();
        let b = a + Duration::microseconds(200);
        assert!(dates_match(a, b));
    }

    #[test]
    fn dates_match_rejects_large_drift() {
        let a = Utc::now();
        let b = a + Duration::milliseconds(50);
        assert!(!dates_match(a, b));
    }
}
