//! Job rows and the `JobStore` interface.
//!
//! This module provides the policy-light interface for job persistence:
//! - [`Job`] - a claimed job row, ready for execution
//! - [`EnqueueOptions`] - the enumerated set of knobs accepted by `enqueue`
//! - [`JobStore`] - trait for creating, claiming, and disposing of job rows
//! - [`StoreError`] - failure modes surfaced by a store implementation
//!
//! # Design Philosophy
//!
//! This crate owns the claim/execute/retry state machine; it does not own
//! SQL. A `JobStore` implementation (see `duraq-postgres`) is purely a set
//! of statements executed against a caller-supplied transactional handle -
//! it never opens or commits a transaction itself. That authority belongs
//! to the `Worker`, so that claim, handler invocation, disposition, and
//! retry enqueue can be bound into one atomic unit.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use thiserror::Error;

/// A job row, claimed and locked for the duration of the current attempt.
#[derive(Debug, Clone)]
pub struct Job {
    /// Database-generated identity. Unique.
    pub id: i64,
    /// Non-empty name of the logical queue this job belongs to.
    pub queue_name: String,
    /// Opaque payload handed to the registered handler verbatim.
    pub data: Vec<u8>,
    /// The job is not eligible for claiming until wall clock >= this value.
    pub run_after: DateTime<Utc>,
    /// Ordered, remaining retry schedule. Consumed head-first on failure.
    pub retry_waits: Vec<Duration>,
    /// Set once the job has been executed, if completed rows are preserved.
    pub ran_at: Option<DateTime<Utc>>,
    /// Last handler error message, if completed rows are preserved.
    pub last_error: Option<String>,
}

/// Enumerated options accepted by [`JobStore::enqueue`].
///
/// # Example
///
/// ```
/// use duraq_core::job::EnqueueOptions;
/// use chrono::Duration;
///
/// let opts = EnqueueOptions::new()
///     .retry_waits(vec![Duration::milliseconds(100), Duration::milliseconds(200)]);
/// assert_eq!(opts.retry_waits.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Overrides `run_after`. Defaults to the enqueue time.
    pub after: Option<DateTime<Utc>>,
    /// The retry schedule to attach to the new row. Defaults to empty.
    pub retry_waits: Vec<Duration>,
}

impl EnqueueOptions {
    /// Start from the defaults: `run_after = now`, empty retry schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `run_after` to `t` instead of the enqueue time.
    pub fn after(mut self, t: DateTime<Utc>) -> Self {
        self.after = Some(t);
        self
    }

    /// Set the retry schedule.
    pub fn retry_waits(mut self, waits: Vec<Duration>) -> Self {
        self.retry_waits = waits;
        self
    }
}

/// Failure modes surfaced by a [`JobStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database or transaction failed.
    #[error("job store database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Trait for creating, claiming, and disposing of job rows.
///
/// The store is purely SQL: it maintains no in-process state, and every
/// method accepts a transactional handle supplied by the caller. It never
/// opens or commits a transaction - that authority belongs entirely to
/// whoever is holding the `&mut PgConnection` (a `Worker`, or a producer's
/// own transaction via [`JobStore::enqueue`]).
///
/// # Implementer Notes
///
/// - Use `FOR UPDATE SKIP LOCKED` (or equivalent) so concurrent claimers
///   never block on each other's locked rows.
/// - `get_next_job` must return rows ordered by `run_after`, ties broken
///   by `id`, so that the oldest eligible job wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job row. Returns the new row's `id`.
    async fn enqueue(
        &self,
        conn: &mut PgConnection,
        queue_name: &str,
        data: &[u8],
        options: EnqueueOptions,
    ) -> Result<i64, StoreError>;

    /// Atomically select and lock the oldest eligible job from the given
    /// queue names, skipping rows already locked by other transactions.
    ///
    /// Returns `Ok(None)` if `queue_names` is empty or no eligible row
    /// exists. The returned row stays locked until the caller's
    /// transaction ends.
    async fn get_next_job(
        &self,
        conn: &mut PgConnection,
        queue_names: &[String],
    ) -> Result<Option<Job>, StoreError>;

    /// Remove a job row by id.
    async fn delete_job(&self, conn: &mut PgConnection, job: &Job) -> Result<(), StoreError>;

    /// Mark a job row as executed: set `ran_at` and store `err`'s
    /// stringified form (or null on success).
    async fn update_job(
        &self,
        conn: &mut PgConnection,
        job: &Job,
        ran_at: DateTime<Utc>,
        err: Option<&str>,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_options_defaults_to_now_and_empty_schedule() {
        let opts = EnqueueOptions::new();
        assert!(opts.after.is_none());
        assert!(opts.retry_waits.is_empty());
    }

    #[test]
    fn enqueue_options_builder_sets_fields() {
        let t = Utc::now();
        let opts = EnqueueOptions::new()
            .after(t)
            .retry_waits(vec![Duration::seconds(1)]);
        assert_eq!(opts.after, Some(t));
        assert_eq!(opts.retry_waits, vec![Duration::seconds(1)]);
    }

    #[test]
    fn store_error_wraps_sqlx_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(err.to_string().contains("job store database error"));
    }
}
