//! PostgreSQL implementation of the duraq job store.
//!
//! This crate provides [`PgJobStore`], the `JobStore` implementation used
//! against a real PostgreSQL database. It is intentionally thin: every
//! method is a single statement executed against a caller-supplied
//! `&mut PgConnection`, so the transaction boundary (claim + handler +
//! disposition + retry + commit, all atomic) lives entirely with the
//! caller - a [`duraq_core::worker::Worker`], or a producer's own
//! transaction via `enqueue_job_in_tx`.
//!
//! # Features
//!
//! - `SELECT ... FOR UPDATE SKIP LOCKED` claim, so concurrent pollers
//!   never block on a row another worker already holds.
//! - Retry schedules stored as a native `interval[]` column, consumed
//!   head-first by the core's retry policy.
//! - No pool, no lease, no internal transaction management - the store
//!   holds no state at all.
//!
//! # Database Schema
//!
//! See `migrations/0001_jobs.sql` at the workspace root for the reference
//! schema:
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id BIGSERIAL PRIMARY KEY,
//!     queue_name TEXT NOT NULL,
//!     data BYTEA NOT NULL,
//!     run_after TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     retry_waits INTERVAL[] NOT NULL DEFAULT '{}',
//!     ran_at TIMESTAMPTZ,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE INDEX idx_jobs_claimable ON jobs (run_after, id)
//!     WHERE ran_at IS NULL;
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use duraq_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let store = PgJobStore::new();
//!
//! let worker = duraq_core::worker::Worker::new(pool, store, registry, config);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duraq_core::job::{EnqueueOptions, Job, JobStore, StoreError};
use sqlx::postgres::types::PgInterval;
use sqlx::{PgConnection, Row};

/// A stateless `JobStore` that executes one SQL statement per call
/// against whatever `&mut PgConnection` the caller holds.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgJobStore;

impl PgJobStore {
    /// Construct a new store. There is no pool or configuration to hold -
    /// see the crate docs for why.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(
        &self,
        conn: &mut PgConnection,
        queue_name: &str,
        data: &[u8],
        options: EnqueueOptions,
    ) -> Result<i64, StoreError> {
        let run_after = options.after.unwrap_or_else(Utc::now);
        let retry_waits: Vec<PgInterval> = options
            .retry_waits
            .iter()
            .map(|d| duration_to_interval(*d))
            .collect();

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (queue_name, data, run_after, retry_waits)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(queue_name)
        .bind(data)
        .bind(run_after)
        .bind(retry_waits)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.get("id"))
    }

    async fn get_next_job(
        &self,
        conn: &mut PgConnection,
        queue_names: &[String],
    ) -> Result<Option<Job>, StoreError> {
        if queue_names.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT id, queue_name, data, run_after, retry_waits, ran_at, last_error
            FROM jobs
            WHERE queue_name = ANY($1)
              AND run_after <= $2
              AND ran_at IS NULL
            ORDER BY run_after ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue_names.to_vec())
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|row| {
            let retry_waits: Vec<PgInterval> = row.get("retry_waits");
            Job {
                id: row.get("id"),
                queue_name: row.get("queue_name"),
                data: row.get("data"),
                run_after: row.get("run_after"),
                retry_waits: retry_waits.into_iter().map(interval_to_duration).collect(),
                ran_at: row.get("ran_at"),
                last_error: row.get("last_error"),
            }
        }))
    }

    async fn delete_job(&self, conn: &mut PgConnection, job: &Job) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn update_job(
        &self,
        conn: &mut PgConnection,
        job: &Job,
        ran_at: DateTime<Utc>,
        err: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET ran_at = $2, last_error = $3 WHERE id = $1")
            .bind(job.id)
            .bind(ran_at)
            .bind(err)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// `retry_waits` only ever holds durations we wrote ourselves (plain
/// microsecond counts, no months/days), so round-tripping through
/// `PgInterval` is lossless for this crate's own writes.
fn duration_to_interval(d: chrono::Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: d.num_microseconds().unwrap_or(i64::MAX),
    }
}

fn interval_to_duration(i: PgInterval) -> chrono::Duration {
    chrono::Duration::microseconds(i.microseconds)
        + chrono::Duration::days(i64::from(i.days))
        + chrono::Duration::days(i64::from(i.months) * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_round_trips_through_interval() {
        let original = chrono::Duration::milliseconds(1500);
        let interval = duration_to_interval(original);
        assert_eq!(interval.months, 0);
        assert_eq!(interval.days, 0);
        let back = interval_to_duration(interval);
        assert_eq!(back, original);
    }

    #[test]
    fn zero_duration_round_trips() {
        let original = chrono::Duration::zero();
        let back = interval_to_duration(duration_to_interval(original));
        assert_eq!(back, original);
    }

    #[test]
    fn store_is_stateless_and_cheap_to_construct() {
        let a = PgJobStore::new();
        let b = PgJobStore;
        // Both are unit-like; this mostly documents that `new()` carries
        // no configuration, unlike a pool-owning store.
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }
}
