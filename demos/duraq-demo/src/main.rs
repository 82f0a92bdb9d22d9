//! # duraq Demo
//!
//! Shows end-to-end wiring of the registry, the Postgres store, the
//! worker loop, and the enqueue API against a real database - no
//! adapters, no ceremony, just the pieces from `duraq-core` and
//! `duraq-postgres` assembled the way a consuming application would.
//!
//! Requires `DATABASE_URL` to point at a Postgres database with the
//! schema from `migrations/0001_jobs.sql` already applied.

use std::time::Duration;

use anyhow::{Context, Result};
use duraq_core::job::EnqueueOptions;
use duraq_core::registry::{HandlerError, QueueRegistry};
use duraq_core::stop::stop_channel;
use duraq_core::worker::{Worker, WorkerConfig};
use duraq_postgres::PgJobStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must point at a Postgres database with migrations/0001_jobs.sql applied")?;
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let mut registry = QueueRegistry::new();

    // A queue whose handler always succeeds.
    registry.register("email", |data: &[u8]| async move {
        let body = String::from_utf8_lossy(data);
        tracing::info!(%body, "sending email");
        Ok::<(), HandlerError>(())
    })?;

    // A queue whose handler fails and requests backoff, to demonstrate
    // per-queue pause after repeated failures.
    registry.register("webhook", |data: &[u8]| async move {
        let url = String::from_utf8_lossy(data);
        tracing::warn!(%url, "webhook delivery failed");
        Err(HandlerError::with_backoff("connection refused"))
    })?;

    let worker = Worker::new(
        pool,
        PgJobStore::new(),
        registry,
        WorkerConfig::new()
            .job_polling_interval(Duration::from_millis(200))
            .verbose(true)
            .on_stop(|| tracing::info!("worker stopped cleanly")),
    );

    // Enqueue a job that will succeed immediately.
    worker
        .enqueue_job("email", b"welcome aboard", EnqueueOptions::new())
        .await?;

    // Enqueue a job with a retry schedule; a failing handler re-enqueues
    // it with the tail of the schedule until it is exhausted.
    worker
        .enqueue_job(
            "webhook",
            b"https://example.com/hooks/order-placed",
            EnqueueOptions::new().retry_waits(vec![
                chrono::Duration::milliseconds(200),
                chrono::Duration::milliseconds(400),
            ]),
        )
        .await?;

    let (stop_source, stop_token) = stop_channel();
    let handle = tokio::spawn(worker.run(stop_token));

    // Let a few poll cycles run, then request a clean stop.
    tokio::time::sleep(Duration::from_secs(2)).await;
    stop_source.stop();

    handle.await.context("worker task panicked")??;
    Ok(())
}
