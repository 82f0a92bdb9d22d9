//! The polling driver and the claim/execute unit.
//!
//! `Worker` owns the pool, the job store, the queue registry, and the
//! per-worker configuration. `Worker::run` is the polling driver; each
//! iteration delegates to [`Worker::perform_next_job`], the single atomic
//! attempt described in the module-level docs of [`crate::job`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::job::{EnqueueOptions, Job, JobStore, StoreError};
use crate::registry::{HandlerError, QueueRegistry};
use crate::retry::{next_backoff, next_retry, BackoffBounds};
use crate::stop::StopToken;

/// Failures that terminate the worker loop.
///
/// Handler failures never appear here - see [`HandlerError`] - only
/// store/transactional failures and internal consistency checks do.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The claim query returned a job for a queue this worker has no
    /// handler for. Defensive: `get_next_job` is always called with the
    /// registry's own eligible names, so this should not occur in
    /// practice unless the registry and the database disagree.
    #[error("queue {queue_name:?} is not registered with this worker")]
    UnregisteredQueue {
        /// The queue name the claimed job named.
        queue_name: String,
    },

    /// More than one failure occurred during a single attempt (typically
    /// a disposition/retry failure followed by a commit failure). No
    /// cause is dropped.
    #[error("multiple worker errors: {0:?}")]
    Multiple(Vec<WorkerError>),
}

/// Per-worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// How long to sleep after an iteration that attempted no job.
    pub job_polling_interval: Duration,
    /// When true, completed rows are updated with `ran_at`/`last_error`
    /// instead of deleted.
    pub preserve_completed_jobs: bool,
    /// Bounds on per-queue backoff duration.
    pub backoff_bounds: BackoffBounds,
    /// Controls debug-level logging of every poll.
    pub verbose: bool,
    /// Invoked after the loop exits cleanly (stop was requested).
    pub on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_polling_interval: Duration::from_secs(10),
            preserve_completed_jobs: false,
            backoff_bounds: BackoffBounds::default(),
            verbose: false,
            on_stop: None,
        }
    }
}

impl WorkerConfig {
    /// Defaults: 10s polling interval, delete on complete, default
    /// backoff bounds, not verbose, no stop hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle polling interval.
    pub fn job_polling_interval(mut self, interval: Duration) -> Self {
        self.job_polling_interval = interval;
        self
    }

    /// When `true`, completed rows are preserved with `ran_at`/`last_error`
    /// instead of deleted.
    pub fn preserve_completed_jobs(mut self, preserve: bool) -> Self {
        self.preserve_completed_jobs = preserve;
        self
    }

    /// Override the default backoff bounds.
    pub fn backoff_bounds(mut self, bounds: BackoffBounds) -> Self {
        self.backoff_bounds = bounds;
        self
    }

    /// Enable debug-level logging of every poll.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Register a callback invoked once, after the loop exits cleanly.
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
        self
    }
}

/// Owns the pool, store, registry, and configuration for one worker
/// process. Its poll loop is single-threaded and sequential; concurrency
/// across workers comes from running more `Worker`s against the same
/// database, coordinated entirely by the store's skip-locked claim.
pub struct Worker<S: JobStore> {
    pool: PgPool,
    store: S,
    registry: QueueRegistry,
    config: WorkerConfig,
}

impl<S: JobStore> Worker<S> {
    /// Build a worker from its pool, store, registry, and configuration.
    ///
    /// All handler registrations must already be present on `registry`;
    /// registering after `run` is not supported.
    pub fn new(pool: PgPool, store: S, registry: QueueRegistry, config: WorkerConfig) -> Self {
        Self {
            pool,
            store,
            registry,
            config,
        }
    }

    /// Access the underlying job store, e.g. to call
    /// [`enqueue_job_in_tx`] against a caller-owned transaction.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Enqueue a job using the worker's own pool.
    ///
    /// For atomically enqueueing alongside other business writes, use
    /// [`enqueue_job_in_tx`] with a transaction you own.
    pub async fn enqueue_job(
        &self,
        queue_name: &str,
        data: &[u8],
        options: EnqueueOptions,
    ) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        self.store.enqueue(&mut conn, queue_name, data, options).await
    }

    /// Run the polling loop until `stop` fires.
    ///
    /// Stop is level-triggered and checked only at the top of each
    /// iteration; an in-flight attempt always runs to completion
    /// (including commit) before the loop notices the stop. A store
    /// error aborts the loop and is returned to the caller - no
    /// cancellation is propagated into handlers.
    pub async fn run(mut self, stop: StopToken) -> Result<(), WorkerError> {
        info!(queues = ?self.registry.queue_names(), "worker starting");

        loop {
            if stop.is_stopped() {
                info!("worker stopping");
                if let Some(on_stop) = self.config.on_stop.clone() {
                    on_stop();
                }
                return Ok(());
            }

            match self.perform_next_job().await {
                Ok(true) => {
                    if self.config.verbose {
                        debug!("poll claimed a job");
                    }
                }
                Ok(false) => {
                    if self.config.verbose {
                        debug!("no eligible job this poll, sleeping");
                    }
                    stop.wait_or_timeout(self.config.job_polling_interval).await;
                }
                Err(err) => {
                    error!(error = %err, "worker loop aborting on store error");
                    return Err(err);
                }
            }
        }
    }

    /// One attempt: claim, execute, dispose, retry, commit.
    ///
    /// Returns `Ok(true)` if a job was attempted, `Ok(false)` if no
    /// eligible queue or job was available.
    pub async fn perform_next_job(&mut self) -> Result<bool, WorkerError> {
        let now = Utc::now();
        let queue_names = self.registry.eligible_names(now);
        if self.config.verbose {
            debug!(queues = ?queue_names, "queues considered this poll");
        }
        if queue_names.is_empty() {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let job = match self.store.get_next_job(&mut tx, &queue_names).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tx.commit().await.map_err(StoreError::from)?;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let prior_err = self.execute_claimed_job(&mut tx, &job).await.err();

        match (prior_err, tx.commit().await) {
            (None, Ok(())) => Ok(true),
            (Some(prior), Ok(())) => Err(prior),
            (None, Err(commit_err)) => Err(StoreError::from(commit_err).into()),
            (Some(prior), Err(commit_err)) => {
                Err(WorkerError::Multiple(vec![prior, StoreError::from(commit_err).into()]))
            }
        }
    }

    async fn execute_claimed_job(
        &mut self,
        conn: &mut PgConnection,
        job: &Job,
    ) -> Result<(), WorkerError> {
        if self.registry.lookup(&job.queue_name).is_none() {
            return Err(WorkerError::UnregisteredQueue {
                queue_name: job.queue_name.clone(),
            });
        }

        let ran_at = Utc::now();
        let handler_error = self.invoke_handler(&job.queue_name, &job.data).await;

        if let Some(err) = &handler_error {
            warn!(job_id = job.id, queue = %job.queue_name, error = %err, "handler reported failure");
        }

        if self.config.preserve_completed_jobs {
            self.store
                .update_job(
                    conn,
                    job,
                    ran_at,
                    handler_error.as_ref().map(|e| e.message.as_str()),
                )
                .await?;
        } else {
            self.store.delete_job(conn, job).await?;
        }

        self.apply_retry_policy(conn, job, ran_at, handler_error.as_ref())
            .await
    }

    /// Invoke the registered handler under panic isolation. Any abrupt
    /// panic is converted into a [`HandlerError`] carrying the panic
    /// message; it is never propagated as a [`WorkerError`].
    async fn invoke_handler(&self, queue_name: &str, data: &[u8]) -> Option<HandlerError> {
        let queue = self
            .registry
            .lookup(queue_name)
            .expect("caller already checked this queue is registered");

        match AssertUnwindSafe(queue.call(data)).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic_payload) => {
                let message = extract_panic_message(&panic_payload);
                Some(HandlerError::new(format!("handler panicked: {message}")))
            }
        }
    }

    async fn apply_retry_policy(
        &mut self,
        conn: &mut PgConnection,
        job: &Job,
        ran_at: DateTime<Utc>,
        handler_error: Option<&HandlerError>,
    ) -> Result<(), WorkerError> {
        let Some(err) = handler_error else {
            return Ok(());
        };

        if err.should_backoff {
            if let Some(queue) = self.registry.lookup_mut(&job.queue_name) {
                queue.backoff = next_backoff(queue.backoff, self.config.backoff_bounds);
            }
        }

        if let Some(spawn) = next_retry(ran_at, &job.retry_waits) {
            self.store
                .enqueue(
                    conn,
                    &job.queue_name,
                    &job.data,
                    EnqueueOptions::new()
                        .after(spawn.run_after)
                        .retry_waits(spawn.retry_waits),
                )
                .await?;
        }

        if let Some(queue) = self.registry.lookup_mut(&job.queue_name) {
            if !queue.backoff.is_zero() {
                let backoff = chrono::Duration::from_std(queue.backoff).unwrap_or(chrono::Duration::zero());
                queue.paused_until = ran_at + backoff;
            }
        }

        Ok(())
    }
}

/// Enqueue a job using a caller-supplied transactional handle.
///
/// The caller owns `begin`, `commit`, and `rollback` - this lets
/// producers enqueue a job atomically alongside other business writes in
/// the same transaction.
pub async fn enqueue_job_in_tx<S: JobStore>(
    store: &S,
    conn: &mut PgConnection,
    queue_name: &str,
    data: &[u8],
    options: EnqueueOptions,
) -> Result<i64, StoreError> {
    store.enqueue(conn, queue_name, data, options).await
}

fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.job_polling_interval, Duration::from_secs(10));
        assert!(!config.preserve_completed_jobs);
        assert!(!config.verbose);
        assert!(config.on_stop.is_none());
    }

    #[test]
    fn builder_methods_are_fluent_and_override_defaults() {
        let config = WorkerConfig::new()
            .job_polling_interval(Duration::from_millis(50))
            .preserve_completed_jobs(true)
            .verbose(true);
        assert_eq!(config.job_polling_interval, Duration::from_millis(50));
        assert!(config.preserve_completed_jobs);
        assert!(config.verbose);
    }

    #[test]
    fn extract_panic_message_handles_str_and_string_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(extract_panic_message(&payload), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("also boom"));
        assert_eq!(extract_panic_message(&payload), "also boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42i32);
        assert_eq!(extract_panic_message(&payload), "unknown panic");
    }

    #[test]
    fn worker_error_multiple_keeps_both_causes() {
        let err = WorkerError::Multiple(vec![
            WorkerError::UnregisteredQueue {
                queue_name: "a".to_string(),
            },
            WorkerError::UnregisteredQueue {
                queue_name: "b".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains('a') || msg.contains("multiple"));
    }
}
