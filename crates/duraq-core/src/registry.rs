//! The queue registry: per-worker mapping from queue name to handler and
//! local backoff state.
//!
//! Registration happens once, before `Worker::run`. Steady-state access is
//! read-only from the worker's single poll loop, so the registry needs no
//! internal synchronization - a plain `HashMap` is enough.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A handler's outcome: success, or a structured failure.
///
/// `should_backoff` is the "optional capability" of pausing the queue,
/// modeled directly as a boolean rather than a runtime type-test. A
/// handler that never cares about backoff just uses [`HandlerError::new`],
/// which defaults it to `false`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    /// Human-readable description of the failure, stored as `last_error`
    /// when completed jobs are preserved.
    pub message: String,
    /// Whether this failure should trigger per-queue backoff.
    pub should_backoff: bool,
}

impl HandlerError {
    /// A failure that does not request backoff.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_backoff: false,
        }
    }

    /// A failure that requests the queue be paused locally after this
    /// attempt (see the retry policy for the exact backoff math).
    pub fn with_backoff(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_backoff: true,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// A job handler: given the job's opaque payload, returns success or a
/// [`HandlerError`].
///
/// Implemented for any `Fn(&[u8]) -> Future<Output = Result<(), HandlerError>>`,
/// so plain async closures can be registered without a wrapper type.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the handler against a job's payload.
    async fn call(&self, data: &[u8]) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(&[u8]) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn call(&self, data: &[u8]) -> Result<(), HandlerError> {
        self(data).await
    }
}

/// Per-queue state private to one worker process.
pub struct Queue {
    handler: Box<dyn Handler>,
    /// Wall-clock timestamp before which this worker will not select jobs
    /// from this queue.
    pub paused_until: DateTime<Utc>,
    /// Current per-queue backoff duration. Zero until the first
    /// backoff-signalling failure.
    pub backoff: Duration,
}

impl Queue {
    fn new(handler: Box<dyn Handler>) -> Self {
        Self {
            handler,
            paused_until: DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"),
            backoff: Duration::ZERO,
        }
    }

    /// Invoke the registered handler.
    pub async fn call(&self, data: &[u8]) -> Result<(), HandlerError> {
        self.handler.call(data).await
    }
}

/// Errors from registering a handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already registered for this queue name.
    #[error("queue {queue_name:?} is already registered")]
    AlreadyRegistered {
        /// The queue name that collided.
        queue_name: String,
    },
    /// `register` was called with an empty queue name.
    #[error("queue name must not be empty")]
    EmptyQueueName,
}

/// Maps queue name to handler and local backoff state.
///
/// All registrations must happen before [`crate::worker::Worker::run`] is
/// called; steady-state access is read-only.
#[derive(Default)]
pub struct QueueRegistry {
    queues: HashMap<String, Queue>,
}

impl QueueRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `queue_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyQueueName`] if `queue_name` is empty,
    /// or [`RegistryError::AlreadyRegistered`] if a handler is already
    /// registered for this name.
    pub fn register<H>(&mut self, queue_name: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: Handler + 'static,
    {
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(RegistryError::EmptyQueueName);
        }
        if self.queues.contains_key(&queue_name) {
            return Err(RegistryError::AlreadyRegistered { queue_name });
        }
        self.queues.insert(queue_name, Queue::new(Box::new(handler)));
        Ok(())
    }

    /// Names of queues whose `paused_until` is strictly before `now`.
    ///
    /// Order is unspecified.
    pub fn eligible_names(&self, now: DateTime<Utc>) -> Vec<String> {
        self.queues
            .iter()
            .filter(|(_, queue)| queue.paused_until < now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Look up a registered queue by name.
    pub fn lookup(&self, queue_name: &str) -> Option<&Queue> {
        self.queues.get(queue_name)
    }

    /// Mutable lookup, used by the worker to update backoff state.
    pub fn lookup_mut(&mut self, queue_name: &str) -> Option<&mut Queue> {
        self.queues.get_mut(queue_name)
    }

    /// All registered queue names, for startup logging.
    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.keys().map(String::as_str).collect()
    }

    /// Number of registered queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether any queues are registered.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("registered_queues", &self.queue_names())
            .finish()
    }
}
