//! # duraq-core
//!
//! A durable, transactional job queue core: producers enqueue opaque
//! binary payloads addressed to a named queue, and one or more worker
//! processes continuously claim, execute, and retire jobs against a
//! shared PostgreSQL database.
//!
//! ## Core Concepts
//!
//! - **Job Store** ([`job::JobStore`]) - the set of database statements
//!   that create, claim, update, and delete job rows. Purely SQL: it
//!   maintains no in-process state and never opens or commits a
//!   transaction itself.
//! - **Queue Registry** ([`registry::QueueRegistry`]) - an in-process
//!   table mapping queue name to its handler and local backoff state.
//! - **Retry Policy** ([`retry`]) - pure logic over a job's remaining
//!   wait schedule and a handler's backoff signal.
//! - **Worker** ([`worker::Worker`]) - the polling driver. Each iteration
//!   opens one transaction, claims the next eligible job via
//!   `SELECT ... FOR UPDATE SKIP LOCKED`, runs the registered handler
//!   under panic isolation, disposes of the row, applies the retry
//!   policy, and commits - all as one atomic unit.
//!
//! ## Key Invariants
//!
//! 1. **One claim = one transaction** - claim, handler invocation,
//!    disposition, and retry enqueue are bound into a single commit.
//! 2. **At-most-one worker per job** - the database's row lock, acquired
//!    with skip-locked semantics, is the sole coordination primitive.
//!    No in-process locks are required for correctness.
//! 3. **Handler errors never abort the worker** - only store/transaction
//!    failures do. A handler error or panic only affects disposition and
//!    backoff.
//! 4. **Retry state lives on the row** - there is no attempt counter; the
//!    length of a job's remaining `retry_waits` is the remaining attempt
//!    budget.
//!
//! ## Example
//!
//! ```ignore
//! use duraq_core::job::EnqueueOptions;
//! use duraq_core::registry::{HandlerError, QueueRegistry};
//! use duraq_core::stop::stop_channel;
//! use duraq_core::worker::{Worker, WorkerConfig};
//! use duraq_postgres::PgJobStore;
//!
//! let pool = sqlx::PgPool::connect(&database_url).await?;
//! let store = PgJobStore::new(pool.clone());
//!
//! let mut registry = QueueRegistry::new();
//! registry.register("email", |data: &[u8]| async move {
//!     send_email(data).await.map_err(HandlerError::with_backoff)
//! })?;
//!
//! let worker = Worker::new(pool, store, registry, WorkerConfig::new());
//! worker
//!     .enqueue_job("email", b"hello", EnqueueOptions::new())
//!     .await?;
//!
//! let (stop_source, stop_token) = stop_channel();
//! tokio::spawn(worker.run(stop_token));
//! // ... later:
//! stop_source.stop();
//! ```

pub mod job;
pub mod registry;
pub mod retry;
pub mod stop;
pub mod worker;

pub use job::{EnqueueOptions, Job, JobStore, StoreError};
pub use registry::{Handler, HandlerError, Queue, QueueRegistry, RegistryError};
pub use retry::BackoffBounds;
pub use stop::{stop_channel, StopSource, StopToken};
pub use worker::{enqueue_job_in_tx, Worker, WorkerConfig, WorkerError};
