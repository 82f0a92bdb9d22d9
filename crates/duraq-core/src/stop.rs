//! A single-shot, level-triggered stop signal between one producer and the
//! worker loop.
//!
//! The contract: "the loop exits cleanly no later than after the current
//! attempt commits." An atomic flag records that stop was requested; a
//! [`tokio::sync::Notify`] lets the idle sleep wake up promptly instead of
//! waiting out the full polling interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

/// The producer half: call [`StopSource::stop`] to request a shutdown.
#[derive(Clone)]
pub struct StopSource {
    inner: Arc<Inner>,
}

/// The consumer half, held by the worker loop.
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<Inner>,
}

/// Create a connected `(StopSource, StopToken)` pair.
pub fn stop_channel() -> (StopSource, StopToken) {
    let inner = Arc::new(Inner {
        stopped: AtomicBool::new(false),
        notify: Notify::new(),
    });
    (
        StopSource {
            inner: inner.clone(),
        },
        StopToken { inner },
    )
}

impl StopSource {
    /// Request that the worker loop stop. Idempotent.
    ///
    /// Uses `notify_one` rather than `notify_waiters`: a permit is stored
    /// even if nothing is waiting yet, so a stop requested just before the
    /// loop enters its idle sleep is never missed.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }
}

impl StopToken {
    /// Whether stop has been requested. Checked once at the top of each
    /// loop iteration; never checked mid-attempt.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if stop is requested.
    pub async fn wait_or_timeout(&self, duration: Duration) {
        tokio::select! {
            () = self.inner.notify.notified() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }
}
