//! Deferred, cancellable work run when the viewer is otherwise quiet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

pub type IdleCallback = Box<dyn FnOnce() + Send>;

/// Cancels a pending idle callback. Dropping the handle does not cancel.
pub struct IdleHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl IdleHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn from_abort(handle: AbortHandle) -> Self {
        Self::new(move || handle.abort())
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Implementations must never run the callback from inside `request_idle`.
pub trait IdleScheduler: Send + Sync {
    fn request_idle(&self, callback: IdleCallback) -> IdleHandle;
}

/// Runs callbacks on the tokio runtime after a fixed delay.
pub struct TokioIdleScheduler {
    delay: Duration,
}

impl TokioIdleScheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl IdleScheduler for TokioIdleScheduler {
    fn request_idle(&self, callback: IdleCallback) -> IdleHandle {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        IdleHandle::from_abort(task.abort_handle())
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, IdleHandle>>,
}

/// Tracks the idle callbacks of the current session so they can be
/// cancelled together. A callback unregisters itself when it runs.
#[derive(Clone, Default)]
pub struct IdleRegistry {
    inner: Arc<RegistryInner>,
}

impl IdleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        scheduler: &dyn IdleScheduler,
        callback: impl FnOnce() + Send + 'static,
    ) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.clone();
        // The lock is held until the handle is stored so a callback that
        // fires immediately on another thread still finds its entry.
        let mut pending = self.inner.pending.lock();
        let handle = scheduler.request_idle(Box::new(move || {
            registry.inner.pending.lock().remove(&id);
            callback();
        }));
        pending.insert(id, handle);
        trace!(id, pending = pending.len(), "idle callback registered");
        id
    }

    pub fn cancel_all(&self) {
        let drained: Vec<IdleHandle> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
