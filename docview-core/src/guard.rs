//! Session generations and the stale-result guard.
//!
//! Every `open` and `close` advances the shared generation. Asynchronous work
//! captures a [`SessionToken`] when it starts and checks it when it completes;
//! a token from an older generation means the document it was computed for is
//! gone and the result must be dropped without touching any shared state.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SessionClock {
    generation: Arc<AtomicU64>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation and returns its token.
    pub fn advance(&self) -> SessionToken {
        let id = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        SessionToken {
            id,
            generation: Arc::clone(&self.generation),
        }
    }

    /// Invalidates every outstanding token without handing out a new one.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current(&self) -> SessionToken {
        SessionToken {
            id: self.generation.load(Ordering::Acquire),
            generation: Arc::clone(&self.generation),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    id: u64,
    generation: Arc<AtomicU64>,
}

impl SessionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.id
    }
}

/// Awaits `future` and yields its output only if `token` is still current.
pub async fn guarded<F>(token: &SessionToken, future: F) -> Option<F::Output>
where
    F: Future,
{
    let output = future.await;
    token.is_current().then_some(output)
}
