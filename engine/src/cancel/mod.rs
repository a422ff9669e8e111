//! Cancellation signal
//!
//! One `CancelSignal` exists per conversation. The runner service sets it when
//! a new input supersedes earlier work; the turn executor clears it right
//! before a newly dequeued turn starts, so every turn begins with a clean
//! signal.
//!
//! The flag is an `AtomicBool` so the agent can poll it synchronously through a
//! [`CancelCheck`]. A `Notify` sits next to it so the executor can also *await*
//! cancellation and stop consuming the agent's stream without waiting for the
//! next fragment.
//!
//! Every `clear` starts a new generation. A check built during one generation
//! keeps reporting cancelled once a later generation begins, so an agent that
//! outlives its turn never sees the flag of the next one.

use sdk::capability::CancelCheck;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    generation: AtomicU64,
    notify: Notify,
}

/// Per-conversation cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    /// Create a new, cleared signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the active turn. Idempotent.
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Reset the signal before a new turn starts
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Wait until the signal is set
    ///
    /// Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `set` cannot
            // slip between the check and the wait.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Build the check handed to the agent for one turn
    pub fn check(&self) -> CancelCheck {
        let inner = Arc::clone(&self.inner);
        let generation = inner.generation.load(Ordering::SeqCst);
        CancelCheck::new(move || {
            inner.flag.load(Ordering::SeqCst)
                || inner.generation.load(Ordering::SeqCst) != generation
        })
    }
}
