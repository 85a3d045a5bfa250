//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] is a shared, latched signal: it transitions
//! from "active" to "cancelled" exactly once and never resets. Callbacks
//! registered before the transition run exactly once on the cancelling
//! thread; callbacks registered after it run exactly once inline.
//!
//! Cancellation is cooperative — nothing is interrupted. Task callables
//! and handlers decide where their checkpoints are, typically via
//! [`ensure_not_cancelled`](CancellationToken::ensure_not_cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{TaskError, TaskResult};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Shared, latched cancellation signal with registered callbacks.
///
/// Handles are cheap to clone and observe the same latch.
///
/// Reentrancy is unsupported: a callback must not call
/// [`cancel`](Self::cancel) or
/// [`register_callback`](Self::register_callback) on its own token.
///
/// # Example
///
/// ```
/// use taskfabric::core::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
/// token.cancel();
/// assert!(token.ensure_not_cancelled().is_err());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the token.
    ///
    /// On the single false→true transition the registered callbacks are
    /// invoked in registration order on the calling thread and the list
    /// is cleared. Every later call returns immediately.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Take the batch out of the lock before running it; callbacks
        // may do arbitrary work.
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    /// Non-blocking read of the latch.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`TaskError::Cancelled`] when the token is latched.
    ///
    /// # Errors
    ///
    /// Returns `Err(TaskError::Cancelled)` iff the token is cancelled.
    pub fn ensure_not_cancelled(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register a callback to run on cancellation.
    ///
    /// When the token is not yet latched the callback is queued; when it
    /// already is, the callback runs inline exactly once.
    pub fn register_callback(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self.inner.callbacks.lock();
            // Checked under the lock: either the callback lands in the
            // list before cancel() takes it, or the latch is already
            // visible and it runs inline below.
            if !self.inner.cancelled.load(Ordering::Acquire) {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
