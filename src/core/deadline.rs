//! Scoped deadline timers that cancel a token when they elapse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::core::cancel::CancellationToken;

/// Upper bound on how long the timer sleeps between deadline checks, so
/// deadlines fire within this resolution.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scoped owner of a background timer bound to a [`CancellationToken`].
///
/// If the deadline elapses before the guard is dropped, the token is
/// cancelled exactly once. Dropping the guard stops the timer and joins
/// it before returning, so no timer thread outlives its scope.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use taskfabric::core::{CancellationToken, DeadlineGuard};
///
/// let token = CancellationToken::new();
/// {
///     let _guard = DeadlineGuard::new(token.clone(), Duration::from_secs(60));
///     // work that finishes well before the deadline
/// }
/// assert!(!token.is_cancelled());
/// ```
pub struct DeadlineGuard {
    stop: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    /// Arm a timer that cancels `token` once `timeout` has elapsed.
    #[must_use]
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let timer = thread::Builder::new()
            .name("tf-deadline".to_owned())
            .spawn(move || {
                let deadline = Instant::now() + timeout;
                while !stop_flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(?timeout, "deadline elapsed, cancelling token");
                        token.cancel();
                        return;
                    }
                    thread::sleep((deadline - now).min(POLL_INTERVAL));
                }
            })
            .expect("failed to spawn deadline timer thread");

        Self {
            stop,
            timer: Some(timer),
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl std::fmt::Debug for DeadlineGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineGuard")
            .field("stopped", &self.stop.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancels_token_when_deadline_elapses() {
        let token = CancellationToken::new();
        let _guard = DeadlineGuard::new(token.clone(), Duration::from_millis(20));

        let start = Instant::now();
        while !token.is_cancelled() {
            assert!(start.elapsed() < Duration::from_secs(5), "deadline never fired");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dropping_before_the_deadline_leaves_the_token_alone() {
        let token = CancellationToken::new();
        {
            let _guard = DeadlineGuard::new(token.clone(), Duration::from_secs(60));
        }
        // The timer has been joined; nothing can fire afterwards.
        thread::sleep(Duration::from_millis(20));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn elapsed_deadline_cancels_exactly_once() {
        let token = CancellationToken::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        token.register_callback(move || {
            count2.fetch_add(1, Ordering::Relaxed);
        });

        {
            let _guard = DeadlineGuard::new(token.clone(), Duration::from_millis(10));
            thread::sleep(Duration::from_millis(60));
        }
        assert!(token.is_cancelled());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
