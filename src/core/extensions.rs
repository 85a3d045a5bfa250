//! Composition helpers over [`Task`]: cancellation gating, timeouts and
//! aggregate waits.

use std::time::Duration;

use crate::core::cancel::CancellationToken;
use crate::core::deadline::DeadlineGuard;
use crate::core::task::Task;
use crate::core::worker_pool::WorkerPool;
use crate::error::{TaskError, TaskResult};

/// Wrap `work` in a task that fails with [`TaskError::Cancelled`] when
/// `token` is already latched at the moment the task starts.
///
/// The token is checked once, before `work` runs; polling during `work`
/// is the callable's own responsibility (see
/// [`with_polling_cancellation`]).
pub fn with_cancellation<T, F>(work: F, token: CancellationToken) -> Task<T>
where
    T: Send + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
{
    Task::new(move || {
        token.ensure_not_cancelled()?;
        work()
    })
}

/// Like [`with_cancellation`], but hands the token to `work` so it can
/// check for cancellation at its own checkpoints.
pub fn with_polling_cancellation<T, F>(work: F, token: CancellationToken) -> Task<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
{
    Task::new(move || work(&token))
}

/// Wrap `work` in a task bounded by a wall-clock deadline.
///
/// A fresh token is created and returned alongside the task. When the
/// task runs, a [`DeadlineGuard`] is armed for `timeout`; the token is
/// checked before `work`, and once more after the guard has been dropped
/// (its timer joined), so a `work` that overran the deadline without
/// polling still completes with [`TaskError::Cancelled`].
pub fn with_timeout<T, F>(work: F, timeout: Duration) -> (Task<T>, CancellationToken)
where
    T: Send + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();
    let task = Task::new(move || {
        let guard = DeadlineGuard::new(task_token.clone(), timeout);
        task_token.ensure_not_cancelled()?;
        let value = work()?;
        // Join the timer first so the outcome is decided before we look
        // at the token.
        drop(guard);
        task_token.ensure_not_cancelled()?;
        Ok(value)
    });
    (task, token)
}

/// Aggregate a set of tasks into one no-op task that completes when
/// every input is done. All inputs are scheduled.
///
/// The aggregate always completes; input failures never block it. The
/// first input failure is recorded on the aggregate and visible only
/// through [`Task::result`] — callers interested in individual outcomes
/// inspect the inputs themselves. An empty set yields an
/// immediately-complete aggregate.
pub fn when_all(pool: &WorkerPool, tasks: &[Task<()>]) -> Task<()> {
    let aggregate = Task::new(|| Ok(()));
    wire_and_schedule(pool, tasks, &aggregate);
    aggregate
}

/// Like [`when_all`], but bound to a token: a pre-cancelled token yields
/// a task completing with [`TaskError::Cancelled`], and the aggregate's
/// callable re-checks the token when it runs.
pub fn when_all_with_cancellation(
    pool: &WorkerPool,
    tasks: &[Task<()>],
    token: CancellationToken,
) -> Task<()> {
    if token.is_cancelled() {
        let cancelled = Task::new(|| Err(TaskError::Cancelled));
        cancelled.try_schedule(pool);
        return cancelled;
    }

    let aggregate = Task::new(move || token.ensure_not_cancelled());
    wire_and_schedule(pool, tasks, &aggregate);
    aggregate
}

/// Wire every input to the aggregate along conditional edges, then
/// schedule the inputs. Conditional wiring lets the first input failure
/// surface on the aggregate's result without blocking its completion.
fn wire_and_schedule(pool: &WorkerPool, tasks: &[Task<()>], aggregate: &Task<()>) {
    if tasks.is_empty() {
        aggregate.try_schedule(pool);
        return;
    }
    for task in tasks {
        task.then(aggregate);
    }
    for task in tasks {
        task.try_schedule(pool);
    }
}
