//! Futures that suspend on task completion.
//!
//! [`TaskAwaiter`] bridges the DAG engine into the language's suspension
//! protocol: polling a pending awaiter installs a tiny unit *resumption
//! task* as an unconditional successor of the awaited task. When the
//! awaited task completes, the resumption runs on the worker pool and
//! wakes the future; the final poll surfaces the task's result or stored
//! failure.
//!
//! At most one resumption is installed per awaiter, and the future
//! resumes strictly after the awaited task is done.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::core::task::Task;
use crate::core::worker_pool::WorkerPool;
use crate::error::TaskResult;

/// Future that completes when a [`Task`] reaches its done latch.
///
/// Created with [`TaskAwaiter::new`] or [`Task::awaiter`]. The awaited
/// task is scheduled if it was not already.
///
/// # Example
///
/// ```
/// use taskfabric::core::{Task, TaskAwaiter, WorkerPool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = WorkerPool::with_workers(2);
/// let task = Task::new(|| Ok(2 + 2));
/// assert_eq!(TaskAwaiter::new(task, pool).await, Ok(4));
/// # }
/// ```
pub struct TaskAwaiter<T> {
    task: Task<T>,
    pool: WorkerPool,
    /// Waker slot shared with the resumption task; refreshed on every
    /// poll so the wake always reaches the current executor.
    waker: Option<Arc<Mutex<Waker>>>,
}

impl<T: Send + 'static> TaskAwaiter<T> {
    /// Create an awaiter for `task`, resuming on `pool`.
    #[must_use]
    pub fn new(task: Task<T>, pool: WorkerPool) -> Self {
        Self {
            task,
            pool,
            waker: None,
        }
    }
}

impl<T: Send + 'static> Task<T> {
    /// Convenience for [`TaskAwaiter::new`].
    #[must_use]
    pub fn awaiter(&self, pool: &WorkerPool) -> TaskAwaiter<T> {
        TaskAwaiter::new(self.clone(), pool.clone())
    }
}

impl<T: Send + 'static> Future for TaskAwaiter<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.task.is_done() {
            return Poll::Ready(self.task.result());
        }

        if let Some(slot) = &self.waker {
            *slot.lock() = cx.waker().clone();
        } else {
            let slot = Arc::new(Mutex::new(cx.waker().clone()));
            let slot_for_resume = Arc::clone(&slot);
            let resumption = Task::new(move || {
                slot_for_resume.lock().wake_by_ref();
                Ok(())
            });

            if self.task.add_resume_edge(&resumption) {
                // Edge installed before completion: start the awaited
                // task if nobody has yet.
                self.task.try_schedule(&self.pool);
            } else {
                // The task drained its successors first; run the
                // resumption directly.
                resumption.try_schedule(&self.pool);
            }
            self.waker = Some(slot);
        }

        if self.task.is_done() {
            Poll::Ready(self.task.result())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::time::Duration;

    #[tokio::test]
    async fn awaits_an_unscheduled_task() {
        let pool = WorkerPool::with_workers(2);
        let task = Task::new(|| Ok(11));
        assert_eq!(task.awaiter(&pool).await, Ok(11));
    }

    #[tokio::test]
    async fn awaits_an_already_completed_task() {
        let pool = WorkerPool::with_workers(2);
        let task = Task::new(|| Ok("done"));
        task.try_schedule(&pool);
        task.wait();
        assert_eq!(task.awaiter(&pool).await, Ok("done"));
    }

    #[tokio::test]
    async fn resumes_after_a_slow_task() {
        let pool = WorkerPool::with_workers(2);
        let task = Task::new(|| {
            std::thread::sleep(Duration::from_millis(40));
            Ok(3)
        });
        assert_eq!(task.awaiter(&pool).await, Ok(3));
        assert!(task.is_done());
    }

    #[tokio::test]
    async fn surfaces_the_stored_failure() {
        let pool = WorkerPool::with_workers(2);
        let task: Task<i32> = Task::new(|| Err(TaskError::failed("await me")));
        assert_eq!(task.awaiter(&pool).await, Err(TaskError::failed("await me")));
    }

    #[tokio::test]
    async fn resumes_even_when_the_awaited_task_failed() {
        // The resumption rides an unconditional edge, so a failing task
        // still wakes its awaiter instead of stranding it.
        let pool = WorkerPool::with_workers(1);
        let task: Task<()> = Task::new(|| panic!("inner"));
        let result = task.awaiter(&pool).await;
        assert_eq!(result, Err(TaskError::Panicked("inner".into())));
    }
}
