//! The task DAG engine.
//!
//! A [`Task`] is a node in an execution DAG: a one-shot callable plus the
//! state machine that decides when it runs. Successor edges come in two
//! flavours:
//!
//! - [`then`](Task::then) — a *conditional* edge: the successor inherits
//!   the first failure recorded among its failing conditional
//!   predecessors and skips its own callable
//! - [`finally`](Task::finally) — an *unconditional* edge: the successor
//!   runs regardless of this task's outcome and never sees its failure
//!
//! A task schedules at most once, completes exactly once, and notifies
//! its successors only after its done latch is set. Blocking waiters are
//! released through a condvar; results and failures are read through
//! [`result`](Task::result).
//!
//! # Example
//!
//! ```
//! use taskfabric::core::{Task, WorkerPool};
//!
//! let pool = WorkerPool::with_workers(2);
//! let double = Task::new(|| Ok(21 * 2));
//! double.try_schedule(&pool);
//! assert_eq!(double.result(), Ok(42));
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::core::worker_pool::WorkerPool;
use crate::error::{TaskError, TaskResult};

type Callable<T> = Box<dyn FnOnce() -> TaskResult<T> + Send + 'static>;

/// Type-erased view of a task used for successor bookkeeping.
///
/// Completion notifications flow through this trait so a task can hold
/// successors of any result type.
pub(crate) trait TaskNode: Send + Sync {
    /// A predecessor reached its done latch. `failure` carries the
    /// predecessor's failure along conditional edges and is always
    /// `None` along unconditional ones.
    fn on_predecessor_finished(self: Arc<Self>, pool: &WorkerPool, failure: Option<TaskError>);
}

/// Successor edges of a task. `notified` latches once the completion
/// path has drained the lists; edges arriving later are rejected so the
/// caller can notify directly instead (see `add_resume_edge`).
struct EdgeSet {
    unconditional: Vec<Arc<dyn TaskNode>>,
    conditional: Vec<Arc<dyn TaskNode>>,
    notified: bool,
}

struct TaskInner<T> {
    callable: Mutex<Option<Callable<T>>>,
    result: Mutex<Option<T>>,
    /// First recorded failure, own or inherited. Guarded by its own small
    /// lock so concurrent predecessors cannot tear the first-write-wins
    /// decision.
    failure: Mutex<Option<TaskError>>,
    predecessors: AtomicUsize,
    scheduled: AtomicBool,
    done: AtomicBool,
    wait_lock: Mutex<()>,
    done_cv: Condvar,
    edges: Mutex<EdgeSet>,
}

/// A unit of work forming a node in the execution DAG.
///
/// `Task` is a cheaply cloneable handle; clones observe the same node.
/// Wire successors with [`then`](Self::then) / [`finally`](Self::finally)
/// before scheduling, then call [`try_schedule`](Self::try_schedule) on
/// the roots.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Task<T> {
    /// Create a task from its callable. The task holds the callable until
    /// it is scheduled; it runs at most once.
    #[must_use]
    pub fn new<F>(callable: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                callable: Mutex::new(Some(Box::new(callable))),
                result: Mutex::new(None),
                failure: Mutex::new(None),
                predecessors: AtomicUsize::new(0),
                scheduled: AtomicBool::new(false),
                done: AtomicBool::new(false),
                wait_lock: Mutex::new(()),
                done_cv: Condvar::new(),
                edges: Mutex::new(EdgeSet {
                    unconditional: Vec::new(),
                    conditional: Vec::new(),
                    notified: false,
                }),
            }),
        }
    }

    /// Add `next` as a *conditional* successor: it waits for this task
    /// and inherits this task's failure, if any. Returns `next` for
    /// chaining.
    ///
    /// Edges must be wired before either task is scheduled.
    pub fn then<U: Send + 'static>(&self, next: &Task<U>) -> Task<U> {
        self.wire(next, true);
        next.clone()
    }

    /// Add `next` as an *unconditional* successor: it waits for this task
    /// but never observes its failure. Returns `next` for chaining.
    ///
    /// Edges must be wired before either task is scheduled.
    pub fn finally<U: Send + 'static>(&self, next: &Task<U>) -> Task<U> {
        self.wire(next, false);
        next.clone()
    }

    fn wire<U: Send + 'static>(&self, next: &Task<U>, conditional: bool) {
        let mut edges = self.inner.edges.lock();
        if edges.notified {
            warn!("successor wired after task completion; edge ignored");
            return;
        }
        next.inner.predecessors.fetch_add(1, Ordering::Relaxed);
        let list = if conditional {
            &mut edges.conditional
        } else {
            &mut edges.unconditional
        };
        list.push(Arc::clone(&next.inner) as Arc<dyn TaskNode>);
    }

    /// Install `resume` as an unconditional successor, racing against the
    /// completion path under the edge lock. Returns `false` when the task
    /// already drained its successors, in which case the caller must
    /// schedule `resume` itself — exactly one of the two paths runs.
    pub(crate) fn add_resume_edge(&self, resume: &Task<()>) -> bool {
        let mut edges = self.inner.edges.lock();
        if edges.notified {
            return false;
        }
        resume.inner.predecessors.fetch_add(1, Ordering::Relaxed);
        edges
            .unconditional
            .push(Arc::clone(&resume.inner) as Arc<dyn TaskNode>);
        true
    }

    /// Schedule the task once its predecessor count is zero.
    ///
    /// A task with a recorded inherited failure completes without
    /// submitting its callable to the pool; otherwise the callable is
    /// enqueued and any failure it produces is captured. Calling this on
    /// an already scheduled task is a no-op.
    pub fn try_schedule(&self, pool: &WorkerPool) {
        TaskInner::try_schedule(&self.inner, pool);
    }

    /// Block the calling thread until the task is done.
    pub fn wait(&self) {
        let mut latch = self.inner.wait_lock.lock();
        while !self.inner.done.load(Ordering::Acquire) {
            self.inner.done_cv.wait(&mut latch);
        }
    }

    /// Whether the task has completed (ran or was short-circuited).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Wait for completion, then surface the recorded failure or consume
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns the task's stored failure: its own, or the first failure
    /// inherited along a conditional edge.
    ///
    /// # Panics
    ///
    /// Panics when the result was already consumed by an earlier call.
    pub fn result(&self) -> TaskResult<T> {
        self.wait();
        if let Some(err) = self.inner.failure.lock().clone() {
            return Err(err);
        }
        Ok(self
            .inner
            .result
            .lock()
            .take()
            .expect("task result already consumed"))
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("scheduled", &self.inner.scheduled.load(Ordering::Acquire))
            .field("done", &self.inner.done.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Send + 'static> TaskInner<T> {
    fn try_schedule(this: &Arc<Self>, pool: &WorkerPool) {
        if this.predecessors.load(Ordering::Acquire) != 0 {
            return;
        }
        if this.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        Self::execute(this, pool);
    }

    fn execute(this: &Arc<Self>, pool: &WorkerPool) {
        if this.failure.lock().is_some() {
            // Inherited failure: the callable must not run. Complete on
            // the notifying thread.
            this.finish(pool);
            return;
        }

        let node = Arc::clone(this);
        let pool_for_job = pool.clone();
        pool.enqueue(move || {
            node.run_callable();
            node.finish(&pool_for_job);
        });
    }

    fn run_callable(&self) {
        let Some(callable) = self.callable.lock().take() else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(callable)) {
            Ok(Ok(value)) => *self.result.lock() = Some(value),
            Ok(Err(err)) => self.record_failure(err),
            Err(payload) => self.record_failure(TaskError::from_panic(payload)),
        }
    }

    fn record_failure(&self, err: TaskError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Latch done, release blocking waiters, then notify successors.
    fn finish(&self, pool: &WorkerPool) {
        {
            let _latch = self.wait_lock.lock();
            self.done.store(true, Ordering::Release);
        }
        self.done_cv.notify_all();
        self.notify_successors(pool);
    }

    fn notify_successors(&self, pool: &WorkerPool) {
        let failure = self.failure.lock().clone();
        let (unconditional, conditional) = {
            let mut edges = self.edges.lock();
            edges.notified = true;
            (
                std::mem::take(&mut edges.unconditional),
                std::mem::take(&mut edges.conditional),
            )
        };
        // The drained vectors drop the successor references once
        // notification is delivered.
        for next in unconditional {
            next.on_predecessor_finished(pool, None);
        }
        for next in conditional {
            next.on_predecessor_finished(pool, failure.clone());
        }
    }
}

impl<T: Send + 'static> TaskNode for TaskInner<T> {
    fn on_predecessor_finished(self: Arc<Self>, pool: &WorkerPool, failure: Option<TaskError>) {
        if let Some(err) = failure {
            self.record_failure(err);
        }
        if self.predecessors.fetch_sub(1, Ordering::AcqRel) == 1 {
            Self::try_schedule(&self, pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_the_callable_and_returns_the_result() {
        let pool = WorkerPool::with_workers(2);
        let task = Task::new(|| Ok(7));
        task.try_schedule(&pool);
        assert_eq!(task.result(), Ok(7));
        assert!(task.is_done());
    }

    #[test]
    fn try_schedule_is_one_shot() {
        let pool = WorkerPool::with_workers(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = Arc::clone(&runs);
        let task = Task::new(move || {
            runs2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        task.try_schedule(&pool);
        task.try_schedule(&pool);
        task.wait();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn callable_failure_is_stored_and_surfaced() {
        let pool = WorkerPool::with_workers(2);
        let task: Task<i32> = Task::new(|| Err(TaskError::failed("boom")));
        task.try_schedule(&pool);
        assert_eq!(task.result(), Err(TaskError::failed("boom")));
    }

    #[test]
    fn callable_panic_is_captured() {
        let pool = WorkerPool::with_workers(2);
        let task: Task<i32> = Task::new(|| panic!("kaboom"));
        task.try_schedule(&pool);
        assert_eq!(task.result(), Err(TaskError::Panicked("kaboom".into())));
    }

    #[test]
    fn then_waits_for_the_predecessor() {
        let pool = WorkerPool::with_workers(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        let a = Task::new(move || {
            std::thread::sleep(Duration::from_millis(20));
            order_a.lock().push("a");
            Ok(())
        });
        let order_b = Arc::clone(&order);
        let b = Task::new(move || {
            order_b.lock().push("b");
            Ok(())
        });
        a.then(&b);
        a.try_schedule(&pool);

        b.wait();
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[test]
    fn then_forwards_failure_and_skips_the_callable() {
        let pool = WorkerPool::with_workers(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);

        let a: Task<()> = Task::new(|| Err(TaskError::failed("upstream")));
        let b = Task::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        a.then(&b);
        a.try_schedule(&pool);

        assert_eq!(b.result(), Err(TaskError::failed("upstream")));
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn finally_runs_despite_predecessor_failure() {
        let pool = WorkerPool::with_workers(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);

        let a: Task<()> = Task::new(|| Err(TaskError::failed("upstream")));
        let b = Task::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        a.finally(&b);
        a.try_schedule(&pool);

        assert_eq!(b.result(), Ok(()));
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn join_runs_once_after_all_predecessors() {
        let pool = WorkerPool::with_workers(4);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = Arc::clone(&runs);

        let a = Task::new(|| Ok(()));
        let b = Task::new(|| Ok(()));
        let join = Task::new(move || {
            runs2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        a.finally(&join);
        b.finally(&join);
        a.try_schedule(&pool);
        b.try_schedule(&pool);

        join.wait();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn first_failure_wins_at_a_conditional_join() {
        // Two conditional predecessors, one fails: the join inherits the
        // failure and skips its callable.
        let pool = WorkerPool::with_workers(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);

        let ok = Task::new(|| Ok(()));
        let bad: Task<()> = Task::new(|| Err(TaskError::failed("first")));
        let join = Task::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        ok.then(&join);
        bad.then(&join);
        ok.try_schedule(&pool);
        bad.try_schedule(&pool);

        assert_eq!(join.result(), Err(TaskError::failed("first")));
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn chaining_returns_the_successor() {
        let pool = WorkerPool::with_workers(2);
        let a = Task::new(|| Ok(()));
        let b = Task::new(|| Ok(()));
        let c = Task::new(|| Ok(()));
        a.then(&b).then(&c);
        a.try_schedule(&pool);
        c.wait();
        assert!(a.is_done() && b.is_done() && c.is_done());
    }

    #[test]
    #[should_panic(expected = "task result already consumed")]
    fn consuming_the_result_twice_panics() {
        let pool = WorkerPool::with_workers(1);
        let task = Task::new(|| Ok(5));
        task.try_schedule(&pool);
        let _ = task.result();
        let _ = task.result();
    }
}
