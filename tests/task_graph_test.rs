//! Integration tests for the task DAG engine.
//!
//! These cover the end-to-end graph shapes:
//! - Diamond graphs with success and failure propagation
//! - Conditional vs unconditional edges
//! - Timeouts through the deadline guard
//! - Aggregate waits and their boundary cases
//! - Awaiting graph results from async code

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskfabric::{
    when_all, when_all_with_cancellation, with_cancellation, with_timeout, CancellationToken,
    Task, TaskError, WorkerPool,
};

// ============================================================================
// HELPERS
// ============================================================================

struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    fn bump(&self) -> impl Fn() + Send + Sync + 'static {
        let count = Arc::clone(&self.0);
        move || {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// DIAMOND GRAPHS
// ============================================================================

#[test]
fn diamond_with_success() {
    let pool = WorkerPool::with_workers(4);
    let (ran_a, ran_b, ran_c, ran_d) = (Counter::new(), Counter::new(), Counter::new(), Counter::new());

    let a_out = Arc::new(AtomicI32::new(0));
    let b_out = Arc::new(AtomicI32::new(0));
    let c_out = Arc::new(AtomicI32::new(0));

    let a = {
        let a_out = Arc::clone(&a_out);
        let bump = ran_a.bump();
        Task::new(move || {
            bump();
            a_out.store(7, Ordering::Relaxed);
            Ok(7)
        })
    };
    let b = {
        let (a_out, b_out) = (Arc::clone(&a_out), Arc::clone(&b_out));
        let bump = ran_b.bump();
        Task::new(move || {
            bump();
            let value = a_out.load(Ordering::Relaxed) + 3;
            b_out.store(value, Ordering::Relaxed);
            Ok(value)
        })
    };
    let c = {
        let (a_out, c_out) = (Arc::clone(&a_out), Arc::clone(&c_out));
        let bump = ran_c.bump();
        Task::new(move || {
            bump();
            let value = a_out.load(Ordering::Relaxed) + 13;
            c_out.store(value, Ordering::Relaxed);
            Ok(value)
        })
    };
    let d = {
        let (b_out, c_out) = (Arc::clone(&b_out), Arc::clone(&c_out));
        let bump = ran_d.bump();
        Task::new(move || {
            bump();
            Ok(b_out.load(Ordering::Relaxed) + c_out.load(Ordering::Relaxed))
        })
    };

    a.then(&b);
    a.then(&c);
    b.finally(&d);
    c.finally(&d);
    a.try_schedule(&pool);

    assert_eq!(d.result(), Ok(30));
    assert_eq!(b.result(), Ok(10));
    assert_eq!(c.result(), Ok(20));
    assert_eq!(a.result(), Ok(7));
    assert_eq!(
        (ran_a.get(), ran_b.get(), ran_c.get(), ran_d.get()),
        (1, 1, 1, 1)
    );
}

#[test]
fn diamond_with_failure() {
    // A fails; B and C sit on conditional edges and are short-circuited;
    // D sits on unconditional edges and still runs.
    let pool = WorkerPool::with_workers(4);
    let (ran_b, ran_c, ran_d) = (Counter::new(), Counter::new(), Counter::new());

    let a: Task<i32> = Task::new(|| Err(TaskError::failed("X")));
    let b = {
        let bump = ran_b.bump();
        Task::new(move || {
            bump();
            Ok(0)
        })
    };
    let c = {
        let bump = ran_c.bump();
        Task::new(move || {
            bump();
            Ok(0)
        })
    };
    let d = {
        let bump = ran_d.bump();
        Task::new(move || {
            bump();
            Ok(())
        })
    };

    a.then(&b);
    a.then(&c);
    b.finally(&d);
    c.finally(&d);
    a.try_schedule(&pool);

    d.wait();
    assert_eq!(d.result(), Ok(()));
    assert_eq!(b.result(), Err(TaskError::failed("X")));
    assert_eq!(c.result(), Err(TaskError::failed("X")));
    assert_eq!((ran_b.get(), ran_c.get(), ran_d.get()), (0, 0, 1));
}

// ============================================================================
// CANCELLATION AND TIMEOUTS
// ============================================================================

#[test]
fn timeout_fires_on_non_polling_work() {
    let pool = WorkerPool::with_workers(2);
    let (task, token) = with_timeout(
        || {
            // Never polls the token; overruns the deadline.
            std::thread::sleep(Duration::from_millis(300));
            Ok(5)
        },
        Duration::from_millis(100),
    );
    task.try_schedule(&pool);

    assert_eq!(task.result(), Err(TaskError::Cancelled));
    assert!(token.is_cancelled());
}

#[test]
fn scheduling_after_cancel_still_reaches_done() {
    let pool = WorkerPool::with_workers(2);
    let token = CancellationToken::new();
    token.cancel();

    let task = with_cancellation(|| Ok(1), token);
    task.try_schedule(&pool);

    task.wait();
    assert!(task.is_done());
    assert_eq!(task.result(), Err(TaskError::Cancelled));
}

// ============================================================================
// AGGREGATE WAITS
// ============================================================================

#[test]
fn when_all_completes_iff_every_input_completes() {
    let pool = WorkerPool::with_workers(4);
    let ran = Counter::new();

    let tasks: Vec<Task<()>> = (0..8)
        .map(|i| {
            let bump = ran.bump();
            Task::new(move || {
                std::thread::sleep(Duration::from_millis(5 * (i % 3)));
                bump();
                Ok(())
            })
        })
        .collect();

    let aggregate = when_all(&pool, &tasks);
    aggregate.wait();
    assert_eq!(ran.get(), 8);
    for task in &tasks {
        assert!(task.is_done());
    }
}

#[test]
fn when_all_of_an_empty_set_is_immediate() {
    let pool = WorkerPool::with_workers(1);
    let aggregate = when_all(&pool, &[]);
    aggregate.wait();
    assert_eq!(aggregate.result(), Ok(()));
}

#[test]
fn when_all_with_cancellation_surfaces_the_token() {
    let pool = WorkerPool::with_workers(2);
    let token = CancellationToken::new();
    token.cancel();

    let tasks: Vec<Task<()>> = (0..3).map(|_| Task::new(|| Ok(()))).collect();
    let aggregate = when_all_with_cancellation(&pool, &tasks, token);
    assert_eq!(aggregate.result(), Err(TaskError::Cancelled));
}

// ============================================================================
// AWAITING GRAPH RESULTS
// ============================================================================

#[tokio::test]
async fn awaiting_a_diamond_tail() {
    let pool = WorkerPool::with_workers(4);
    let total = Arc::new(AtomicI32::new(0));

    let a = {
        let total = Arc::clone(&total);
        Task::new(move || {
            total.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };
    let b = {
        let total = Arc::clone(&total);
        Task::new(move || {
            total.fetch_add(10, Ordering::Relaxed);
            Ok(())
        })
    };
    let tail = {
        let total = Arc::clone(&total);
        Task::new(move || Ok(total.load(Ordering::Relaxed)))
    };
    a.then(&b).then(&tail);
    a.try_schedule(&pool);

    assert_eq!(tail.awaiter(&pool).await, Ok(11));
}

#[tokio::test]
async fn awaiting_a_cancelled_timeout_task() {
    let pool = WorkerPool::with_workers(2);
    let (task, token) = with_timeout(
        || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        },
        Duration::from_millis(50),
    );
    task.try_schedule(&pool);

    assert_eq!(task.awaiter(&pool).await, Err(TaskError::Cancelled));
    assert!(token.is_cancelled());
}
