//! Fixed-size worker pool draining a single FIFO job queue.
//!
//! The pool is the execution substrate for the task engine and the event
//! bus: task callables, async handler invocations and publish aggregators
//! all run here. Its contract is deliberately small — every submitted job
//! runs exactly once on some worker thread.
//!
//! # Design
//!
//! - **No polling**: workers block on the channel; dropping the sender
//!   unblocks them naturally after the remaining queue is drained
//! - **Clean teardown**: [`WorkerPool::shutdown`] (or dropping the last
//!   handle) closes the queue and joins the workers
//! - **Panic isolation**: a panicking job is logged and the worker
//!   survives
//!
//! # Example
//!
//! ```
//! use taskfabric::core::WorkerPool;
//!
//! let pool = WorkerPool::with_workers(2);
//! pool.enqueue(|| println!("ran on a worker"));
//! pool.shutdown();
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::error::ConfigError;

/// A unit of work submitted to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a fixed-size pool of worker threads.
///
/// Handles are cheap to clone and share one underlying pool; the pool
/// shuts down when [`shutdown`](Self::shutdown) is called or the last
/// handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Job sender. `None` once shutdown began; dropping it unblocks idle
    /// workers.
    job_tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    worker_count: usize,
}

impl WorkerPool {
    /// Create a pool with the default configuration (one worker per
    /// hardware thread, minus one, at least one).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
            .unwrap_or_else(|e| unreachable!("default config is valid: {e}"))
    }

    /// Create a pool with an explicit number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics when `count` is zero.
    #[must_use]
    pub fn with_workers(count: usize) -> Self {
        match Self::with_config(WorkerPoolConfig::new().with_worker_count(count)) {
            Ok(pool) => pool,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a pool from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError)?;

        let (job_tx, job_rx) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            workers.push(spawn_worker(worker_id, job_rx.clone(), config.thread_stack_size));
        }

        info!(
            worker_count = config.worker_count,
            "worker pool started"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                job_tx: Mutex::new(Some(job_tx)),
                workers: Mutex::new(workers),
                shutdown: AtomicBool::new(false),
                worker_count: config.worker_count,
            }),
        })
    }

    /// Submit a job to the pool.
    ///
    /// The job runs exactly once on some worker thread, in FIFO pickup
    /// order. Jobs submitted after shutdown began are dropped with a
    /// warning.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let guard = self.inner.job_tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                // Unbounded channel: send only fails when all receivers
                // are gone, which implies shutdown already ran.
                if tx.send(Box::new(job)).is_err() {
                    warn!("job dropped: worker pool already shut down");
                }
            }
            None => warn!("job dropped: worker pool already shut down"),
        }
    }

    /// Number of worker threads in this pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Shut the pool down: close the queue, let workers drain the
    /// remaining jobs, and join them. Idempotent.
    pub fn shutdown(&self) {
        self.inner.stop_and_join();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.inner.worker_count)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl PoolInner {
    fn stop_and_join(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender lets every worker drain the remaining
        // queue and then exit on the disconnect.
        {
            let mut tx = self.job_tx.lock();
            *tx = None;
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            // The last handle may be dropped from inside a job; a worker
            // cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked during teardown");
            }
        }

        info!("worker pool shut down");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn spawn_worker(worker_id: usize, job_rx: Receiver<Job>, stack_size: usize) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("tf-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            // Blocking recv; returns Err once the sender is dropped and
            // the queue is drained.
            while let Ok(job) = job_rx.recv() {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(worker_id, "job panicked; worker continues");
                }
            }

            debug!(worker_id, "worker thread exiting");
        })
        .expect("failed to spawn worker thread")
}
