//! Core runtime: worker pool, cancellation fabric and the task DAG
//! engine.

pub mod awaiter;
pub mod cancel;
pub mod deadline;
pub mod extensions;
pub mod task;
pub mod worker_pool;

pub use awaiter::TaskAwaiter;
pub use cancel::CancellationToken;
pub use deadline::DeadlineGuard;
pub use extensions::{
    when_all, when_all_with_cancellation, with_cancellation, with_polling_cancellation,
    with_timeout,
};
pub use task::Task;
pub use worker_pool::{Job, WorkerPool};
