//! # Taskfabric
//!
//! In-process asynchronous task runtime: a DAG task engine scheduling
//! callables on a worker pool, with cooperative cancellation, deadlines
//! and awaitable results — plus a typed event bus delivering events to
//! subscribers synchronously or asynchronously on the same pool.
//!
//! ## Modules
//!
//! - [`core`] - worker pool, cancellation tokens, deadline guards, the
//!   task DAG engine, awaiters and composition helpers
//! - [`event`] - typed event bus, subscriptions and event scopes
//! - [`config`] - component configuration
//! - [`util`] - telemetry helpers
//!
//! ## Examples
//!
//! ### Wiring a task graph
//!
//! ```
//! use taskfabric::{Task, WorkerPool};
//!
//! let pool = WorkerPool::with_workers(2);
//!
//! let fetch = Task::new(|| Ok(7));
//! let report = Task::new(|| {
//!     println!("fetch finished");
//!     Ok(())
//! });
//! fetch.finally(&report);
//!
//! fetch.try_schedule(&pool);
//! assert_eq!(fetch.result(), Ok(7));
//! report.wait();
//! ```
//!
//! ### Publishing events
//!
//! ```
//! use taskfabric::{Event, EventBus, WorkerPool};
//!
//! struct ItemPickedUp {
//!     item_id: u64,
//! }
//! impl Event for ItemPickedUp {}
//!
//! let bus = EventBus::new(WorkerPool::with_workers(2));
//! let _sub = bus.subscribe::<ItemPickedUp, _>(|event| {
//!     println!("picked up {}", event.item_id);
//!     Ok(())
//! });
//!
//! // Awaitable fan-out: the returned task completes when every handler
//! // has finished.
//! let done = bus.publish_async(ItemPickedUp { item_id: 3 }, None);
//! assert_eq!(done.result(), Ok(()));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod util;

// Re-export main types for convenience
pub use config::WorkerPoolConfig;
pub use self::core::{
    when_all, when_all_with_cancellation, with_cancellation, with_polling_cancellation,
    with_timeout, CancellationToken, DeadlineGuard, Task, TaskAwaiter, WorkerPool,
};
pub use error::{ConfigError, TaskError, TaskResult};
pub use event::{Event, EventBus, EventScope, SubjectId, Subscription};
