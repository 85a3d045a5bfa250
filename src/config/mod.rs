//! Configuration structures for runtime components.

pub mod pool;

pub use pool::WorkerPoolConfig;
