//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Default number of worker threads: one less than the hardware
/// concurrency, clamped to at least 1 so the pool can always make
/// progress.
fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Default thread stack size: 2MB.
fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Configuration for the [`WorkerPool`](crate::core::WorkerPool).
///
/// # Example
///
/// ```
/// use taskfabric::config::WorkerPoolConfig;
///
/// let config = WorkerPoolConfig::new().with_worker_count(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker threads draining the job queue.
    ///
    /// Default: hardware concurrency minus one, at least 1.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Stack size per worker thread in bytes.
    ///
    /// Default: 2MB (2 * 1024 * 1024 bytes).
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            thread_stack_size: default_thread_stack_size(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the thread stack size in bytes.
    #[must_use]
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64KB".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a message for parse failures and for invalid field values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
