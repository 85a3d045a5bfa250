//! Error types for the task runtime and event bus.

use std::any::Any;

use thiserror::Error;

/// The single failure channel carried by tasks and event handlers.
///
/// A task records at most one `TaskError`; along conditional edges the
/// first recorded failure wins and downstream callables are skipped.
/// The enum is `Clone` so one recorded failure can fan out to several
/// successors, and `PartialEq` so tests can assert on exact outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A cancellation token fired (explicitly, via a deadline, or through
    /// an event scope).
    #[error("task was cancelled")]
    Cancelled,

    /// A task callable or event handler reported an error.
    #[error("{0}")]
    Failed(String),

    /// A task callable or event handler panicked; the payload text is
    /// preserved when it was a string.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Shorthand for building a [`TaskError::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Converts a payload caught by `std::panic::catch_unwind` into a
    /// [`TaskError::Panicked`].
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }
}

/// Result alias used throughout the crate for task and handler outcomes.
pub type TaskResult<T> = Result<T, TaskError>;

/// Configuration validation failed when constructing a component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(TaskError::Cancelled.to_string(), "task was cancelled");
        assert_eq!(TaskError::failed("boom").to_string(), "boom");
        assert_eq!(
            TaskError::Panicked("oops".into()).to_string(),
            "panicked: oops"
        );
    }

    #[test]
    fn from_panic_extracts_str_payloads() {
        let err = TaskError::from_panic(Box::new("static"));
        assert_eq!(err, TaskError::Panicked("static".into()));

        let err = TaskError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err, TaskError::Panicked("owned".into()));

        let err = TaskError::from_panic(Box::new(17_u32));
        assert_eq!(err, TaskError::Panicked("non-string panic payload".into()));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError("worker_count must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: worker_count must be greater than 0"
        );
    }
}
