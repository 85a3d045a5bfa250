//! Logging setup for the runtime.
//!
//! All library code logs through `tracing` macros; nothing here is
//! required. Embedding applications that already install a subscriber
//! keep it — [`init_tracing`] backs off when a global dispatcher exists.

use tracing_subscriber::EnvFilter;

/// Fallback directive when `RUST_LOG` is unset: surface the runtime's
/// own lifecycle and swallowed-handler-failure logs, stay quiet about
/// everything else.
const DEFAULT_FILTER: &str = "warn,taskfabric=info";

/// Install a formatted `tracing` subscriber for the runtime.
///
/// The filter comes from `RUST_LOG` when set and falls back to
/// `warn,taskfabric=info` otherwise. A no-op when a global subscriber is
/// already installed.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}
