//! Event marker trait and subject identifiers.

use serde::{Deserialize, Serialize};

/// Marker for types that can travel over the
/// [`EventBus`](crate::event::EventBus).
///
/// The bus is keyed on the type identity of the event, so any `'static`
/// payload that is safe to share across threads qualifies; implementing
/// the marker is an explicit opt-in.
///
/// # Example
///
/// ```
/// use taskfabric::event::Event;
///
/// #[derive(Debug)]
/// struct PlayerDamaged {
///     player_id: u64,
///     damage: f32,
/// }
///
/// impl Event for PlayerDamaged {}
/// # let _ = PlayerDamaged { player_id: 1, damage: 25.0 };
/// ```
pub trait Event: Send + Sync + 'static {}

/// Strongly-typed subject identifier for targeted dispatch.
///
/// Wraps a raw `u64` so entity ids cannot be mixed up with other
/// integers when subscribing or emitting targeted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(u64);

impl SubjectId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subject:{}", self.0)
    }
}
