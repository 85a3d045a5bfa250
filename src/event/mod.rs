//! Typed event bus, subscriptions and scoped subscription lifetimes.

pub mod base;
pub mod bus;
pub mod scope;

pub use base::{Event, SubjectId};
pub use bus::{EventBus, Subscription};
pub use scope::EventScope;
