//! Scoped ownership of event subscriptions.
//!
//! An [`EventScope`] collects subscriptions and owns a scope-local
//! [`CancellationToken`]. Dropping the scope first latches the token —
//! async handler jobs that have not yet started observe it and
//! short-circuit — and then removes every subscription in reverse
//! registration order.
//!
//! This is a *safety* boundary, not a liveness one: a handler that is
//! already running always completes; only new user-code entry is
//! prevented.
//!
//! Handlers registered through a scope must not borrow the object that
//! owns the scope; capture shared ownership (`Arc`) instead, so a
//! handler that was already in flight during teardown never touches
//! freed state.

use parking_lot::Mutex;

use crate::core::CancellationToken;
use crate::error::TaskResult;
use crate::event::base::{Event, SubjectId};
use crate::event::bus::{EventBus, Subscription};

/// RAII aggregator of event subscriptions with a scope-local token.
///
/// Movable but not cloneable: exactly one owner tears the scope down.
///
/// # Example
///
/// ```
/// use taskfabric::core::WorkerPool;
/// use taskfabric::event::{Event, EventBus, EventScope};
///
/// struct Tick;
/// impl Event for Tick {}
///
/// let bus = EventBus::new(WorkerPool::with_workers(2));
/// {
///     let scope = EventScope::new();
///     scope.subscribe::<Tick, _>(&bus, |_tick| Ok(()));
///     bus.emit(&Tick); // delivered
/// }
/// bus.emit(&Tick); // scope dropped: no longer delivered
/// ```
pub struct EventScope {
    token: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventScope {
    /// Create an empty scope with a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe on `bus` and keep the handle in this scope.
    pub fn subscribe<E, H>(&self, bus: &EventBus, handler: H)
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.retain(bus.subscribe::<E, H>(handler));
    }

    /// Targeted variant of [`subscribe`](Self::subscribe).
    pub fn subscribe_targeted<E, H>(&self, bus: &EventBus, subject: SubjectId, handler: H)
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.retain(bus.subscribe_targeted::<E, H>(subject, handler));
    }

    /// Subscribe a handler meant for async dispatch: on entry it observes
    /// the scope token and returns early once the scope was cancelled or
    /// dropped.
    pub fn subscribe_async<E, H>(&self, bus: &EventBus, handler: H)
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.retain(bus.subscribe(self.wrap::<E, H>(handler)));
    }

    /// Targeted variant of [`subscribe_async`](Self::subscribe_async).
    pub fn subscribe_async_targeted<E, H>(&self, bus: &EventBus, subject: SubjectId, handler: H)
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.retain(bus.subscribe_targeted(subject, self.wrap::<E, H>(handler)));
    }

    /// Latch the scope token without removing subscriptions.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the scope token is latched.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle to the scope-local token, e.g. to pass into
    /// [`EventBus::emit_async`](crate::event::EventBus::emit_async).
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn retain(&self, subscription: Subscription) {
        self.subscriptions.lock().push(subscription);
    }

    fn wrap<E, H>(&self, handler: H) -> impl Fn(&E) -> TaskResult<()> + Send + Sync + 'static
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let token = self.token.clone();
        move |event: &E| {
            if token.is_cancelled() {
                return Ok(());
            }
            handler(event)
        }
    }
}

impl Default for EventScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        // Token first: pending async handler jobs short-circuit before
        // the handles disappear.
        self.token.cancel();
        let mut subscriptions = self.subscriptions.lock();
        while let Some(subscription) = subscriptions.pop() {
            subscription.unsubscribe();
        }
    }
}

impl std::fmt::Debug for EventScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScope")
            .field("cancelled", &self.is_cancelled())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}
