//! Typed publish/subscribe event bus backed by the worker pool.
//!
//! Handlers are stored type-erased behind one mutex and entered
//! type-safely at the call site: dispatch is monomorphised per event type
//! and the registries are keyed by `TypeId`. Every dispatch snapshots the
//! matching handlers under the mutex, releases it, and only then invokes
//! — so handlers may freely subscribe, unsubscribe or emit reentrantly,
//! and in-flight dispatches keep seeing the pre-dispatch handler set.
//!
//! Three dispatch shapes:
//!
//! - [`emit`](EventBus::emit) — synchronous, in snapshot order; a failing
//!   handler is logged and never stops the rest
//! - [`emit_async`](EventBus::emit_async) — fire-and-forget, one pool job
//!   per handler
//! - [`publish_async`](EventBus::publish_async) — awaitable: returns a
//!   [`Task`] that completes once every handler finished and surfaces the
//!   first handler failure or cancellation
//!
//! # Example
//!
//! ```
//! use taskfabric::core::WorkerPool;
//! use taskfabric::event::{Event, EventBus};
//!
//! struct SceneLoaded {
//!     name: &'static str,
//! }
//! impl Event for SceneLoaded {}
//!
//! let bus = EventBus::new(WorkerPool::with_workers(2));
//! let sub = bus.subscribe::<SceneLoaded, _>(|event| {
//!     println!("loaded {}", event.name);
//!     Ok(())
//! });
//! bus.emit(&SceneLoaded { name: "hangar" });
//! sub.unsubscribe();
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::core::extensions::{when_all, when_all_with_cancellation};
use crate::core::{CancellationToken, Task, WorkerPool};
use crate::error::{TaskError, TaskResult};
use crate::event::base::{Event, SubjectId};

type BoxedHandler = Arc<dyn Fn(&dyn Any) -> TaskResult<()> + Send + Sync + 'static>;

/// Registries guarded by the bus mutex: the id counter, the global table
/// (`TypeId → handler_id → handler`) and the targeted table
/// (`TypeId → SubjectId → handler_id → handler`).
struct HandlerTables {
    next_id: u64,
    global: HashMap<TypeId, HashMap<u64, BoxedHandler>>,
    targeted: HashMap<TypeId, HashMap<SubjectId, HashMap<u64, BoxedHandler>>>,
}

struct BusShared {
    pool: WorkerPool,
    tables: Mutex<HandlerTables>,
}

/// Typed event bus with synchronous, asynchronous and awaitable dispatch.
///
/// Handles are cheap to clone and share one registry.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus dispatching async work on `pool`.
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            shared: Arc::new(BusShared {
                pool,
                tables: Mutex::new(HandlerTables {
                    next_id: 0,
                    global: HashMap::new(),
                    targeted: HashMap::new(),
                }),
            }),
        }
    }

    /// Register `handler` for every emission of `E`.
    ///
    /// Returns the RAII [`Subscription`]; dropping it unsubscribes.
    pub fn subscribe<E, H>(&self, handler: H) -> Subscription
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.insert::<E>(None, erase::<E, H>(handler))
    }

    /// Register `handler` for emissions of `E` targeted at `subject`.
    pub fn subscribe_targeted<E, H>(&self, subject: SubjectId, handler: H) -> Subscription
    where
        E: Event,
        H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.insert::<E>(Some(subject), erase::<E, H>(handler))
    }

    /// Synchronously dispatch `event` to every handler registered for its
    /// type, in snapshot order.
    ///
    /// Handler failures and panics are logged and isolated: one failing
    /// handler never prevents the next from running.
    pub fn emit<E: Event>(&self, event: &E) {
        let snapshot = self.shared.snapshot(TypeId::of::<E>(), None);
        for handler in &snapshot {
            invoke_guarded(handler, event, type_name::<E>());
        }
    }

    /// Synchronously dispatch `event` to the global handlers for its type
    /// plus the handlers targeted at `subject`.
    pub fn emit_targeted<E: Event>(&self, subject: SubjectId, event: &E) {
        let snapshot = self.shared.snapshot(TypeId::of::<E>(), Some(subject));
        for handler in &snapshot {
            invoke_guarded(handler, event, type_name::<E>());
        }
    }

    /// Dispatch `event` asynchronously: one pool job per snapshotted
    /// handler, fire-and-forget.
    ///
    /// With a pre-cancelled `token` nothing is enqueued; each job
    /// re-checks the token before invoking its handler. Submission order
    /// is snapshot order, execution order is up to the pool.
    pub fn emit_async<E: Event>(&self, event: E, token: Option<&CancellationToken>) {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return;
        }
        let snapshot = self.shared.snapshot(TypeId::of::<E>(), None);
        self.shared
            .fan_out(snapshot, Arc::new(event), token, type_name::<E>());
    }

    /// Asynchronous variant of [`emit_targeted`](Self::emit_targeted).
    pub fn emit_targeted_async<E: Event>(
        &self,
        subject: SubjectId,
        event: E,
        token: Option<&CancellationToken>,
    ) {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return;
        }
        let snapshot = self.shared.snapshot(TypeId::of::<E>(), Some(subject));
        self.shared
            .fan_out(snapshot, Arc::new(event), token, type_name::<E>());
    }

    /// Dispatch `event` asynchronously and return a task that completes
    /// once every handler has finished.
    ///
    /// Awaiting (or reading) the returned task surfaces the first handler
    /// failure, or [`TaskError::Cancelled`] when `token` latched before a
    /// handler task started. A pre-cancelled token yields a task that
    /// completes with `Cancelled`; no handlers yields an
    /// immediately-complete task.
    pub fn publish_async<E: Event>(
        &self,
        event: E,
        token: Option<&CancellationToken>,
    ) -> Task<()> {
        let pool = &self.shared.pool;
        if token.is_some_and(CancellationToken::is_cancelled) {
            let cancelled = Task::new(|| Err(TaskError::Cancelled));
            cancelled.try_schedule(pool);
            return cancelled;
        }

        let snapshot = self.shared.snapshot(TypeId::of::<E>(), None);
        let payload: Arc<dyn Any + Send + Sync> = Arc::new(event);

        let handler_tasks: Vec<Task<()>> = snapshot
            .into_iter()
            .map(|handler| {
                let payload = Arc::clone(&payload);
                let entry_token = token.cloned();
                Task::new(move || {
                    if let Some(token) = &entry_token {
                        token.ensure_not_cancelled()?;
                    }
                    handler(payload.as_ref())
                })
            })
            .collect();

        match token {
            Some(token) => when_all_with_cancellation(pool, &handler_tasks, token.clone()),
            None => when_all(pool, &handler_tasks),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.shared.tables.lock();
        f.debug_struct("EventBus")
            .field("event_types", &tables.global.len())
            .field("targeted_event_types", &tables.targeted.len())
            .field("next_handler_id", &tables.next_id)
            .finish()
    }
}

impl EventBus {
    fn insert<E: Event>(&self, subject: Option<SubjectId>, handler: BoxedHandler) -> Subscription {
        let type_id = TypeId::of::<E>();
        let mut tables = self.shared.tables.lock();
        let handler_id = tables.next_id;
        tables.next_id += 1;
        match subject {
            None => {
                tables
                    .global
                    .entry(type_id)
                    .or_default()
                    .insert(handler_id, handler);
            }
            Some(subject) => {
                tables
                    .targeted
                    .entry(type_id)
                    .or_default()
                    .entry(subject)
                    .or_default()
                    .insert(handler_id, handler);
            }
        }
        Subscription {
            bus: Arc::downgrade(&self.shared),
            type_id,
            event_name: type_name::<E>(),
            subject,
            handler_id,
        }
    }
}

impl BusShared {
    /// Copy the matching handlers out under the mutex. Invocation happens
    /// after the lock is released; this is load-bearing for reentrancy.
    fn snapshot(&self, type_id: TypeId, subject: Option<SubjectId>) -> Vec<BoxedHandler> {
        let tables = self.tables.lock();
        let mut snapshot = Vec::new();
        if let Some(handlers) = tables.global.get(&type_id) {
            snapshot.extend(handlers.values().cloned());
        }
        if let Some(subject) = subject {
            if let Some(handlers) = tables
                .targeted
                .get(&type_id)
                .and_then(|subjects| subjects.get(&subject))
            {
                snapshot.extend(handlers.values().cloned());
            }
        }
        snapshot
    }

    /// Submit one job per handler. The submission loop stops early once
    /// the token latches; each job re-checks on entry.
    fn fan_out(
        &self,
        handlers: Vec<BoxedHandler>,
        payload: Arc<dyn Any + Send + Sync>,
        token: Option<&CancellationToken>,
        event_name: &'static str,
    ) {
        for handler in handlers {
            if token.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            let payload = Arc::clone(&payload);
            let token = token.cloned();
            self.pool.enqueue(move || {
                if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    return;
                }
                invoke_guarded(&handler, payload.as_ref(), event_name);
            });
        }
    }

    fn remove(&self, type_id: TypeId, subject: Option<SubjectId>, handler_id: u64) {
        let mut tables = self.tables.lock();
        match subject {
            None => {
                if let Some(handlers) = tables.global.get_mut(&type_id) {
                    handlers.remove(&handler_id);
                    if handlers.is_empty() {
                        tables.global.remove(&type_id);
                    }
                }
            }
            Some(subject) => {
                if let Some(subjects) = tables.targeted.get_mut(&type_id) {
                    if let Some(handlers) = subjects.get_mut(&subject) {
                        handlers.remove(&handler_id);
                        if handlers.is_empty() {
                            subjects.remove(&subject);
                        }
                    }
                    if subjects.is_empty() {
                        tables.targeted.remove(&type_id);
                    }
                }
            }
        }
    }
}

/// Wrap a typed handler into the erased storage form. The downcast
/// cannot miss through the typed surface; a miss is logged and skipped.
fn erase<E, H>(handler: H) -> BoxedHandler
where
    E: Event,
    H: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
{
    Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<E>() {
        Some(event) => handler(event),
        None => {
            error!(
                event = type_name::<E>(),
                "event payload type mismatch; handler skipped"
            );
            Ok(())
        }
    })
}

/// Invoke one handler inside the failure guard: errors and panics are
/// logged and discarded so the next handler always runs.
fn invoke_guarded(handler: &BoxedHandler, payload: &dyn Any, event_name: &str) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(event = event_name, error = %err, "event handler failed"),
        Err(panic_payload) => {
            let err = TaskError::from_panic(panic_payload);
            error!(event = event_name, error = %err, "event handler panicked");
        }
    }
}

/// Removable handle for one handler registration.
///
/// Holds a non-owning bus reference, so handle operations are safe after
/// the bus is gone. Dropping the subscription unsubscribes; explicit
/// [`unsubscribe`](Self::unsubscribe) is idempotent.
#[must_use = "dropping a subscription immediately unsubscribes its handler"]
pub struct Subscription {
    bus: Weak<BusShared>,
    type_id: TypeId,
    event_name: &'static str,
    subject: Option<SubjectId>,
    handler_id: u64,
}

impl Subscription {
    /// Remove the handler from the bus. Safe to call repeatedly and
    /// after the bus was dropped.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.type_id, self.subject, self.handler_id);
        }
    }

    /// The bus-unique, never-reused id of this registration.
    #[must_use]
    pub fn handler_id(&self) -> u64 {
        self.handler_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event_name)
            .field("subject", &self.subject)
            .field("handler_id", &self.handler_id)
            .finish()
    }
}
