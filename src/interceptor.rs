//! Interceptor registry: priority-ordered fan-out of inbound events.
//!
//! Many independent features (logger, room controller, chat merger, phase
//! projector) observe overlapping subsets of the same inbound stream. The
//! registry decouples them from the channel adapter: each feature
//! registers handlers for the event kinds it cares about, or a wildcard
//! for everything, and [`dispatch`](InterceptorRegistry::dispatch) fans
//! each event out without any notion of consuming it.
//!
//! Dispatch order per event: exact-kind handlers first, then wildcard
//! handlers, each group in ascending priority with ties broken by
//! registration order. A panicking handler is isolated so the rest of the
//! chain still runs. Dispatch iterates a stable snapshot, so handlers may
//! register or unregister anything — including themselves — mid-dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tracing::warn;

use crate::protocol::{EventKind, ServerEvent};

/// What a registration listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Exactly one event kind.
    Kind(EventKind),
    /// Every inbound event (dispatched after all exact-kind handlers).
    Any,
}

/// Handle returned by [`InterceptorRegistry::register`]; used to
/// unregister or toggle the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Registration {
    id: InterceptorId,
    filter: EventFilter,
    priority: i32,
    /// Monotonic registration sequence; the priority tiebreaker.
    seq: u64,
    enabled: bool,
    handler: Handler,
}

#[derive(Default)]
struct RegistryInner {
    registrations: Vec<Registration>,
}

/// Process-wide, cheaply cloneable fan-out table for inbound events.
///
/// Clones share the same underlying table; registration and
/// unregistration are safe from any component at any time, including from
/// inside a running handler.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    inner: Arc<StdMutex<RegistryInner>>,
    next_id: Arc<AtomicU64>,
}

impl InterceptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Lower priorities run first; within one
    /// priority, handlers run in registration order.
    pub fn register(
        &self,
        filter: EventFilter,
        priority: i32,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.lock();
        inner.registrations.push(Registration {
            id,
            filter,
            priority,
            seq: id.0,
            enabled: true,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a registration. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: InterceptorId) {
        let mut inner = self.lock();
        inner.registrations.retain(|r| r.id != id);
    }

    /// Enable or disable a registration without removing it.
    /// Unknown ids are ignored.
    pub fn set_enabled(&self, id: InterceptorId, enabled: bool) {
        let mut inner = self.lock();
        if let Some(r) = inner.registrations.iter_mut().find(|r| r.id == id) {
            r.enabled = enabled;
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.lock().registrations.len()
    }

    /// Returns `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().registrations.is_empty()
    }

    /// Fan one event out to every matching handler.
    ///
    /// Exact-kind handlers run before wildcard handlers; each group runs
    /// in ascending (priority, registration) order. Handlers run over a
    /// snapshot taken at dispatch start, so mutations of the registry made
    /// by a handler take effect on the *next* dispatch. A panic inside one
    /// handler is caught and logged; subsequent handlers still run.
    pub fn dispatch(&self, event: &ServerEvent) {
        let kind = event.kind();

        let mut exact: Vec<(i32, u64, Handler)> = Vec::new();
        let mut wildcard: Vec<(i32, u64, Handler)> = Vec::new();
        {
            let inner = self.lock();
            for r in &inner.registrations {
                if !r.enabled {
                    continue;
                }
                match r.filter {
                    EventFilter::Kind(k) if k == kind => {
                        exact.push((r.priority, r.seq, Arc::clone(&r.handler)));
                    }
                    EventFilter::Any => {
                        wildcard.push((r.priority, r.seq, Arc::clone(&r.handler)));
                    }
                    EventFilter::Kind(_) => {}
                }
            }
        }

        exact.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        wildcard.sort_by_key(|(priority, seq, _)| (*priority, *seq));

        for (_, _, handler) in exact.into_iter().chain(wildcard) {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(?kind, "interceptor panicked during dispatch; continuing");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("registrations", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ready_event() -> ServerEvent {
        ServerEvent::ConnectionReady {
            player_id: Uuid::from_u128(1),
        }
    }

    fn reset_event() -> ServerEvent {
        ServerEvent::ReadyReset {
            room_id: Uuid::from_u128(2),
        }
    }

    #[test]
    fn dispatches_to_matching_kind_only() {
        let registry = InterceptorRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));

        let hits_in = Arc::clone(&hits);
        registry.register(EventFilter::Kind(EventKind::ConnectionReady), 0, move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
        });

        registry.dispatch(&ready_event());
        registry.dispatch(&reset_event());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn wildcard_sees_every_event() {
        let registry = InterceptorRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));

        let hits_in = Arc::clone(&hits);
        registry.register(EventFilter::Any, 0, move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
        });

        registry.dispatch(&ready_event());
        registry.dispatch(&reset_event());

        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn exact_handlers_run_before_wildcard_in_priority_order() {
        let registry = InterceptorRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let push = |label: &'static str, order: &Arc<StdMutex<Vec<&'static str>>>| {
            let order = Arc::clone(order);
            move |_: &ServerEvent| order.lock().unwrap().push(label)
        };

        // Registered out of order on purpose.
        registry.register(EventFilter::Any, 0, push("wild_p0", &order));
        registry.register(
            EventFilter::Kind(EventKind::ConnectionReady),
            5,
            push("exact_p5", &order),
        );
        registry.register(
            EventFilter::Kind(EventKind::ConnectionReady),
            1,
            push("exact_p1_a", &order),
        );
        registry.register(
            EventFilter::Kind(EventKind::ConnectionReady),
            1,
            push("exact_p1_b", &order),
        );
        registry.register(EventFilter::Any, -1, push("wild_m1", &order));

        registry.dispatch(&ready_event());

        assert_eq!(
            *order.lock().unwrap(),
            vec!["exact_p1_a", "exact_p1_b", "exact_p5", "wild_m1", "wild_p0"]
        );
    }

    #[test]
    fn panicking_handler_does_not_stop_the_chain() {
        let registry = InterceptorRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));

        registry.register(EventFilter::Kind(EventKind::ConnectionReady), 0, |_| {
            panic!("boom");
        });
        let hits_in = Arc::clone(&hits);
        registry.register(EventFilter::Kind(EventKind::ConnectionReady), 1, move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
        });

        registry.dispatch(&ready_event());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregister_is_noop_for_unknown_id() {
        let registry = InterceptorRegistry::new();
        let id = registry.register(EventFilter::Any, 0, |_| {});
        registry.unregister(id);
        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_can_unregister_itself_mid_dispatch() {
        let registry = InterceptorRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));

        let registry_in = registry.clone();
        let hits_in = Arc::clone(&hits);
        let id_slot: Arc<StdMutex<Option<InterceptorId>>> = Arc::new(StdMutex::new(None));
        let id_slot_in = Arc::clone(&id_slot);
        let id = registry.register(EventFilter::Any, 0, move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = *id_slot_in.lock().unwrap() {
                registry_in.unregister(id);
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        registry.dispatch(&ready_event());
        registry.dispatch(&ready_event());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn disabled_handler_is_skipped() {
        let registry = InterceptorRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));

        let hits_in = Arc::clone(&hits);
        let id = registry.register(EventFilter::Any, 0, move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
        });

        registry.set_enabled(id, false);
        registry.dispatch(&ready_event());
        registry.set_enabled(id, true);
        registry.dispatch(&ready_event());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
