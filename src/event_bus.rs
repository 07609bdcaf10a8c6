//! Typed multi-subscriber event bus (§4.1).
//!
//! A single generic bus parameterized by each owner's event enum:
//! `ProcessManager`, `TerminalManager`, `TabManager` and `NativePtyBackend`
//! each declare their own event type implementing [`TypedEvent`] and get a
//! private `EventBus<TheirEvent>`.
//!
//! `on`/`off` use an opaque [`ListenerId`] handle returned by `on`/`once`,
//! passed back to `off` to remove that one subscription (see DESIGN.md).

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An event type an owner can emit. `Kind` identifies the event's *name*
/// (what you subscribe to); the value itself carries the payload.
pub trait TypedEvent: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Opaque subscription handle returned by `on`/`once`, passed to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<Ev> = Arc<dyn Fn(&Ev) + Send + Sync>;

struct Entry<Ev> {
    id: ListenerId,
    once: bool,
    listener: Listener<Ev>,
}

/// Typed publish/subscribe bus, synchronous and re-entrancy safe.
pub struct EventBus<Ev: TypedEvent> {
    listeners: Mutex<HashMap<Ev::Kind, Vec<Entry<Ev>>>>,
    next_id: AtomicU64,
}

impl<Ev: TypedEvent> EventBus<Ev> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, kind: Ev::Kind, once: bool, listener: Listener<Ev>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Append a listener for `kind`. Runs on every future `emit(kind, ..)`.
    pub fn on(&self, kind: Ev::Kind, listener: impl Fn(&Ev) + Send + Sync + 'static) -> ListenerId {
        self.register(kind, false, Arc::new(listener))
    }

    /// Append a self-removing listener: it detaches before its own invocation.
    pub fn once(
        &self,
        kind: Ev::Kind,
        listener: impl Fn(&Ev) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(kind, true, Arc::new(listener))
    }

    /// Remove the listener identified by `id` for `kind`, if still present.
    /// Takes effect on the *next* `emit`; an in-progress dispatch already
    /// holds its own snapshot of the listener list.
    pub fn off(&self, kind: Ev::Kind, id: ListenerId) {
        if let Some(entries) = self.listeners.lock().get_mut(&kind) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Drop one event's listeners, or all events' listeners if `kind` is `None`.
    pub fn remove_all(&self, kind: Option<Ev::Kind>) {
        match kind {
            Some(k) => {
                self.listeners.lock().remove(&k);
            }
            None => self.listeners.lock().clear(),
        }
    }

    pub fn listener_count(&self, kind: Ev::Kind) -> usize {
        self.listeners
            .lock()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every listener registered for `event.kind()`, in registration
    /// order, synchronously. `once` listeners detach before their own call.
    /// A panicking listener is caught and logged; the rest still run.
    pub fn emit(&self, event: Ev) {
        let kind = event.kind();
        let snapshot: Vec<Entry<Ev>> = {
            let mut guard = self.listeners.lock();
            match guard.get_mut(&kind) {
                Some(entries) => {
                    // Detach `once` listeners now, before any of them runs,
                    // so a listener that re-enters `emit` never sees them.
                    let (once, rest): (Vec<_>, Vec<_>) =
                        entries.drain(..).partition(|e| e.once);
                    *entries = rest;
                    once.into_iter()
                        .chain(entries.iter().map(|e| Entry {
                            id: e.id,
                            once: e.once,
                            listener: e.listener.clone(),
                        }))
                        .collect()
                }
                None => Vec::new(),
            }
        };

        for entry in snapshot {
            let listener = entry.listener.clone();
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                tracing::error!(listener = ?entry.id, %message, "event bus listener panicked");
            }
        }
    }
}

impl<Ev: TypedEvent> Default for EventBus<Ev> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct Counted(u32);

    impl TypedEvent for Counted {
        type Kind = ();
        fn kind(&self) -> Self::Kind {}
    }

    #[test]
    fn emits_in_registration_order() {
        let bus = EventBus::<Counted>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on((), move |e| o1.lock().push(("a", e.0)));
        let o2 = order.clone();
        bus.on((), move |e| o2.lock().push(("b", e.0)));

        bus.emit(Counted(1));
        assert_eq!(*order.lock(), vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn once_fires_exactly_once() {
        let bus = EventBus::<Counted>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.once((), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.listener_count(()), 1);
        bus.emit(Counted(1));
        bus.emit(Counted(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(()), 0);
    }

    #[test]
    fn off_removes_first_match_and_only_affects_next_emit() {
        let bus = EventBus::<Counted>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = bus.on((), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.off((), id);
        bus.emit(Counted(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_panic_is_isolated() {
        let bus = EventBus::<Counted>::new();
        bus.on((), |_| panic!("boom"));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.on((), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Counted(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_remove_itself_during_emit() {
        let bus = Arc::new(EventBus::<Counted>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let bus_for_listener = bus.clone();
        let calls_for_listener = calls.clone();
        // Register first, capture its own id via a cell filled right after.
        let id_cell: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let id_cell_for_listener = id_cell.clone();
        let id = bus.on((), move |_| {
            calls_for_listener.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell_for_listener.lock() {
                bus_for_listener.off((), id);
            }
        });
        *id_cell.lock() = Some(id);

        bus.emit(Counted(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Removal took effect for the *next* emit, not the one in progress.
        bus.emit(Counted(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_clears_one_or_every_kind() {
        let bus = EventBus::<Counted>::new();
        bus.on((), |_| {});
        assert_eq!(bus.listener_count(()), 1);
        bus.remove_all(Some(()));
        assert_eq!(bus.listener_count(()), 0);

        bus.on((), |_| {});
        bus.remove_all(None);
        assert_eq!(bus.listener_count(()), 0);
    }
}
