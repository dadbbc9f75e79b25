//! `Emitter`: synchronous typed pub/sub with auto-cleanup inside a setup
//! context.
//!
//! A subclass declares its event map as a Rust enum implementing [`Event`];
//! [`Emitter<E>`] dispatches by [`Event::kind`] so subscribers only see the
//! variant(s) they asked for. Matches spec §4.4: subscribers run
//! synchronously in subscription order against a snapshot (so removal
//! during emission can't skip or double-fire a sibling), a subscriber that
//! throws is isolated and logged, and `subscribe` auto-registers its
//! unsubscribe with the active [`crate::setup::SetupHost`] if one exists.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::signal::Signal;

/// An event type belonging to one emitter's event map. `kind` is the
/// dispatch key (the event "name"); distinct variants may carry distinct
/// payload shapes while still living in one enum.
pub trait Event: Clone + Send + Sync + 'static {
    /// The discriminant subscribers register against.
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    /// This event's discriminant.
    fn kind(&self) -> Self::Kind;
}

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Base pub/sub type. Application event emitters hold one of these per
/// concrete [`Event`] type (commonly wrapped as `MyEmitter(Emitter<MyEvent>)`
/// with inherent methods delegating to it, matching a typed subclass).
pub struct Emitter<E: Event> {
    subscribers: Mutex<HashMap<E::Kind, Vec<(SubscriberId, Subscriber<E>)>>>,
    label: &'static str,
}

impl<E: Event> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("label", &self.label).finish()
    }
}

impl<E: Event> Default for Emitter<E> {
    fn default() -> Self {
        Self::new("Emitter")
    }
}

impl<E: Event> Emitter<E> {
    /// Create an emitter. `label` is used in the caught-error log prefix
    /// (spec §7: `Emitter: subscriber for 'X' threw:`), so pass the
    /// subclass's name.
    pub fn new(label: &'static str) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            label,
        }
    }

    /// Emit an event. Every subscriber registered for its kind is called
    /// synchronously, in subscription order, against a snapshot taken
    /// before the first call — so a subscriber that unsubscribes itself or
    /// a sibling during emission cannot skip or double-fire anyone.
    /// Re-entrant emits during a callback are allowed and run depth-first.
    pub fn emit(&self, event: E) {
        let kind = event.kind();
        let snapshot: Vec<Subscriber<E>> = {
            let subs = self.subscribers.lock();
            subs.get(&kind)
                .map(|v| v.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        for callback in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                error!(
                    "Emitter: subscriber for '{}' threw: {:?}",
                    self.label, payload
                );
            }
        }
    }

    /// Subscribe to events of one kind. Returns an unsubscribe closure. If a
    /// [`crate::setup::SetupHost`] is active at subscription time, the
    /// unsubscribe is also registered as one of its disposers automatically.
    pub fn subscribe<F>(self: &Arc<Self>, kind: E::Kind, callback: F) -> impl FnOnce() + Send
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        let this = Arc::clone(self);
        let unsubscribe = move || {
            if let Some(subs) = this.subscribers.lock().get_mut(&kind) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        };

        crate::setup::register_cleanup_if_in_context({
            let this = Arc::clone(self);
            move || {
                if let Some(subs) = this.subscribers.lock().get_mut(&kind) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                }
            }
        });

        unsubscribe
    }

    /// Bridge events of `kind` to a [`Signal<T>`]: `selector` maps each
    /// matching event to the signal's new value. The returned signal starts
    /// at `initial` and updates on every matching emission.
    pub fn to_signal<T, F>(self: &Arc<Self>, kind: E::Kind, initial: T, selector: F) -> Signal<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&E) -> T + Send + Sync + 'static,
    {
        let signal = Signal::new(initial);
        let _ = self.subscribe(kind, move |event| signal.set(selector(event)));
        signal
    }

    /// Remove every subscriber. Tests only.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Created,
        Deleted,
    }

    #[derive(Debug, Clone)]
    enum TaskEvent {
        Created(u32),
        Deleted(u32),
    }

    impl Event for TaskEvent {
        type Kind = Kind;
        fn kind(&self) -> Kind {
            match self {
                TaskEvent::Created(_) => Kind::Created,
                TaskEvent::Deleted(_) => Kind::Deleted,
            }
        }
    }

    #[test]
    fn subscribers_called_in_order() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let l1 = Arc::clone(&log);
        let _u1 = emitter.subscribe(Kind::Created, move |_| l1.lock().push(1));
        let l2 = Arc::clone(&log);
        let _u2 = emitter.subscribe(Kind::Created, move |_| l2.lock().push(2));

        emitter.emit(TaskEvent::Created(1));
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn only_matching_kind_is_notified() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let _u = emitter.subscribe(Kind::Deleted, move |_| *c.lock() += 1);

        emitter.emit(TaskEvent::Created(1));
        assert_eq!(*calls.lock(), 0);
        emitter.emit(TaskEvent::Deleted(1));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let unsubscribe = emitter.subscribe(Kind::Created, move |_| *c.lock() += 1);

        emitter.emit(TaskEvent::Created(1));
        unsubscribe();
        emitter.emit(TaskEvent::Created(2));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn a_throwing_subscriber_does_not_skip_siblings() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let _u1 = emitter.subscribe(Kind::Created, |_| panic!("boom"));
        let l2 = Arc::clone(&log);
        let _u2 = emitter.subscribe(Kind::Created, move |_| l2.lock().push("ran"));

        emitter.emit(TaskEvent::Created(1));
        assert_eq!(*log.lock(), vec!["ran"]);
    }

    #[test]
    fn to_signal_tracks_latest_payload() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let signal = emitter.to_signal(Kind::Created, 0u32, |event| match event {
            TaskEvent::Created(id) => *id,
            TaskEvent::Deleted(id) => *id,
        });

        assert_eq!(signal.get(), 0);
        emitter.emit(TaskEvent::Created(7));
        assert_eq!(signal.get(), 7);
    }

    #[test]
    fn clear_removes_all_subscribers() {
        let emitter = Arc::new(Emitter::<TaskEvent>::new("TaskEmitter"));
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let _u = emitter.subscribe(Kind::Created, move |_| *c.lock() += 1);
        emitter.clear();
        emitter.emit(TaskEvent::Created(1));
        assert_eq!(*calls.lock(), 0);
    }
}
