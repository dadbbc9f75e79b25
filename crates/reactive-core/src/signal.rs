//! The reactive cell: `Signal<T>`.
//!
//! `Signal<T>` is a lightweight, `Copy` handle (just an id) into data owned by
//! the global [`crate::runtime::SignalRuntime`]. Reads are tracked so that a
//! [`crate::derived::Derived`] or [`crate::effect::Effect`] running on the
//! same thread automatically picks up the signal as a dependency; writes
//! notify subscribers, skipping notification when the new value is equal to
//! the old one under the signal's equality policy (identity / `NaN`-equals-
//! `NaN`, never a deep comparison).

use std::marker::PhantomData;
use std::sync::Arc;

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    /// # Panics
    ///
    /// Panics if `u64::MAX` signals have been created (practically impossible).
    pub(crate) fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current >= u64::MAX - 1 {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .expect("SignalId counter overflow! Cannot create more signals.");

        Self(id)
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// # Panics
    ///
    /// Panics if `u64::MAX` subscriptions have been created (practically impossible).
    pub(crate) fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current >= u64::MAX - 1 {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .expect("SubscriptionId counter overflow! Cannot create more subscriptions.");

        Self(id)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a signal subscription. Unsubscribes on drop.
pub struct Subscription<T> {
    signal: Signal<T>,
    id: SubscriptionId,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.signal.unsubscribe(self.id);
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("signal_id", &self.signal.id())
            .field("subscription_id", &self.id)
            .finish()
    }
}

/// A mutable reactive cell.
///
/// `Signal<T>` is `Copy`: it is just an 8-byte id referencing data held by
/// the global runtime, so it can be freely moved into closures without an
/// explicit `.clone()`.
///
/// # Notification guarantee
///
/// [`set`](Signal::set), [`update`](Signal::update) and
/// [`update_mut`](Signal::update_mut) always run their write synchronously
/// and queue subscriber notification through [`crate::batch`] before
/// returning; notification is skipped when the new value is equal to the
/// previous one (identity / `NaN`-equals-`NaN` policy, see
/// [`crate::equality::signal_eq`]).
#[derive(Debug, Clone, Copy)]
pub struct Signal<T> {
    id: SignalId,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Signal<T> {
    /// Create a new signal with an initial value in the global runtime.
    pub fn new(initial: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let runtime = crate::runtime::SignalRuntime::global();
        let id = runtime.create_signal(initial);
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    /// Wrap an existing signal id. Used internally and by the test harness.
    #[doc(hidden)]
    pub fn new_from_id(id: SignalId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    fn runtime(&self) -> &'static crate::runtime::SignalRuntime {
        crate::runtime::SignalRuntime::global()
    }

    /// Read the current value, tracking this signal as a dependency of
    /// whichever [`crate::derived::Derived`] or [`crate::effect::Effect`] is
    /// currently computing on this thread (if any).
    ///
    /// # Panics
    ///
    /// Panics if the signal has been removed from the runtime, or on a type
    /// mismatch between the signal's stored type and `T` — both indicate a
    /// framework bug, never a caller error.
    pub fn get(&self) -> T
    where
        T: Clone + Send + 'static,
    {
        crate::tracking::record_read(self.id);
        self.runtime().get(self.id)
    }

    /// Read the current value without registering a dependency.
    ///
    /// Used by effect/derived bodies that intentionally want to peek at a
    /// signal outside their tracked set.
    pub fn get_untracked(&self) -> T
    where
        T: Clone + Send + 'static,
    {
        self.runtime().get(self.id)
    }

    /// Call `f` with a reference to the current value, tracking this signal
    /// as a dependency. Avoids a clone for types that are expensive to copy.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R
    where
        T: Send + 'static,
    {
        crate::tracking::record_read(self.id);
        self.runtime().with(self.id, f)
    }

    /// Replace the value. Subscribers are notified unless the new value
    /// equals the old one under the signal's equality policy.
    pub fn set(&self, value: T)
    where
        T: PartialEq + Send + 'static,
    {
        tracing::trace!(signal = ?self.id, "signal set");
        self.runtime().set(self.id, value);
    }

    /// Replace the value unconditionally (no equality check), forcing
    /// subscriber notification even if the computed value is unchanged.
    /// Used internally by [`crate::derived::Derived`] to propagate its dirty
    /// flag regardless of value equality.
    pub(crate) fn set_force(&self, value: T)
    where
        T: Send + 'static,
    {
        self.runtime().set_force(self.id, value);
    }

    /// Update the value from its current value. Useful when the next value
    /// depends on the previous one.
    pub fn update(&self, f: impl FnOnce(T) -> T)
    where
        T: Clone + PartialEq + Send + 'static,
    {
        self.runtime().update(self.id, f);
    }

    /// Update the value in place via a mutable reference.
    pub fn update_mut(&self, f: impl FnOnce(&mut T))
    where
        T: Clone + PartialEq + Send + 'static,
    {
        self.runtime().update_mut(self.id, f);
    }

    /// This signal's id.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Subscribe to changes with a callback. Returns an id that must be
    /// passed to [`unsubscribe`](Signal::unsubscribe), or prefer
    /// [`subscribe_scoped`](Signal::subscribe_scoped) for automatic cleanup.
    #[must_use = "store the subscription id and unsubscribe, or use subscribe_scoped() instead"]
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId, crate::error::SignalError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.runtime().subscribe(self.id, callback)
    }

    /// Subscribe with a guard that unsubscribes automatically on drop.
    pub fn subscribe_scoped<F>(
        self,
        callback: F,
    ) -> Result<Subscription<T>, crate::error::SignalError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.subscribe(callback)?;
        Ok(Subscription { signal: self, id })
    }

    /// Unsubscribe a callback previously registered with [`subscribe`](Signal::subscribe).
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.runtime().unsubscribe(self.id, id);
    }

    /// Force notification of all current subscribers without changing the
    /// value. Used by [`crate::derived::Derived`] to propagate dirtiness.
    pub(crate) fn notify_subscribers(&self) {
        self.runtime().notify_subscribers(self.id);
    }
}

/// Brand recognisable without an instance check, used by the template
/// engine's tagged-variant slot dispatch (spec §4.1's "query whether a
/// value is a signal"; §9's "untyped slot polymorphism").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalBrand {
    /// A plain [`Signal<T>`].
    Signal,
    /// A [`crate::derived::Derived<T>`].
    Derived,
}

/// Implemented by [`Signal<T>`] and [`crate::derived::Derived<T>`] so
/// type-erased callers (the template engine's slot dispatcher) can ask "is
/// this a signal?" without downcasting through `Any`.
pub trait AnySignal {
    /// This value's reactive brand.
    fn brand(&self) -> SignalBrand;
}

impl<T> AnySignal for Signal<T> {
    fn brand(&self) -> SignalBrand {
        SignalBrand::Signal
    }
}

/// Probe whether `value` is signal-like (a [`Signal<T>`] or
/// [`crate::derived::Derived<T>`]) via its brand, per spec §4.1's
/// `is_signal` primitive.
pub fn is_signal<S: AnySignal>(value: &S) -> bool {
    matches!(value.brand(), SignalBrand::Signal | SignalBrand::Derived)
}

/// Subscribe to a signal with a callback that also fires immediately with
/// the current value, per spec §4.1. Returns an unsubscribe closure rather
/// than requiring the caller to hold a [`SubscriptionId`].
pub fn subscribe<T, F>(signal: Signal<T>, callback: F) -> impl FnOnce() + Send
where
    T: Clone + PartialEq + Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    callback(signal.get_untracked());
    let callback = Arc::new(callback);
    let cb = Arc::clone(&callback);
    let id = signal
        .subscribe(move || cb(signal.get_untracked()))
        .expect("subscribe: too many subscribers for this signal");
    move || signal.unsubscribe(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::with_fresh_runtime;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn get_set_roundtrip() {
        with_fresh_runtime(|| {
            let signal = Signal::new(0);
            assert_eq!(signal.get(), 0);
            signal.set(42);
            assert_eq!(signal.get(), 42);
        });
    }

    #[test]
    fn update_uses_current_value() {
        with_fresh_runtime(|| {
            let signal = Signal::new(1);
            signal.update(|n| n + 1);
            assert_eq!(signal.get(), 2);
            signal.update(|n| n * 10);
            assert_eq!(signal.get(), 20);
        });
    }

    #[test]
    fn signal_is_copy() {
        with_fresh_runtime(|| {
            let signal1 = Signal::new(0);
            let signal2 = signal1;
            signal1.set(42);
            assert_eq!(signal2.get(), 42);
        });
    }

    #[test]
    fn subscribers_are_notified_on_set() {
        with_fresh_runtime(|| {
            let signal = Signal::new(0);
            let calls = Arc::new(Mutex::new(0));
            let c = Arc::clone(&calls);
            let _id = signal.subscribe(move || *c.lock() += 1);

            signal.set(1);
            assert_eq!(*calls.lock(), 1);
            signal.set(2);
            assert_eq!(*calls.lock(), 2);
        });
    }

    #[test]
    fn equal_value_does_not_notify() {
        with_fresh_runtime(|| {
            let signal = Signal::new(5);
            let calls = Arc::new(Mutex::new(0));
            let c = Arc::clone(&calls);
            let _id = signal.subscribe(move || *c.lock() += 1);

            signal.set(5);
            assert_eq!(*calls.lock(), 0, "writing an equal value must not notify");
        });
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        with_fresh_runtime(|| {
            let signal = Signal::new(0);
            let calls = Arc::new(Mutex::new(0));
            let c = Arc::clone(&calls);
            let id = signal.subscribe(move || *c.lock() += 1).unwrap();

            signal.set(1);
            assert_eq!(*calls.lock(), 1);
            signal.unsubscribe(id);
            signal.set(2);
            assert_eq!(*calls.lock(), 1);
        });
    }

    #[test]
    fn subscribe_scoped_unsubscribes_on_drop() {
        with_fresh_runtime(|| {
            let signal = Signal::new(0);
            let calls = Arc::new(Mutex::new(0));
            let c = Arc::clone(&calls);
            {
                let _sub = signal.subscribe_scoped(move || *c.lock() += 1);
                signal.set(1);
                assert_eq!(*calls.lock(), 1);
            }
            signal.set(2);
            assert_eq!(*calls.lock(), 1);
        });
    }

    #[test]
    fn multiple_subscribers_all_run() {
        with_fresh_runtime(|| {
            let signal = Signal::new(0);
            let log = Arc::new(Mutex::new(Vec::new()));

            let l1 = Arc::clone(&log);
            let _id1 = signal.subscribe(move || l1.lock().push(1));
            let l2 = Arc::clone(&log);
            let _id2 = signal.subscribe(move || l2.lock().push(2));
            let l3 = Arc::clone(&log);
            let _id3 = signal.subscribe(move || l3.lock().push(3));

            signal.set(42);
            assert_eq!(log.lock().len(), 3);
        });
    }
}
