//! `Derived<T>`: a cached function of signals with automatic dependency
//! tracking.
//!
//! A derived value is pull-evaluated: its compute function only re-runs when
//! [`get`](Derived::get) is called while it is dirty. Each re-run replaces
//! its dependency set with exactly the signals read during that run (the
//! dynamic-dependency-tracking contract), and its own subscribers are
//! notified only when the freshly computed value differs from the cached
//! one under the signal equality policy.

use crate::runtime::SignalRuntime;
use crate::setup::SetupHost;
use crate::signal::{Signal, SignalId, SubscriptionId};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

thread_local! {
    static COMPUTATION_STACK: RefCell<HashSet<DerivedId>> = RefCell::new(HashSet::new());
}

pub use crate::tracking::untrack;

/// Unique identifier for a derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivedId(u64);

impl DerivedId {
    /// # Panics
    ///
    /// Panics if `u64::MAX` derived values have been created (practically impossible).
    #[inline]
    pub fn new() -> Self {
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
            .expect("DerivedId counter overflow! Cannot create more derived values.");

        Self(id)
    }
}

impl Default for DerivedId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DerivedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Derived({})", self.0)
    }
}

type ComputeFn<T> = Box<dyn FnMut() -> T + Send + 'static>;

/// RAII: unsubscribes from a dependency signal when dropped.
struct StoredSubscription {
    signal_id: SignalId,
    subscription_id: SubscriptionId,
}

impl Drop for StoredSubscription {
    fn drop(&mut self) {
        SignalRuntime::global().unsubscribe(self.signal_id, self.subscription_id);
    }
}

struct DerivedInner<T> {
    id: DerivedId,
    compute_fn: Mutex<ComputeFn<T>>,
    cached_value: Signal<T>,
    dependencies: Mutex<HashSet<SignalId>>,
    subscriptions: Mutex<Vec<StoredSubscription>>,
    is_dirty: std::sync::atomic::AtomicBool,
}

impl<T> fmt::Debug for DerivedInner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedInner")
            .field("id", &self.id)
            .field("dependencies_count", &self.dependencies.lock().len())
            .field(
                "is_dirty",
                &self.is_dirty.load(std::sync::atomic::Ordering::Acquire),
            )
            .finish()
    }
}

/// A cached function of one or more signals.
///
/// ```rust,ignore
/// let width = Signal::new(10);
/// let height = Signal::new(5);
/// let area = Derived::new(move || width.get() * height.get());
/// assert_eq!(area.get(), 50);
/// width.set(20);
/// assert_eq!(area.get(), 100); // re-computed lazily on read
/// ```
///
/// # Cycle detection
///
/// A derived that transitively reads itself during its own computation
/// panics with "Circular dependency detected in Derived(...)". Detection is
/// thread-local, so cross-thread cycles are not caught here — see
/// [`crate::error::SignalError::DeadlockDetected`] for the lock-timeout
/// fallback that surfaces instead.
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create a new derived value. The compute function runs once
    /// immediately to establish the initial value and dependency set.
    pub fn new<F>(compute_fn: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let id = DerivedId::new();
        let mut compute_fn_boxed = Box::new(compute_fn);

        let (initial_value, dependencies) = Self::track_dependencies(&mut *compute_fn_boxed);

        debug!(derived_id = ?id, dependencies_count = dependencies.len(), "created derived value");

        let cached_value = Signal::new(initial_value);

        let inner = Arc::new(DerivedInner {
            id,
            compute_fn: Mutex::new(compute_fn_boxed),
            cached_value,
            dependencies: Mutex::new(dependencies.clone()),
            subscriptions: Mutex::new(Vec::new()),
            is_dirty: std::sync::atomic::AtomicBool::new(false),
        });

        let weak_inner = Arc::downgrade(&inner);
        let mut subscriptions = Vec::new();

        for &dep_id in &dependencies {
            let weak = weak_inner.clone();
            match SignalRuntime::global().subscribe(dep_id, move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .is_dirty
                        .store(true, std::sync::atomic::Ordering::Release);
                    trace!(derived_id = ?inner.id, "marked dirty");
                    inner.cached_value.notify_subscribers();
                }
            }) {
                Ok(sub_id) => subscriptions.push(StoredSubscription {
                    signal_id: dep_id,
                    subscription_id: sub_id,
                }),
                Err(e) => {
                    for stored_sub in subscriptions {
                        let signal_id = stored_sub.signal_id;
                        let sub_id = stored_sub.subscription_id;
                        std::mem::forget(stored_sub);
                        SignalRuntime::global().unsubscribe(signal_id, sub_id);
                    }
                    panic!("Failed to create Derived value: dependency subscription failed: {e}");
                }
            }
        }

        *inner.subscriptions.lock() = subscriptions;

        Self { inner }
    }

    /// Read the current value, re-computing first if dirty.
    ///
    /// # Panics
    ///
    /// Panics on same-thread circular dependency, or if a dependency lock
    /// cannot be acquired within five seconds (a deadlock heuristic for
    /// cross-thread cycles), or if the compute function itself panics (in
    /// which case the derived value remains dirty and will retry on the
    /// next read).
    pub fn get(&self) -> T {
        let is_cycle = COMPUTATION_STACK.with(|stack| !stack.borrow_mut().insert(self.inner.id));
        if is_cycle {
            panic!(
                "Circular dependency detected in {}. Derived values cannot form dependency cycles.",
                self.inner.id
            );
        }

        let was_dirty = self
            .inner
            .is_dirty
            .swap(false, std::sync::atomic::Ordering::AcqRel);

        if was_dirty {
            self.recompute();
        }

        // Tracked: an enclosing Effect/Derived computation must subscribe to
        // `cached_value`'s signal id, the same one `recompute` notifies on
        // change, or it never learns this derived's value changed.
        let value = self.inner.cached_value.get();

        COMPUTATION_STACK.with(|stack| {
            stack.borrow_mut().remove(&self.inner.id);
        });

        value
    }

    fn recompute(&self) {
        let (new_value, new_dependencies) = {
            let mut compute_fn = self
                .inner
                .compute_fn
                .try_lock_for(std::time::Duration::from_secs(5))
                .unwrap_or_else(|| {
                    panic!(
                        "Potential deadlock detected in Derived::compute_fn: failed to acquire \
                         lock within 5 seconds. This likely indicates circular dependencies \
                         across threads."
                    )
                });

            crate::tracking::track(|| (*compute_fn)())
        };

        // Signal::set skips notification when new_value == cached value,
        // which is exactly the "notify own subscribers only on change" rule.
        self.inner.cached_value.set(new_value);

        let mut deps = self
            .inner
            .dependencies
            .try_lock_for(std::time::Duration::from_secs(5))
            .unwrap_or_else(|| {
                panic!("Potential deadlock detected in Derived::dependencies: failed to acquire lock within 5 seconds.")
            });

        if *deps != new_dependencies {
            debug!(derived_id = ?self.inner.id, old_count = deps.len(), new_count = new_dependencies.len(), "dependencies changed");

            let old_subs = std::mem::take(
                &mut *self
                    .inner
                    .subscriptions
                    .try_lock_for(std::time::Duration::from_secs(5))
                    .unwrap_or_else(|| {
                        panic!("Potential deadlock detected in Derived::subscriptions: failed to acquire lock within 5 seconds.")
                    }),
            );
            for sub in old_subs {
                SignalRuntime::global().unsubscribe(sub.signal_id, sub.subscription_id);
            }

            let weak_inner = Arc::downgrade(&self.inner);
            let mut subscriptions = Vec::new();

            for &dep_id in &new_dependencies {
                let weak = weak_inner.clone();
                let sub_id = SignalRuntime::global()
                    .subscribe(dep_id, move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.is_dirty.store(true, std::sync::atomic::Ordering::Release);
                        }
                    })
                    .expect("Failed to subscribe to dependency: too many subscribers");

                subscriptions.push(StoredSubscription {
                    signal_id: dep_id,
                    subscription_id: sub_id,
                });
            }

            *self.inner.subscriptions.lock() = subscriptions;
            *deps = new_dependencies;
        }

        trace!(derived_id = ?self.inner.id, "recomputed");
    }

    fn track_dependencies<F>(compute_fn: &mut F) -> (T, HashSet<SignalId>)
    where
        F: FnMut() -> T,
    {
        crate::tracking::track(|| compute_fn())
    }

    /// Subscribe to changes in this derived value's cached output.
    #[must_use = "store the subscription id and unsubscribe, or use subscribe_scoped() instead"]
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId, crate::error::SignalError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.cached_value.subscribe(callback)
    }

    /// Subscribe with an RAII guard that unsubscribes on drop.
    pub fn subscribe_scoped<F>(
        &self,
        callback: F,
    ) -> Result<crate::signal::Subscription<T>, crate::error::SignalError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.cached_value.subscribe_scoped(callback)
    }

    /// This derived value's id.
    pub fn id(&self) -> DerivedId {
        self.inner.id
    }

    /// Whether the cached value is stale and will recompute on next read.
    pub fn is_dirty(&self) -> bool {
        self.inner
            .is_dirty
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Register disposal of this derived value's dependency subscriptions
    /// with a [`SetupHost`], so it stops recomputing once the owning
    /// component unmounts.
    pub fn owned(self, host: &SetupHost) -> Self {
        let inner = Arc::clone(&self.inner);
        host.on_cleanup(move || {
            let subs = std::mem::take(&mut *inner.subscriptions.lock());
            for sub in subs {
                SignalRuntime::global().unsubscribe(sub.signal_id, sub.subscription_id);
            }
        });
        self
    }
}

impl<T> crate::signal::AnySignal for Derived<T> {
    fn brand(&self) -> crate::signal::SignalBrand {
        crate::signal::SignalBrand::Derived
    }
}

impl<T> fmt::Debug for Derived<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn recomputes_lazily_on_read() {
        let count = Signal::new(10);
        let doubled = Derived::new(move || count.get() * 2);

        assert_eq!(doubled.get(), 20);
        count.set(5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn tracks_multiple_dependencies() {
        let width = Signal::new(10);
        let height = Signal::new(5);
        let area = Derived::new(move || width.get() * height.get());

        assert_eq!(area.get(), 50);
        width.set(20);
        assert_eq!(area.get(), 100);
        height.set(8);
        assert_eq!(area.get(), 160);
    }

    #[test]
    fn diamond_dependency_recomputes_once_per_read() {
        let x = Signal::new(2);
        let doubled = Derived::new(move || x.get() * 2);
        let doubled2 = doubled.clone();
        let sum = Derived::new(move || doubled.get() + doubled2.get());

        assert_eq!(sum.get(), 8);
        x.set(3);
        assert_eq!(sum.get(), 12);
    }

    #[test]
    fn chained_derived_propagates() {
        let x = Signal::new(2);
        let doubled = Derived::new(move || x.get() * 2);
        let quadrupled = Derived::new(move || doubled.get() * 2);

        assert_eq!(quadrupled.get(), 8);
        x.set(3);
        assert_eq!(quadrupled.get(), 12);
    }

    #[test]
    fn subscribers_notified_on_change() {
        let count = Signal::new(0);
        let doubled = Derived::new(move || count.get() * 2);

        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let _sub = doubled
            .subscribe_scoped(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("subscribe failed");

        count.set(1);
        count.set(2);
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn compute_fn_only_runs_when_dirty() {
        let count = Signal::new(0);
        let compute_count = Arc::new(AtomicU32::new(0));

        let c = compute_count.clone();
        let derived = Derived::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            count.get() * 2
        });

        assert_eq!(compute_count.load(Ordering::SeqCst), 1);

        let _ = derived.get();
        let _ = derived.get();
        assert_eq!(
            compute_count.load(Ordering::SeqCst),
            1,
            "reading an up-to-date derived value must not recompute"
        );

        count.set(5);
        let _ = derived.get();
        assert_eq!(compute_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "Circular dependency detected")]
    fn self_referential_derived_panics() {
        // A derived that reads its own cached signal during computation
        // manufactures a same-thread cycle through the computation stack.
        struct Cell(RefCell<Option<Derived<i32>>>);
        thread_local! {
            static SLOT: Cell = Cell(RefCell::new(None));
        }

        let d = Derived::new(|| SLOT.with(|s| s.0.borrow().as_ref().unwrap().get()) + 1);
        SLOT.with(|s| *s.0.borrow_mut() = Some(d.clone()));
        d.get();
    }
}
