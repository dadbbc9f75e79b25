//! `Effect`: a side-effectful subscriber that re-runs on a batched
//! microtask whenever any signal it read on its last run changes.
//!
//! Unlike [`crate::derived::Derived`], which is pull-evaluated, an effect is
//! push-scheduled: a dependency write enqueues the effect on the global
//! [`crate::scheduler::EffectScheduler`] rather than running it inline. This
//! is what gives batched writes their "runs once per drain" guarantee (spec
//! §4.1, §8 scenario 1).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::runtime::SignalRuntime;
use crate::scheduler::{EffectId, EffectPriority};
use crate::signal::{SignalId, SubscriptionId};

/// The return value of an effect runner: either nothing, or a cleanup
/// closure to run before the next execution and on disposal.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce() + Send>>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce() + Send>> {
        None
    }
}

impl<F: FnOnce() + Send + 'static> IntoCleanup for F {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce() + Send>> {
        Some(Box::new(self))
    }
}

/// `Box<dyn FnOnce() + Send>` cleanup callback, for effect runners that want
/// to return one without relying on the blanket [`IntoCleanup`] impl (e.g.
/// from an `Option<Box<dyn FnOnce() + Send>>` already in hand).
pub type CleanupFn = Box<dyn FnOnce() + Send>;

struct Subscribed {
    signal_id: SignalId,
    subscription_id: SubscriptionId,
}

struct Inner {
    id: EffectId,
    runner: Mutex<Box<dyn FnMut() -> Option<CleanupFn> + Send>>,
    cleanup: Mutex<Option<CleanupFn>>,
    dependencies: Mutex<Vec<Subscribed>>,
    disposed: AtomicBool,
}

/// A side-effectful observer of one or more signals.
///
/// ```rust,ignore
/// let name = Signal::new("Alice".to_string());
/// let _effect = Effect::new(move || {
///     println!("name is now {}", name.get());
///     None
/// });
/// name.set("Bob".to_string());
/// flush_effects(); // prints "name is now Bob"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl Effect {
    /// Create and immediately run an effect. If it is created while a
    /// [`crate::setup::SetupHost`] is active, its disposal is automatically
    /// appended to that host's disposer list (spec §4.1's context hook).
    pub fn new<F, C>(mut runner: F) -> Self
    where
        F: FnMut() -> C + Send + 'static,
        C: IntoCleanup,
    {
        let id = EffectId::new();
        let inner = Arc::new(Inner {
            id,
            // Boxed below once we know the concrete closure type.
            runner: Mutex::new(Box::new(move || runner().into_cleanup())),
            cleanup: Mutex::new(None),
            dependencies: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        crate::scheduler::EffectScheduler::global().register(
            move || {
                if let Some(inner) = weak.upgrade() {
                    Self::run_inner(&inner);
                }
            },
            EffectPriority::Normal,
            id,
        );

        Self::run_inner(&inner);

        let effect = Self { inner };
        crate::setup::register_cleanup_if_in_context({
            let effect = effect.clone();
            move || effect.dispose()
        });
        effect
    }

    fn run_inner(inner: &Arc<Inner>) {
        if inner.disposed.load(Ordering::Acquire) {
            return;
        }

        if let Some(prev_cleanup) = inner.cleanup.lock().take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(prev_cleanup)) {
                error!("Effect error: cleanup panicked: {:?}", payload);
            }
        }

        let (result, dependencies) = crate::tracking::track(|| {
            let mut runner = inner.runner.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (runner)()))
        });

        let new_cleanup = match result {
            Ok(cleanup) => cleanup,
            Err(payload) => {
                error!("Effect error: {:?}", payload);
                None
            }
        };
        *inner.cleanup.lock() = new_cleanup;

        let old_subs = std::mem::take(&mut *inner.dependencies.lock());
        for sub in old_subs {
            SignalRuntime::global().unsubscribe(sub.signal_id, sub.subscription_id);
        }

        let mut new_subs = Vec::with_capacity(dependencies.len());
        for dep_id in dependencies {
            let weak = Arc::downgrade(inner);
            let effect_id = inner.id;
            if let Ok(subscription_id) = SignalRuntime::global().subscribe(dep_id, move || {
                if weak.upgrade().is_some_and(|i| !i.disposed.load(Ordering::Acquire)) {
                    crate::scheduler::EffectScheduler::global().schedule(effect_id);
                }
            }) {
                new_subs.push(Subscribed {
                    signal_id: dep_id,
                    subscription_id,
                });
            }
        }
        *inner.dependencies.lock() = new_subs;

        trace!(effect_id = ?inner.id, "effect ran");
    }

    /// This effect's scheduler id.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Whether [`dispose`](Effect::dispose) has already run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Dispose the effect: run its last cleanup, unsubscribe from every
    /// dependency, and unregister it from the scheduler. Idempotent —
    /// pending microtask runs scheduled before dispose become no-ops.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(cleanup) = self.inner.cleanup.lock().take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                error!("Effect error: cleanup panicked during dispose: {:?}", payload);
            }
        }

        let subs = std::mem::take(&mut *self.inner.dependencies.lock());
        for sub in subs {
            SignalRuntime::global().unsubscribe(sub.signal_id, sub.subscription_id);
        }

        crate::scheduler::EffectScheduler::global().unregister(self.inner.id);
        trace!(effect_id = ?self.inner.id, "effect disposed");
    }
}

/// Flush the scheduler's currently pending effects, synchronously, once.
pub fn flush_effects() {
    crate::scheduler::EffectScheduler::global().flush();
}

/// Flush all pending reactive work synchronously, including any cascades
/// (effects that write signals scheduling further effects), up to
/// [`crate::runtime::RuntimeConfig::max_cascade_redraws`] re-drains. If the
/// cap is hit the run is reported via `tracing::error!` rather than looped
/// forever (spec §5's "must be reported rather than hang").
pub fn flush() {
    let limit = SignalRuntime::global().config().max_cascade_redraws;
    let scheduler = crate::scheduler::EffectScheduler::global();

    for _ in 0..limit {
        if !scheduler.has_pending() {
            return;
        }
        scheduler.flush();
    }

    if scheduler.has_pending() {
        error!(
            "{}",
            crate::error::RuntimeError::CascadeLimitExceeded { limit }
        );
        scheduler.clear();
    }
}
