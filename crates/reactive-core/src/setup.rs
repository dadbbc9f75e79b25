//! The setup context: a process-wide "current component" stack.
//!
//! While a component's setup function is running, a [`SetupHost`] is pushed
//! onto a thread-local stack. Other primitives — [`crate::effect::Effect`],
//! [`crate::emitter::Emitter`], the lifecycle helpers — consult
//! [`current_host`] to auto-register their disposer with whichever host is
//! active, so a component doesn't have to thread cleanup calls by hand.
//!
//! The stack is thread-local rather than global state behind a `Mutex`
//! because its push/pop discipline must be exactly one matched pair per
//! synchronous call to [`run_with`], including across a panic — a thread-
//! local `Vec` gives that via `Drop`-style unwind safety without needing a
//! lock at every push/pop.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::SetupError;

type Disposer = Box<dyn FnOnce() + Send>;

/// "Current component" during setup: an element handle plus an ordered list
/// of disposers run exactly once when the component unmounts.
pub struct SetupHost {
    disposers: Mutex<Vec<Disposer>>,
    post_mount: Mutex<Vec<Disposer>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SetupHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupHost")
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .field("disposer_count", &self.disposers.lock().len())
            .finish()
    }
}

impl SetupHost {
    /// Create a fresh host with no registered disposers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            disposers: Mutex::new(Vec::new()),
            post_mount: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Run `f` with `self` pushed onto the setup-context stack. The stack is
    /// guaranteed to be popped whether `f` returns normally or panics, so
    /// `has_context()` is `false` immediately after this call returns in
    /// either case.
    pub fn run<F, R>(self: &Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        STACK.with(|stack| stack.borrow_mut().push(Arc::clone(self)));
        trace!("setup host pushed");

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        trace!("setup host popped");

        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Register a cleanup callback, run once when this host is disposed (or
    /// immediately, with a warning, if the host is already disposed).
    pub fn on_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            warn!("on_cleanup registered on an already-disposed SetupHost; running immediately");
            f();
            return;
        }
        self.disposers.lock().push(Box::new(f));
    }

    /// Run every registered disposer exactly once, in registration order. A
    /// disposer that panics is caught and logged; later disposers still run.
    /// Calling this a second time is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            trace!("dispose() called on already-disposed SetupHost; no-op");
            return;
        }

        let disposers = std::mem::take(&mut *self.disposers.lock());
        debug!(count = disposers.len(), "disposing setup host");
        for disposer in disposers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(disposer)) {
                warn!("a disposer panicked during SetupHost::dispose; continuing");
                drop(payload);
            }
        }
    }

    /// Whether [`dispose`](SetupHost::dispose) has already run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Queue a callback to run once this component's template result has
    /// been mounted (spec §4.6 step 5), via [`crate::lifecycle::on_mount`].
    pub fn queue_post_mount<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_mount.lock().push(Box::new(f));
    }

    /// Run and clear every queued post-mount callback, in registration
    /// order. Called by the component shell immediately after mounting.
    pub fn drain_post_mount(&self) {
        let callbacks = std::mem::take(&mut *self.post_mount.lock());
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                warn!("a post-mount callback panicked; continuing");
                drop(payload);
            }
        }
    }
}

thread_local! {
    static STACK: RefCell<Vec<Arc<SetupHost>>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with `host` pushed onto the setup-context stack.
///
/// Equivalent to [`SetupHost::run`]; provided as a free function matching
/// the spec's "run-with" operation name.
pub fn run_with<F, R>(host: &Arc<SetupHost>, f: F) -> R
where
    F: FnOnce() -> R,
{
    host.run(f)
}

/// Whether a setup host is currently active on this thread.
pub fn has_context() -> bool {
    STACK.with(|stack| !stack.borrow().is_empty())
}

/// The currently active setup host.
///
/// # Panics
///
/// Panics with `getCurrentComponent() called outside setup()` if no host is
/// active — this is a programmer error per spec §7's error taxonomy, not a
/// recoverable condition.
pub fn current_host() -> Arc<SetupHost> {
    try_current_host().unwrap_or_else(|e| panic!("{e}"))
}

/// Fallible variant of [`current_host`], for callers (the injector, the
/// emitter) that want to degrade gracefully outside a setup scope instead of
/// panicking.
pub fn try_current_host() -> Result<Arc<SetupHost>, SetupError> {
    STACK.with(|stack| stack.borrow().last().cloned()).ok_or(SetupError::NoActiveHost)
}

/// Register `f` to run when the current host's effect auto-disposal hook is
/// consulted, i.e. "if an effect is created inside the current setup, here
/// is the disposer callback" (spec §9's cross-layer context hook seam).
/// A no-op outside a setup scope.
pub fn register_cleanup_if_in_context<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Ok(host) = try_current_host() {
        host.on_cleanup(f);
    }
}
