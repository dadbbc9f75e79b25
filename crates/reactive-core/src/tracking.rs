//! Dynamic dependency tracking shared by [`crate::derived::Derived`] and
//! [`crate::effect::Effect`].
//!
//! Every signal read during a derived/effect computation is recorded into a
//! thread-local set; the computation's owner then replaces its dependency
//! set with exactly what was read on that run (the spec's "dynamic
//! dependency tracking" contract). [`untrack`] suspends recording for the
//! duration of a closure, which is how effects/derived values can read a
//! signal without subscribing to it, and how the component shell isolates
//! child setup from a parent's reactive computation.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::signal::SignalId;

#[derive(Debug, Default)]
struct Tracker {
    is_tracking: bool,
    dependencies: HashSet<SignalId>,
}

thread_local! {
    static TRACKER: RefCell<Tracker> = RefCell::new(Tracker::default());
}

/// Record a signal access for dependency tracking. Called by `Signal::get`.
pub(crate) fn record_read(signal_id: SignalId) {
    TRACKER.with(|tracker| {
        let mut tracker = tracker.borrow_mut();
        if tracker.is_tracking {
            tracker.dependencies.insert(signal_id);
        }
    });
}

/// Run `f`, collecting every signal it reads into a fresh dependency set.
///
/// Tracking scopes nest correctly: the outer scope's partially-recorded
/// dependency set is saved on entry and restored (not merged into) on exit,
/// so `f` gets its own empty set to fill and the outer computation resumes
/// exactly where it left off. This matters because reading a dirty
/// [`crate::derived::Derived`] inside an effect or another derived's
/// computation recomputes it via a nested `track()` call (`Derived::recompute`,
/// `Derived::track_dependencies`) — without saving/restoring the outer set,
/// that inner call would wipe out everything the outer computation had
/// already read.
pub(crate) fn track<F, R>(f: F) -> (R, HashSet<SignalId>)
where
    F: FnOnce() -> R,
{
    let (was_tracking, outer_dependencies) = TRACKER.with(|tracker| {
        let mut tracker = tracker.borrow_mut();
        let outer = std::mem::take(&mut tracker.dependencies);
        let was_tracking = std::mem::replace(&mut tracker.is_tracking, true);
        (was_tracking, outer)
    });

    let value = f();

    let dependencies = TRACKER.with(|tracker| {
        let mut tracker = tracker.borrow_mut();
        tracker.is_tracking = was_tracking;
        std::mem::replace(&mut tracker.dependencies, outer_dependencies)
    });

    (value, dependencies)
}

/// Run `f` without recording any signal reads it performs as dependencies
/// of the enclosing derived/effect computation. Grounds the spec's
/// `untrack()` combinator, and the component shell's isolation of child
/// setup from the parent's reactive scope.
pub fn untrack<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let was_tracking = TRACKER.with(|tracker| {
        let mut tracker = tracker.borrow_mut();
        std::mem::replace(&mut tracker.is_tracking, false)
    });

    let result = f();

    TRACKER.with(|tracker| {
        tracker.borrow_mut().is_tracking = was_tracking;
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_collects_reads() {
        let a = crate::signal::Signal::new(1);
        let b = crate::signal::Signal::new(2);
        let (sum, deps) = track(|| a.get() + b.get());
        assert_eq!(sum, 3);
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn untrack_suppresses_reads() {
        let a = crate::signal::Signal::new(1);
        let (_, deps) = track(|| {
            untrack(|| {
                a.get();
            });
        });
        assert!(deps.is_empty());
    }

    #[test]
    fn nested_track_does_not_clobber_the_outer_scopes_dependencies() {
        let outer_dep = crate::signal::Signal::new(1);
        let inner_dep = crate::signal::Signal::new(2);

        let (_, deps) = track(|| {
            outer_dep.get();
            let (_, inner_deps) = track(|| {
                inner_dep.get();
            });
            assert_eq!(inner_deps.len(), 1);
            assert!(inner_deps.contains(&inner_dep.id()));
        });

        assert_eq!(deps.len(), 1, "outer scope must still have its own read recorded");
        assert!(deps.contains(&outer_dep.id()));
    }
}
