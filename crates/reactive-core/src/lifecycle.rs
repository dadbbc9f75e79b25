//! Lifecycle helpers bound to the active [`crate::setup::SetupHost`].
//!
//! Both of these must be called during a component's setup function (spec
//! §6); calling them with no active host is a programmer error and panics
//! via [`crate::setup::current_host`].

use crate::setup::current_host;

/// Queue `f` to run once the enclosing template result has been mounted
/// into the DOM (step 5 of the component shell's mount sequence, §4.6).
/// The component shell drains each host's queue itself via
/// [`crate::setup::SetupHost::drain_post_mount`] — callbacks queued here are
/// per-host, so a child component mounted during a parent's own mount
/// cannot accidentally drain the parent's queue.
pub fn on_mount<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    current_host().queue_post_mount(f);
}

/// Register a cleanup callback to run when the enclosing component
/// unmounts. Equivalent to
/// `current_host().on_cleanup(f)`, provided under the spec's name.
pub fn on_dispose<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    current_host().on_cleanup(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::SetupHost;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn on_mount_runs_on_drain() {
        let host = SetupHost::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);

        host.run(|| {
            on_mount(move || r.store(true, Ordering::SeqCst));
        });
        assert!(!ran.load(Ordering::SeqCst));
        host.drain_post_mount();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn on_dispose_runs_when_host_disposes() {
        let host = SetupHost::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);

        host.run(|| {
            on_dispose(move || r.store(true, Ordering::SeqCst));
        });
        assert!(!ran.load(Ordering::SeqCst));
        host.dispose();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn nested_component_drain_does_not_consume_parent_queue() {
        let parent = SetupHost::new();
        let child = SetupHost::new();
        let parent_ran = Arc::new(AtomicBool::new(false));
        let child_ran = Arc::new(AtomicBool::new(false));

        let pr = Arc::clone(&parent_ran);
        parent.run(|| {
            on_mount(move || pr.store(true, Ordering::SeqCst));
        });

        let cr = Arc::clone(&child_ran);
        child.run(|| {
            on_mount(move || cr.store(true, Ordering::SeqCst));
        });
        child.drain_post_mount();

        assert!(child_ran.load(Ordering::SeqCst));
        assert!(!parent_ran.load(Ordering::SeqCst));

        parent.drain_post_mount();
        assert!(parent_ran.load(Ordering::SeqCst));
    }
}
