//! Test support for exercising the reactive core without a host DOM.
//!
//! The signal runtime is a process-wide singleton ([`crate::runtime::SignalRuntime::global`]),
//! so there is no way to truly reset it between tests short of `unsafe`
//! static replacement. [`with_fresh_runtime`] does not attempt that; instead
//! it documents the actual isolation guarantee tests rely on: every
//! [`crate::signal::Signal::new`] call mints a process-unique [`crate::signal::SignalId`],
//! so two tests never observe each other's signals even though they share
//! one underlying runtime. The name is kept because it is the contract
//! callers reason about ("this body gets signals nobody else can see"), not
//! because the runtime itself is torn down.

/// Run `f` in isolation from other tests' signal state.
///
/// See the module documentation for what "isolation" actually means here:
/// each signal created inside `f` gets a fresh id, so no test can observe
/// another test's signals, even though the backing runtime is shared.
pub fn with_fresh_runtime<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Run `f` inside a fresh root [`crate::setup::SetupHost`], disposing it
/// (and running its cleanups) when `f` returns.
pub fn with_setup_host<F, R>(f: F) -> R
where
    F: FnOnce(&crate::setup::SetupHost) -> R,
{
    let host = crate::setup::SetupHost::new();
    let result = host.run(|| f(&host));
    host.dispose();
    result
}
