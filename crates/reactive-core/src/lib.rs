//! Reactive core - signal-based reactivity for the viewer's template engine.
//!
//! This crate provides the reactive primitives a signal-based UI framework
//! is built on: mutable [`signal::Signal`], pull-evaluated
//! [`derived::Derived`] computations, push-scheduled [`effect::Effect`]
//! subscribers, a per-component [`setup::SetupHost`] context, a process-wide
//! dependency [`injector::Injector`], and a typed [`emitter::Emitter`].
//!
//! # Core Concepts
//!
//! ## Signals
//!
//! Reactive state holders with automatic change tracking:
//!
//! ```rust,ignore
//! use reactive_core::Signal;
//!
//! let count = Signal::new(0);
//! println!("Count: {}", count.get());
//! count.set(42); // Schedules subscribed effects
//! ```
//!
//! ## Derived
//!
//! Memoized computations that recompute lazily when a read dependency
//! changes:
//!
//! ```rust,ignore
//! use reactive_core::{Derived, Signal};
//!
//! let count = Signal::new(1);
//! let doubled = Derived::new(move || count.get() * 2);
//! assert_eq!(doubled.get(), 2);
//! ```
//!
//! ## Effect
//!
//! Side effects that re-run on the next flush after a dependency changes:
//!
//! ```rust,ignore
//! use reactive_core::{flush_effects, Effect, Signal};
//!
//! let count = Signal::new(0);
//! let _effect = Effect::new(move || {
//!     println!("count is now {}", count.get());
//! });
//! count.set(1);
//! flush_effects(); // prints "count is now 1"
//! ```
//!
//! # Thread Safety
//!
//! Every primitive here is `Send + Sync` and usable from any thread, even
//! though the framework's own usage is single-threaded per component tree:
//! - Signal values must be `Send`.
//! - Callbacks must be `Send` (`Send + Sync` where stored for re-entrant
//!   dispatch).
//! - Shared state is `Arc<parking_lot::Mutex<_>>` or `dashmap::DashMap`.

pub mod batch;
pub mod derived;
pub mod effect;
pub mod emitter;
pub mod equality;
pub mod error;
pub mod injector;
pub mod lifecycle;
pub mod reference;
pub mod runtime;
pub mod scheduler;
pub mod setup;
pub mod signal;
pub mod test_harness;
pub mod tracking;

// Signal core
pub use derived::{Derived, DerivedId};
pub use signal::{is_signal, AnySignal, Signal, SignalBrand, SignalId, SubscriptionId};
pub use tracking::untrack;

// Effects and scheduling
pub use effect::{flush, flush_effects, CleanupFn, Effect, IntoCleanup};
pub use scheduler::{EffectId, EffectPriority, EffectScheduler};

// Batching
pub use batch::{batch, is_batching, BatchGuard};

// Runtime
pub use runtime::{RuntimeConfig, SignalRuntime};

// Setup context / lifecycle
pub use lifecycle::{on_dispose, on_mount};
pub use setup::{current_host, has_context, run_with, try_current_host, SetupHost};

// Dependency injection
pub use injector::{Injectable, Injector, Token};

// Event emitter
pub use emitter::{Emitter, Event, SubscriberId};

// Element refs
pub use reference::{is_ref, AnyRef, Ref};

// Error types
pub use error::{
    InjectorError, ReactivityError, Result, ResultExt, RuntimeError, SetupError, SignalError,
};

// ============================================================================
// PRELUDE
// ============================================================================

/// Commonly used types and traits for reactive programming.
///
/// ```rust,ignore
/// use reactive_core::prelude::*;
/// ```
pub mod prelude {
    // Signal core
    pub use crate::{is_signal, untrack, Derived, Signal, SignalId};

    // Effects
    pub use crate::{flush, flush_effects, Effect};

    // Batching
    pub use crate::{batch, BatchGuard};

    // Setup context / lifecycle
    pub use crate::{current_host, has_context, on_dispose, on_mount, run_with, SetupHost};

    // Dependency injection
    pub use crate::{Injectable, Injector, Token};

    // Event emitter
    pub use crate::{Emitter, Event};

    // Element refs
    pub use crate::{is_ref, Ref};

    // Error types
    pub use crate::{ReactivityError, Result};
}
