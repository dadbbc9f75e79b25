//! Structured error types for the reactive core.
//!
//! Errors are layered per the framework's error taxonomy: programmer errors
//! (cycles, missing providers, setup-context misuse) panic with a stable
//! message rather than returning a `Result`, since a caller cannot usefully
//! recover from them; everything a caller *can* legitimately hit at runtime
//! (capacity limits, subscription bookkeeping, lock timeouts) is a typed
//! error returned here.

use std::any::TypeId;
use thiserror::Error;

use crate::derived::DerivedId;
use crate::signal::SignalId;

/// Result type alias for reactivity operations.
pub type Result<T> = std::result::Result<T, ReactivityError>;

/// Top-level error type for the reactive core.
#[derive(Error, Debug, Clone)]
pub enum ReactivityError {
    /// Signal-related errors.
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// Dependency-injection errors.
    #[error(transparent)]
    Injector(#[from] InjectorError),

    /// Runtime errors.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Setup-context errors.
    #[error(transparent)]
    Setup(#[from] SetupError),
}

/// Errors related to the setup-context stack ([`crate::setup`]).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// `current_host()` (the spec's "getCurrentComponent()") was called with
    /// no [`crate::setup::SetupHost`] active on this thread.
    #[error("getCurrentComponent() called outside setup()")]
    NoActiveHost,
}

/// Errors related to signal operations.
#[derive(Error, Debug, Clone)]
pub enum SignalError {
    /// Signal not found in runtime.
    #[error("Signal with ID {0:?} not found in runtime")]
    NotFound(SignalId),

    /// Type mismatch when accessing a signal.
    #[error("Type mismatch for signal {signal_id:?}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        signal_id: SignalId,
        expected: TypeId,
        actual: TypeId,
    },

    /// Subscription not found.
    #[error("Subscription with ID {0} not found")]
    SubscriptionNotFound(u64),

    /// Signal already disposed.
    #[error("Signal {0:?} has been disposed and cannot be accessed")]
    Disposed(SignalId),

    /// Circular dependency detected among signals.
    #[error("Circular dependency detected in signal graph involving {0:?}")]
    CircularDependency(SignalId),

    /// Circular dependency detected among derived values.
    #[error("Circular dependency detected in Derived({0:?}). Derived values cannot form dependency cycles.")]
    DerivedCircularDependency(DerivedId),

    /// Maximum subscribers exceeded.
    #[error("Maximum number of subscribers ({max}) exceeded for signal {signal_id:?}")]
    TooManySubscribers { signal_id: SignalId, max: usize },

    /// Maximum pending notifications exceeded.
    #[error("Maximum number of pending notifications ({max}) exceeded in batch mode")]
    TooManyPendingNotifications { max: usize },

    /// Deadlock detected (lock acquisition timeout).
    #[error("Potential deadlock detected in {resource}: failed to acquire lock within {timeout_secs} seconds. This likely indicates circular dependencies across threads.")]
    DeadlockDetected { resource: String, timeout_secs: u64 },
}

/// Errors related to the dependency injector.
#[derive(Error, Debug, Clone)]
pub enum InjectorError {
    /// No provider registered for the requested token, and it has no
    /// factory-on-first-use default.
    #[error("No provider for token {token}")]
    NoProvider { token: String },

    /// A provider factory transitively requested its own token while
    /// resolving it.
    #[error("Circular dependency detected while resolving token {token}")]
    CircularDependency { token: String },

    /// `inject()` was called outside of a setup-context scope.
    #[error("inject() called outside setup(): no active SetupHost on this thread")]
    NoActiveSetupHost,

    /// A provider factory panicked while constructing its value.
    #[error("Provider factory for token {token} failed: {message}")]
    FactoryFailed { token: String, message: String },
}

/// Errors related to runtime operations.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// Runtime already initialized.
    #[error("SignalRuntime already initialized")]
    AlreadyInitialized,

    /// Runtime not initialized.
    #[error("SignalRuntime not initialized")]
    NotInitialized,

    /// Memory limit exceeded.
    #[error("Memory limit exceeded: {current} bytes used, limit is {limit} bytes")]
    MemoryLimitExceeded { current: usize, limit: usize },

    /// Lock acquisition failed.
    #[error("Failed to acquire lock for {resource} after {attempts} attempts")]
    LockFailed { resource: String, attempts: usize },

    /// Internal consistency error.
    #[error("Internal consistency error: {0}")]
    Inconsistency(String),

    /// Counter overflow.
    #[error("Counter overflow: {counter_name} reached maximum value")]
    CounterOverflow { counter_name: String },

    /// The scheduler's cascade-redraw cap (`RuntimeConfig::max_cascade_redraws`)
    /// was hit: an effect chain kept re-triggering itself across that many
    /// flush passes without settling.
    #[error("Cascade redraw limit ({limit}) exceeded; an effect is likely re-triggering itself every flush")]
    CascadeLimitExceeded { limit: usize },
}

/// Extension trait adding context to `Result`s that convert into [`ReactivityError`].
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Convert error to a panic message with context.
    fn expect_reactivity(self, msg: &str) -> T;

    /// Unwrap or log the error.
    fn unwrap_or_log(self) -> Option<T>
    where
        Self: Sized;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ReactivityError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            ReactivityError::Runtime(RuntimeError::Inconsistency(format!(
                "{}: {}",
                msg.into(),
                base_error
            )))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let base_error = e.into();
            ReactivityError::Runtime(RuntimeError::Inconsistency(format!(
                "{}: {}",
                f(),
                base_error
            )))
        })
    }

    fn expect_reactivity(self, msg: &str) -> T {
        self.unwrap_or_else(|e| panic!("{}: {}", msg, e.into()))
    }

    fn unwrap_or_log(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("reactivity error: {}", e.into());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_error_display() {
        let error = SignalError::NotFound(SignalId::new());
        assert!(error.to_string().contains("not found"));
    }

    #[test]
    fn injector_error_display() {
        let error = InjectorError::NoProvider {
            token: "Logger".to_string(),
        };
        assert_eq!(error.to_string(), "No provider for token Logger");
    }

    #[test]
    fn runtime_error_display() {
        let error = RuntimeError::NotInitialized;
        assert!(error.to_string().contains("not initialized"));
    }

    #[test]
    fn error_conversion() {
        let signal_err = SignalError::NotFound(SignalId::new());
        let reactivity_err: ReactivityError = signal_err.into();
        assert!(matches!(reactivity_err, ReactivityError::Signal(_)));
    }

    #[test]
    fn result_context() {
        let result: std::result::Result<(), SignalError> =
            Err(SignalError::NotFound(SignalId::new()));

        let with_context = result.context("failed to get signal");
        assert!(with_context.is_err());
        let err_msg = with_context.unwrap_err().to_string();
        assert!(err_msg.contains("failed to get signal"));
    }

    #[test]
    fn too_many_subscribers_message() {
        let error = SignalError::TooManySubscribers {
            signal_id: SignalId::new(),
            max: 1000,
        };
        let msg = error.to_string();
        assert!(msg.contains("Maximum number of subscribers"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn cascade_limit_message() {
        let error = RuntimeError::CascadeLimitExceeded { limit: 1_000 };
        assert!(error.to_string().contains("Cascade redraw limit"));
    }
}
