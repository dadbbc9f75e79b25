//! The dependency injector: lazily-instantiated process-wide singletons.
//!
//! Two token kinds, per spec §4.3:
//! - a **class token**, keyed by `TypeId` and constructed with a caller-
//!   supplied `new`-equivalent factory (`Injectable::create`);
//! - an **opaque token** ([`Token<T>`]), named and carrying an optional
//!   default factory for non-class dependencies.
//!
//! Both share one cache and one in-progress set, so a class constructor and
//! an opaque token can each resolve the other circularly and still get
//! caught by [`InjectorError::CircularDependency`].

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::InjectorError;

/// A class-constructor token: any type with a zero-argument `new`-style
/// factory, used both as the injector's lookup key and as its own default
/// factory.
pub trait Injectable: Send + Sync + 'static {
    /// Construct the singleton instance (the class token's `new`).
    fn create() -> Self;
}

/// An opaque, non-class dependency token: a stable name plus an optional
/// default factory, used for interfaces / primitives that have no
/// constructor of their own.
pub struct Token<T: Send + Sync + 'static> {
    name: &'static str,
    key: TokenKey,
    default_factory: Option<Arc<dyn Fn() -> T + Send + Sync>>,
}

impl<T: Send + Sync + 'static> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            key: self.key,
            default_factory: self.default_factory.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token").field("name", &self.name).finish()
    }
}

impl<T: Send + Sync + 'static> Token<T> {
    /// Create a named opaque token with an optional default factory.
    pub fn new(name: &'static str, default_factory: Option<fn() -> T>) -> Self {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let ordinal = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self {
            name,
            key: TokenKey::Opaque(ordinal),
            default_factory: default_factory.map(|f| Arc::new(f) as Arc<dyn Fn() -> T + Send + Sync>),
        }
    }

    /// The token's display name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TokenKey {
    Class(TypeId),
    Opaque(u64),
}

struct CacheEntry {
    value: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct InjectorState {
    cache: HashMap<TokenKey, CacheEntry>,
    overrides: HashMap<TokenKey, Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>>,
    names: HashMap<TokenKey, String>,
    in_progress: HashSet<TokenKey>,
}

/// The global singleton registry.
pub struct Injector {
    state: Mutex<InjectorState>,
}

static INJECTOR: Lazy<Injector> = Lazy::new(|| Injector {
    state: Mutex::new(InjectorState::default()),
});

impl Injector {
    /// The process-wide injector instance.
    pub fn global() -> &'static Self {
        &INJECTOR
    }

    /// Resolve a class token to its singleton instance, constructing it via
    /// [`Injectable::create`] (or a registered override) on first use.
    ///
    /// # Panics
    ///
    /// Panics with a circular-dependency message if resolving `C` transitively
    /// requires resolving `C` again on this thread.
    pub fn resolve<C: Injectable>(&self) -> Arc<C> {
        let key = TokenKey::Class(TypeId::of::<C>());
        let name = std::any::type_name::<C>().to_string();
        self.resolve_with(key, name, C::create)
    }

    /// Resolve an opaque token, using its override (if provided via
    /// [`provide_token`](Injector::provide_token)) or its default factory.
    ///
    /// # Panics
    ///
    /// Panics with [`InjectorError::NoProvider`] if there is no override and
    /// no default factory; panics with [`InjectorError::CircularDependency`]
    /// on a same-thread resolution cycle.
    pub fn resolve_token<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Arc<T> {
        let name = token.name.to_string();
        if self.has_override(token.key) {
            return self.resolve_with(token.key, name, || unreachable!());
        }
        match &token.default_factory {
            Some(factory) => {
                let factory = Arc::clone(factory);
                self.resolve_with(token.key, name, move || factory())
            }
            None => panic!("{}", InjectorError::NoProvider { token: name }),
        }
    }

    fn has_override(&self, key: TokenKey) -> bool {
        self.state.lock().overrides.contains_key(&key)
    }

    fn resolve_with<T, F>(&self, key: TokenKey, name: String, default_factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        {
            let state = self.state.lock();
            if let Some(entry) = state.cache.get(&key) {
                return Arc::clone(
                    entry
                        .value
                        .downcast_ref::<Arc<T>>()
                        .expect("injector cache type mismatch: this is a framework bug"),
                );
            }
        }

        {
            let mut state = self.state.lock();
            if !state.in_progress.insert(key) {
                panic!(
                    "{}",
                    InjectorError::CircularDependency { token: name.clone() }
                );
            }
            state.names.insert(key, name.clone());
        }

        trace!(token = %name, "resolving dependency");

        let value: T = {
            let overridden = self.state.lock().overrides.get(&key).cloned();
            match overridden {
                Some(factory) => *factory()
                    .downcast::<T>()
                    .expect("injector override type mismatch: this is a framework bug"),
                None => default_factory(),
            }
        };

        let arc_value = Arc::new(value);

        {
            let mut state = self.state.lock();
            state.in_progress.remove(&key);
            state.cache.insert(
                key,
                CacheEntry {
                    value: Box::new(Arc::clone(&arc_value)),
                },
            );
        }

        debug!(token = %name, "resolved and cached dependency");
        arc_value
    }

    /// Provide an override factory for a class token. Clears any previously
    /// cached instance for that token so the next [`resolve`](Injector::resolve)
    /// call uses the new factory.
    pub fn provide<C: Injectable>(&self, factory: impl Fn() -> C + Send + Sync + 'static) {
        let key = TokenKey::Class(TypeId::of::<C>());
        self.provide_key(key, factory);
    }

    /// Provide an override factory for an opaque token. Clears any
    /// previously cached instance.
    pub fn provide_token<T: Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) {
        self.provide_key(token.key, factory);
    }

    fn provide_key<T: Send + Sync + 'static>(
        &self,
        key: TokenKey,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) {
        let mut state = self.state.lock();
        state.overrides.insert(
            key,
            Arc::new(move || Box::new(factory()) as Box<dyn Any + Send + Sync>),
        );
        state.cache.remove(&key);
    }

    /// Reset the injector: clears all cached instances, overrides and the
    /// in-progress set. Tests only.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cache.clear();
        state.overrides.clear();
        state.in_progress.clear();
        state.names.clear();
        debug!("injector reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Logger {
        id: u32,
    }

    static LOGGER_COUNTER: AtomicU32 = AtomicU32::new(0);

    impl Injectable for Logger {
        fn create() -> Self {
            Self {
                id: LOGGER_COUNTER.fetch_add(1, Ordering::SeqCst),
            }
        }
    }

    #[test]
    fn resolve_is_a_singleton() {
        Injector::global().reset();
        let a = Injector::global().resolve::<Logger>();
        let b = Injector::global().resolve::<Logger>();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn provide_then_provide_yields_latest() {
        Injector::global().reset();
        let token: Token<String> = Token::new("Greeting", None);
        Injector::global().provide_token(&token, || "hello".to_string());
        Injector::global().provide_token(&token, || "world".to_string());
        assert_eq!(*Injector::global().resolve_token(&token), "world");
    }

    #[test]
    fn opaque_token_uses_default_factory() {
        Injector::global().reset();
        let token: Token<i32> = Token::new("Answer", Some(|| 42));
        assert_eq!(*Injector::global().resolve_token(&token), 42);
    }

    #[test]
    #[should_panic(expected = "No provider for token")]
    fn opaque_token_without_factory_panics() {
        Injector::global().reset();
        let token: Token<i32> = Token::new("Unconfigured", None);
        let _ = Injector::global().resolve_token(&token);
    }

    #[test]
    fn reset_clears_cache() {
        Injector::global().reset();
        let a = Injector::global().resolve::<Logger>();
        Injector::global().reset();
        let b = Injector::global().resolve::<Logger>();
        assert_ne!(a.id, b.id);
    }
}
