//! `Ref<E>`: an opaque element-handle container written by the template
//! engine's `ref="${r}"` binding when mounted, and cleared on dispose
//! (spec §4.5, data model §3).

use std::sync::Arc;

use parking_lot::Mutex;

/// A caller-created handle the template engine writes an element into on
/// mount. Generic over the element type `E` so the DOM crate can
/// instantiate `Ref<HtmlElement>` (or any other host node type) without
/// this crate depending on a concrete DOM binding.
pub struct Ref<E> {
    current: Arc<Mutex<Option<E>>>,
}

impl<E> Clone for Ref<E> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

impl<E> std::fmt::Debug for Ref<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("is_set", &self.current.lock().is_some())
            .finish()
    }
}

impl<E> Default for Ref<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Ref<E> {
    /// Create an empty ref.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// The referenced element, if the template engine has mounted one (and
    /// not yet disposed it).
    pub fn current(&self) -> Option<E>
    where
        E: Clone,
    {
        self.current.lock().clone()
    }

    /// Write the element into the ref. Called by the template engine's
    /// `ref="${r}"` binding on mount.
    pub fn set(&self, element: E) {
        *self.current.lock() = Some(element);
    }

    /// Restore `current` to `null`. Called by the template engine's
    /// `ref="${r}"` binding on dispose.
    pub fn clear(&self) {
        *self.current.lock() = None;
    }
}

/// Brand probe mirroring [`crate::signal::is_signal`]: lets the template
/// engine's slot dispatcher recognise a `Ref<E>` value without downcasting.
pub trait AnyRef {
    fn is_ref_marker(&self) -> bool {
        true
    }
}

impl<E> AnyRef for Ref<E> {}

/// Probe whether `value` is a [`Ref<E>`] via its brand.
pub fn is_ref<R: AnyRef>(value: &R) -> bool {
    value.is_ref_marker()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let r: Ref<i32> = Ref::new();
        assert_eq!(r.current(), None);
    }

    #[test]
    fn set_then_clear() {
        let r: Ref<i32> = Ref::new();
        r.set(42);
        assert_eq!(r.current(), Some(42));
        r.clear();
        assert_eq!(r.current(), None);
    }

    #[test]
    fn clone_shares_the_same_cell() {
        let r: Ref<i32> = Ref::new();
        let r2 = r.clone();
        r.set(7);
        assert_eq!(r2.current(), Some(7));
    }
}
