//! The component shell (spec §4.6): a registered setup function mounted as
//! a fresh host-then-template instance, with typed props and a host-level
//! class binding.
//!
//! Real custom-element lifecycle — `customElements.define`, a
//! `connectedCallback`/`disconnectedCallback` pair the browser invokes on its
//! own schedule — can't be authored or exercised without running the wasm
//! toolchain. This is a disclosed simplification, not a silent deviation
//! (see `DESIGN.md`): "mount" here is [`ComponentBuilder::mount`]'s own
//! synchronous call standing in for `connectedCallback`, and "unmount" is
//! [`ComponentHandle::dispose`] standing in for `disconnectedCallback`. Every
//! other step of the sequence below — untracked setup, a fresh
//! [`SetupHost`], queued post-mount callbacks, panic-contained setup and
//! error-renderer fallback, reverse-of-registration... — follows the spec
//! exactly.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use send_wrapper::SendWrapper;
use tracing::{error, warn};

use reactive_core::{untrack, Effect, Signal, SetupHost};

use crate::error::{DomError, Result as DomResult};
use crate::node::GenericNode;
use crate::template::{Reactive, TemplateResult};

// ---------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------

/// A mounted component instance's lazily-created prop signals (spec §3's
/// `PropsProxy`): reading a name returns its backing signal, creating it
/// (seeded with `T::default()`) on first access.
pub struct PropsProxy {
    values: Mutex<HashMap<&'static str, Box<dyn Any + Send>>>,
}

impl std::fmt::Debug for PropsProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropsProxy").field("prop_count", &self.values.lock().len()).finish()
    }
}

impl Default for PropsProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl PropsProxy {
    pub fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()) }
    }

    /// Read the signal backing `name`, creating it with `T::default()` if
    /// this is the first access.
    ///
    /// # Panics
    ///
    /// If `name` was previously created (by [`get`](Self::get) or
    /// [`set`](Self::set)) at a different `T` — a component author mismatch,
    /// not a recoverable condition.
    pub fn get<T: Clone + Default + Send + 'static>(&self, name: &'static str) -> Signal<T> {
        let mut values = self.values.lock();
        let entry = values.entry(name).or_insert_with(|| Box::new(Signal::new(T::default())) as Box<dyn Any + Send>);
        *entry
            .downcast_ref::<Signal<T>>()
            .unwrap_or_else(|| panic!("PropsProxy: prop '{name}' read at a type other than it was created with"))
    }

    /// Write `value` into the signal backing `name`, creating it if absent.
    pub fn set<T: Clone + Send + 'static>(&self, name: &'static str, value: T) {
        let mut values = self.values.lock();
        match values.get(name) {
            Some(existing) => {
                let signal = existing
                    .downcast_ref::<Signal<T>>()
                    .unwrap_or_else(|| panic!("PropsProxy: prop '{name}' written at a type other than it was created with"));
                signal.set(value);
            }
            None => {
                values.insert(name, Box::new(Signal::new(value)));
            }
        }
    }
}

/// A value handed to [`ComponentBuilder::prop`]: either a plain value
/// (forwarded once) or a `Signal<T>` (subscribed, so later writes propagate
/// into the child's own prop signal) — spec §4.6 "the factory form accepts
/// either raw values or signals for each prop".
pub enum PropSource<T> {
    Value(T),
    Signal(Signal<T>),
}

/// Marker trait preventing the blanket `From<T>` impl below from overlapping
/// with `From<Signal<T>>` (mirrors [`crate::template::ReactiveLeaf`]).
pub trait PropLeaf {}
impl PropLeaf for String {}
impl PropLeaf for bool {}
impl PropLeaf for i64 {}
impl PropLeaf for f64 {}

impl<T: PropLeaf> From<T> for PropSource<T> {
    fn from(value: T) -> Self {
        PropSource::Value(value)
    }
}

impl From<&str> for PropSource<String> {
    fn from(value: &str) -> Self {
        PropSource::Value(value.to_string())
    }
}

impl<T> From<Signal<T>> for PropSource<T> {
    fn from(signal: Signal<T>) -> Self {
        PropSource::Signal(signal)
    }
}

type PropSetter = Box<dyn FnOnce(&Arc<PropsProxy>) -> Option<Effect> + Send>;

// ---------------------------------------------------------------------
// Definition and builder
// ---------------------------------------------------------------------

type SetupFn<N> = dyn Fn(&PropsProxy, &N) -> TemplateResult<N> + Send + Sync;
type ErrorRenderer<N> = dyn Fn(&str) -> TemplateResult<N> + Send + Sync;

static REGISTERED_TAGS: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// A registered component: tag name, setup function, optional error
/// renderer (spec §3's `ComponentDef`). Cloning shares the same setup
/// closure; building several [`ComponentBuilder`]s from one `ComponentDef`
/// is how one definition produces many instances.
pub struct ComponentDef<N: GenericNode> {
    tag: &'static str,
    setup: Arc<SetupFn<N>>,
    error_renderer: Option<Arc<ErrorRenderer<N>>>,
}

impl<N: GenericNode> Clone for ComponentDef<N> {
    fn clone(&self) -> Self {
        Self {
            tag: self.tag,
            setup: Arc::clone(&self.setup),
            error_renderer: self.error_renderer.clone(),
        }
    }
}

impl<N: GenericNode> std::fmt::Debug for ComponentDef<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDef").field("tag", &self.tag).finish()
    }
}

impl<N: GenericNode> ComponentDef<N> {
    /// Register `tag` with a setup function: given the instance's props
    /// proxy and host element, it runs inside a fresh setup context and
    /// returns the template to mount (spec §4.6).
    pub fn new<F>(tag: &'static str, setup: F) -> Self
    where
        F: Fn(&PropsProxy, &N) -> TemplateResult<N> + Send + Sync + 'static,
    {
        Self { tag, setup: Arc::new(setup), error_renderer: None }
    }

    /// Attach a fallback renderer invoked (with the panic message) when
    /// setup fails, instead of the default inline error marker.
    #[must_use]
    pub fn with_error_renderer<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&str) -> TemplateResult<N> + Send + Sync + 'static,
    {
        self.error_renderer = Some(Arc::new(renderer));
        self
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Record this definition's tag as registered, failing if `tag` was
    /// already registered — the Rust-side analogue of the host runtime's
    /// real `customElements.define` rejecting a duplicate. Looking a tag
    /// back up to a `ComponentDef` is the host registry's job (this crate's
    /// abstract [`GenericNode`] doesn't model `customElements`, so nothing
    /// here resolves a bare tag string back to a Rust value).
    pub fn register(self) -> DomResult<Self> {
        let mut tags = REGISTERED_TAGS.lock();
        if !tags.insert(self.tag) {
            return Err(DomError::DuplicateComponent(self.tag.to_string()));
        }
        Ok(self)
    }

    /// Start building a mountable instance of this definition (spec §4.5's
    /// "Factory result").
    pub fn build(&self) -> ComponentBuilder<N> {
        ComponentBuilder {
            tag: self.tag,
            setup: Arc::clone(&self.setup),
            error_renderer: self.error_renderer.clone(),
            props: Vec::new(),
            host_class: Reactive::Static(Vec::new()),
        }
    }
}

/// Accumulates prop forwarding and host-level class before mounting one
/// instance (spec §4.6 "Props handling").
pub struct ComponentBuilder<N: GenericNode> {
    tag: &'static str,
    setup: Arc<SetupFn<N>>,
    error_renderer: Option<Arc<ErrorRenderer<N>>>,
    props: Vec<PropSetter>,
    host_class: Reactive<Vec<String>>,
}

impl<N: GenericNode> ComponentBuilder<N> {
    /// Forward a value or signal under `name`. A plain value is wrapped
    /// into the child's prop signal once; a `Signal<T>` is subscribed so
    /// later writes to it propagate into the child's prop signal for the
    /// lifetime of this instance.
    #[must_use]
    pub fn prop<T, S>(mut self, name: &'static str, source: S) -> Self
    where
        T: Clone + Send + 'static,
        S: Into<PropSource<T>>,
    {
        let source = source.into();
        self.props.push(Box::new(move |props: &Arc<PropsProxy>| match source {
            PropSource::Value(value) => {
                props.set(name, value);
                None
            }
            PropSource::Signal(signal) => {
                let props = Arc::clone(props);
                Some(Effect::new(move || props.set(name, signal.get())))
            }
        }));
        self
    }

    /// Host-level `class` (spec §4.6: "applied by add/remove on the host's
    /// class list, independent of any `class:` directives the child uses
    /// internally").
    #[must_use]
    pub fn host_class(mut self, classes: impl Into<Reactive<Vec<String>>>) -> Self {
        self.host_class = classes.into();
        self
    }

    /// Create a fresh `<tag>` element as this instance's host and run the
    /// mount sequence — the common case of a component used as a template
    /// slot's factory result.
    pub fn mount(self) -> ComponentHandle<N> {
        let element = N::create_element(self.tag);
        ComponentHandle::mount(self.tag, element, self.setup, self.error_renderer, self.props, self.host_class)
    }

    /// Run the mount sequence against an already-existing host element,
    /// instead of creating one — for a top-level component attached to a
    /// node the application obtained directly from the host document.
    pub fn mount_onto(self, element: N) -> ComponentHandle<N> {
        ComponentHandle::mount(self.tag, element, self.setup, self.error_renderer, self.props, self.host_class)
    }
}

// ---------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------

struct ComponentInner<N: GenericNode> {
    element: N,
    host: Arc<SetupHost>,
    template: Mutex<Option<TemplateResult<N>>>,
    prop_effects: Mutex<Vec<Effect>>,
    host_class_effect: Mutex<Option<Effect>>,
    disposed: AtomicBool,
}

/// A live, mounted component instance (spec §3's mount/unmount contract).
/// Cheap to clone — clones share the same instance and its teardown.
pub struct ComponentHandle<N: GenericNode> {
    inner: Arc<ComponentInner<N>>,
}

impl<N: GenericNode> Clone for ComponentHandle<N> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<N: GenericNode> std::fmt::Debug for ComponentHandle<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn bind_host_class<N: GenericNode>(el: N, reactive: Reactive<Vec<String>>) -> Option<Effect> {
    let managed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let apply = {
        let el = SendWrapper::new(el);
        let managed = Arc::clone(&managed);
        move |new: Vec<String>| {
            let mut previous = managed.lock();
            for old in previous.iter() {
                if !new.contains(old) {
                    el.remove_class(old);
                }
            }
            for name in &new {
                el.add_class(name);
            }
            *previous = new;
        }
    };

    match reactive {
        Reactive::Static(value) => {
            apply(value);
            None
        }
        Reactive::Dynamic(accessor) => Some(Effect::new(move || apply(accessor()))),
    }
}

/// Render the configured error renderer if present (itself panic-guarded,
/// spec §4.6 step 6: "may itself throw, in which case the default is
/// used"), otherwise a visible inline marker comment.
fn render_fallback<N: GenericNode>(error_renderer: &Option<Arc<ErrorRenderer<N>>>, message: &str) -> TemplateResult<N> {
    if let Some(renderer) = error_renderer {
        let renderer = Arc::clone(renderer);
        let message = message.to_string();
        match panic::catch_unwind(AssertUnwindSafe(move || renderer(&message))) {
            Ok(result) => return result,
            Err(payload) => {
                warn!("component error renderer itself panicked; using the default fallback");
                drop(payload);
            }
        }
    }
    TemplateResult::from_root(N::create_comment(&format!("component error: {message}")))
}

impl<N: GenericNode> ComponentHandle<N> {
    fn mount(
        tag: &'static str,
        element: N,
        setup: Arc<SetupFn<N>>,
        error_renderer: Option<Arc<ErrorRenderer<N>>>,
        prop_setters: Vec<PropSetter>,
        host_class: Reactive<Vec<String>>,
    ) -> Self {
        let props = Arc::new(PropsProxy::new());
        let prop_effects: Vec<Effect> = prop_setters.into_iter().filter_map(|setter| setter(&props)).collect();
        let host_class_effect = bind_host_class(element.clone(), host_class);

        let host = SetupHost::new();
        let setup_for_run = Arc::clone(&setup);
        let props_for_run = Arc::clone(&props);
        let element_for_run = element.clone();
        let host_for_run = Arc::clone(&host);

        // Step 1: run untracked so a parent effect synchronously mounting us
        // doesn't pick up our internal signal reads as its own dependency
        // (spec §5 "reactive isolation").
        let outcome = untrack(move || {
            panic::catch_unwind(AssertUnwindSafe(move || {
                host_for_run.run(move || (setup_for_run)(&props_for_run, &element_for_run))
            }))
        });

        let template = match outcome {
            Ok(template) => {
                template.mount(&element);
                host.drain_post_mount();
                template
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Component <{tag}> setup error: {message}");
                host.dispose();
                let fallback = render_fallback(&error_renderer, &message);
                fallback.mount(&element);
                fallback
            }
        };

        Self {
            inner: Arc::new(ComponentInner {
                element,
                host,
                template: Mutex::new(Some(template)),
                prop_effects: Mutex::new(prop_effects),
                host_class_effect: Mutex::new(host_class_effect),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The element this instance is mounted on — its single DOM root when
    /// embedded as a template slot's content (spec §4.5 "Factory result").
    pub fn root_node(&self) -> N {
        self.inner.element.clone()
    }

    /// Whether [`dispose`](Self::dispose) has already run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// The "disconnected" lifecycle step (spec §4.6): dispose the mounted
    /// template, the prop and host-class bindings, then the setup host's
    /// disposer list. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(template) = self.inner.template.lock().take() {
            template.dispose();
        }
        for effect in self.inner.prop_effects.lock().drain(..) {
            effect.dispose();
        }
        if let Some(effect) = self.inner.host_class_effect.lock().take() {
            effect.dispose();
        }
        self.inner.host.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::html;
    use crate::test_host::TestNode;
    use reactive_core::flush_effects;

    fn counter_def() -> ComponentDef<TestNode> {
        ComponentDef::new("x-counter", |props: &PropsProxy, _el: &TestNode| {
            let count = props.get::<i64>("count");
            html(&["<span>", "</span>"], vec![crate::template::Slot::Text(Reactive::Dynamic(Box::new(move || count.get().to_string())))])
        })
    }

    #[test]
    fn mounts_with_a_static_prop_value() {
        let handle = counter_def().build().prop("count", 7_i64).mount();
        let root = handle.root_node();
        assert_eq!(root.tag().as_deref(), Some("x-counter"));
        assert_eq!(root.child_nodes()[0].child_nodes()[0].text_data(), "7");
    }

    #[test]
    fn signal_prop_propagates_writes_into_child() {
        let count = Signal::new(1_i64);
        let handle = counter_def().build().prop("count", count.clone()).mount();
        let root = handle.root_node();
        assert_eq!(root.child_nodes()[0].child_nodes()[0].text_data(), "1");

        count.set(2);
        flush_effects();
        assert_eq!(root.child_nodes()[0].child_nodes()[0].text_data(), "2");
    }

    #[test]
    fn host_class_is_independent_of_internal_class_bindings() {
        let handle = counter_def()
            .build()
            .prop("count", 0_i64)
            .host_class(vec!["widget".to_string(), "is-active".to_string()])
            .mount();
        let root = handle.root_node();
        assert!(root.has_class("widget"));
        assert!(root.has_class("is-active"));
    }

    #[test]
    fn setup_panic_mounts_the_default_fallback_and_never_propagates() {
        let def = ComponentDef::new("x-broken", |_props: &PropsProxy, _el: &TestNode| -> TemplateResult<TestNode> {
            panic!("boom in setup");
        });
        let handle = def.build().mount();
        let root = handle.root_node();
        assert!(root.child_nodes().iter().any(|n| n.tag().is_none()));
    }

    #[test]
    fn setup_panic_uses_configured_error_renderer() {
        let def = ComponentDef::new("x-broken", |_props: &PropsProxy, _el: &TestNode| -> TemplateResult<TestNode> {
            panic!("boom in setup");
        })
        .with_error_renderer(|message| html(&["<em>", "</em>"], vec![crate::template::Slot::Text(Reactive::Static(message.to_string()))]));
        let handle = def.build().mount();
        let root = handle.root_node();
        let em = root.child_nodes().into_iter().find(|n| n.tag().as_deref() == Some("em")).expect("error renderer should mount");
        assert_eq!(em.child_nodes()[0].text_data(), "boom in setup");
    }

    #[test]
    fn dispose_is_idempotent_and_tears_down_prop_effect() {
        let count = Signal::new(1_i64);
        let handle = counter_def().build().prop("count", count.clone()).mount();
        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());

        count.set(99);
        flush_effects(); // must not panic even though the component is gone
    }

    #[test]
    fn register_rejects_a_duplicate_tag() {
        let tag: &'static str = "x-unique-registration-test";
        let first = ComponentDef::<TestNode>::new(tag, |_p, _e| html(&["<i></i>"], vec![])).register();
        assert!(first.is_ok());
        let second = ComponentDef::<TestNode>::new(tag, |_p, _e| html(&["<i></i>"], vec![])).register();
        assert!(matches!(second, Err(DomError::DuplicateComponent(_))));
    }
}
