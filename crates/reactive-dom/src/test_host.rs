//! An in-memory stand-in for the browser DOM, implementing
//! [`GenericNode`] so binding and reconciliation logic can be unit-tested
//! without `wasm-bindgen-test` (mirrors `reactive_core::test_harness`'s
//! "deterministic fixture, no real backend" approach).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::node::{GenericEvent, GenericNode, ListenerHandle};

#[derive(Debug, Clone)]
enum Kind {
    Element { tag: String },
    Text,
    Comment,
    Fragment,
}

struct Inner {
    kind: Kind,
    data: String,
    attrs: HashMap<String, String>,
    classes: Vec<String>,
    children: Vec<TestNode>,
    parent: Option<Weak<Mutex<Inner>>>,
    listeners: Vec<(u64, String, Arc<dyn Fn(&TestEvent)>)>,
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// A node in the in-memory test tree. Cheap to clone (reference-counted);
/// equality is by identity, matching DOM node identity semantics.
#[derive(Clone)]
pub struct TestNode(Arc<Mutex<Inner>>);

impl std::fmt::Debug for TestNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.lock();
        match &inner.kind {
            Kind::Element { tag } => write!(f, "<{tag}>"),
            Kind::Text => write!(f, "#text({:?})", inner.data),
            Kind::Comment => write!(f, "<!--{}-->", inner.data),
            Kind::Fragment => write!(f, "#fragment"),
        }
    }
}

impl PartialEq for TestNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TestNode {}

impl TestNode {
    fn new(kind: Kind, data: String) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            kind,
            data,
            attrs: HashMap::new(),
            classes: Vec::new(),
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        })))
    }

    /// The element tag name, if this is an element node.
    pub fn tag(&self) -> Option<String> {
        match &self.0.lock().kind {
            Kind::Element { tag } => Some(tag.clone()),
            _ => None,
        }
    }

    /// Snapshot of this element's currently-toggled classes, in insertion
    /// order. Test-only introspection.
    pub fn classes(&self) -> Vec<String> {
        self.0.lock().classes.clone()
    }

    /// Dispatch a synthetic event to every listener registered for
    /// `event_name`, in registration order. Test-only: there is no real
    /// event loop here, so tests trigger dispatch explicitly.
    pub fn dispatch(&self, event_name: &str, event: &TestEvent) {
        let listeners: Vec<_> = self
            .0
            .lock()
            .listeners
            .iter()
            .filter(|(_, name, _)| name == event_name)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for cb in listeners {
            cb(event);
        }
    }
}

/// A synthetic DOM event for [`TestNode`] trees.
#[derive(Debug, Default, Clone)]
pub struct TestEvent {
    stopped: Arc<Mutex<bool>>,
    prevented: Arc<Mutex<bool>>,
    key: Option<String>,
}

impl TestEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn was_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    pub fn was_prevented(&self) -> bool {
        *self.prevented.lock()
    }
}

impl GenericEvent for TestEvent {
    fn stop_propagation(&self) {
        *self.stopped.lock() = true;
    }

    fn prevent_default(&self) {
        *self.prevented.lock() = true;
    }

    fn key(&self) -> Option<String> {
        self.key.clone()
    }
}

/// Handle returned by [`TestNode::add_event_listener`]; removes the
/// listener from its node on drop.
pub struct TestListener {
    node: Weak<Mutex<Inner>>,
    id: u64,
}

impl std::fmt::Debug for TestListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestListener").field("id", &self.id).finish()
    }
}

impl Drop for TestListener {
    fn drop(&mut self) {
        if let Some(inner) = self.node.upgrade() {
            inner.lock().listeners.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl ListenerHandle for TestListener {}

impl GenericNode for TestNode {
    type Event = TestEvent;
    type Listener = TestListener;

    fn create_element(tag: &str) -> Self {
        Self::new(Kind::Element { tag: tag.to_string() }, String::new())
    }

    fn create_text_node(data: &str) -> Self {
        Self::new(Kind::Text, data.to_string())
    }

    fn create_comment(data: &str) -> Self {
        Self::new(Kind::Comment, data.to_string())
    }

    fn create_fragment() -> Self {
        Self::new(Kind::Fragment, String::new())
    }

    fn set_text_data(&self, data: &str) {
        self.0.lock().data = data.to_string();
    }

    fn text_data(&self) -> String {
        self.0.lock().data.clone()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.0.lock().attrs.insert(name.to_string(), value.to_string());
    }

    fn remove_attribute(&self, name: &str) {
        self.0.lock().attrs.remove(name);
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.0.lock().attrs.get(name).cloned()
    }

    fn add_class(&self, name: &str) {
        let mut inner = self.0.lock();
        if !inner.classes.iter().any(|c| c == name) {
            inner.classes.push(name.to_string());
        }
    }

    fn remove_class(&self, name: &str) {
        self.0.lock().classes.retain(|c| c != name);
    }

    fn has_class(&self, name: &str) -> bool {
        self.0.lock().classes.iter().any(|c| c == name)
    }

    fn set_inner_html(&self, html: &str) {
        // The test host has no HTML parser; trusted-HTML content is stored
        // verbatim as a single text child for inspection in tests.
        let mut inner = self.0.lock();
        inner.children.clear();
        drop(inner);
        let text = Self::create_text_node(html);
        self.append_child(&text);
    }

    fn append_child(&self, child: &Self) {
        self.insert_before(child, None);
    }

    fn insert_before(&self, new_node: &Self, reference: Option<&Self>) {
        // Real `Node.insertBefore` first detaches `new_node` from whatever
        // parent it currently has (even `self`, for a same-parent reorder).
        if let Some(old_parent) = new_node.parent_node() {
            old_parent.0.lock().children.retain(|c| c != new_node);
        }
        {
            let mut new_inner = new_node.0.lock();
            new_inner.parent = Some(Arc::downgrade(&self.0));
        }
        let mut inner = self.0.lock();
        match reference {
            Some(reference) => {
                let pos = inner.children.iter().position(|c| c == reference);
                match pos {
                    Some(pos) => inner.children.insert(pos, new_node.clone()),
                    None => inner.children.push(new_node.clone()),
                }
            }
            None => inner.children.push(new_node.clone()),
        }
    }

    fn remove_child(&self, child: &Self) {
        let mut inner = self.0.lock();
        inner.children.retain(|c| c != child);
        drop(inner);
        child.0.lock().parent = None;
    }

    fn parent_node(&self) -> Option<Self> {
        self.0.lock().parent.as_ref().and_then(Weak::upgrade).map(TestNode)
    }

    fn next_sibling(&self) -> Option<Self> {
        let parent = self.parent_node()?;
        let inner = parent.0.lock();
        let pos = inner.children.iter().position(|c| c == self)?;
        inner.children.get(pos + 1).cloned()
    }

    fn clone_node_deep(&self) -> Self {
        let inner = self.0.lock();
        let clone = Self::new(inner.kind.clone(), inner.data.clone());
        clone.0.lock().attrs = inner.attrs.clone();
        clone.0.lock().classes = inner.classes.clone();
        for child in &inner.children {
            clone.append_child(&child.clone_node_deep());
        }
        clone
    }

    fn child_nodes(&self) -> Vec<Self> {
        self.0.lock().children.clone()
    }

    fn is_comment_with_data(&self, data: &str) -> bool {
        let inner = self.0.lock();
        matches!(inner.kind, Kind::Comment) && inner.data == data
    }

    fn add_event_listener<F>(&self, event_name: &str, handler: F) -> Self::Listener
    where
        F: Fn(&Self::Event) + 'static,
    {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        self.0
            .lock()
            .listeners
            .push((id, event_name.to_string(), Arc::new(handler)));
        TestListener {
            node: Arc::downgrade(&self.0),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_remove_child() {
        let parent = TestNode::create_element("div");
        let child = TestNode::create_text_node("hi");
        parent.append_child(&child);
        assert_eq!(parent.child_nodes(), vec![child.clone()]);
        parent.remove_child(&child);
        assert!(parent.child_nodes().is_empty());
    }

    #[test]
    fn insert_before_respects_reference() {
        let parent = TestNode::create_element("ul");
        let a = TestNode::create_comment("a");
        let b = TestNode::create_comment("b");
        parent.append_child(&a);
        parent.insert_before(&b, Some(&a));
        assert_eq!(parent.child_nodes(), vec![b, a]);
    }

    #[test]
    fn insert_before_moves_existing_child_without_duplicating_it() {
        let parent = TestNode::create_element("ul");
        let a = TestNode::create_comment("a");
        let b = TestNode::create_comment("b");
        let c = TestNode::create_comment("c");
        parent.append_child(&a);
        parent.append_child(&b);
        parent.append_child(&c);

        // Move `c` to the front by reinserting it before `a`.
        parent.insert_before(&c, Some(&a));
        assert_eq!(parent.child_nodes(), vec![c, a, b]);
    }

    #[test]
    fn clone_node_deep_copies_subtree_with_distinct_identity() {
        let parent = TestNode::create_element("div");
        let child = TestNode::create_text_node("x");
        parent.append_child(&child);

        let clone = parent.clone_node_deep();
        assert_ne!(clone, parent);
        assert_eq!(clone.child_nodes().len(), 1);
        assert_ne!(clone.child_nodes()[0], child);
    }

    #[test]
    fn event_listener_fires_and_removed_on_drop() {
        let el = TestNode::create_element("button");
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let listener = el.add_event_listener("click", move |_| *c.lock() += 1);

        el.dispatch("click", &TestEvent::new());
        assert_eq!(*calls.lock(), 1);

        drop(listener);
        el.dispatch("click", &TestEvent::new());
        assert_eq!(*calls.lock(), 1);
    }
}
