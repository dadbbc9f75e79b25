//! [`GenericNode`] implementation backed by a real browser DOM via
//! `web-sys`/`wasm-bindgen`. This module only compiles for `wasm32` targets
//! — it is the concrete host runtime the spec's "host runtime contract"
//! (§6) assumes, everything else in this crate is written against the
//! abstract trait instead.

#![cfg(target_arch = "wasm32")]

use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{Comment, Document, Element, Event as WebEvent, Node, Text};

use crate::node::{GenericEvent, GenericNode, ListenerHandle};

fn document() -> Document {
    web_sys::window()
        .expect("reactive-dom requires a window (browser) host")
        .document()
        .expect("reactive-dom requires a document")
}

impl GenericEvent for WebEvent {
    fn stop_propagation(&self) {
        WebEvent::stop_propagation(self);
    }

    fn prevent_default(&self) {
        WebEvent::prevent_default(self);
    }

    fn key(&self) -> Option<String> {
        self.dyn_ref::<web_sys::KeyboardEvent>().map(|e| e.key())
    }
}

/// A live browser DOM node. Cheap to clone (`web_sys::Node` is a JS
/// reference handle); equality is JS reference identity via `Node::is_same_node`.
#[derive(Debug, Clone)]
pub struct WebSysNode(Node);

impl PartialEq for WebSysNode {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_same_node(Some(&other.0))
    }
}
impl Eq for WebSysNode {}

impl WebSysNode {
    /// Wrap a raw `web_sys::Node`, e.g. the element a component shell is
    /// instantiated on.
    pub fn from_node(node: Node) -> Self {
        Self(node)
    }

    pub fn as_node(&self) -> &Node {
        &self.0
    }

    pub fn as_element(&self) -> Option<Element> {
        self.0.dyn_ref::<Element>().cloned()
    }
}

/// Listener handle holding the `Closure` alive; dropping it detaches the
/// listener (web-sys requires the closure to outlive the registration).
#[derive(Debug)]
pub struct WebSysListener {
    target: web_sys::EventTarget,
    event_name: String,
    closure: Closure<dyn FnMut(WebEvent)>,
}

impl Drop for WebSysListener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(&self.event_name, self.closure.as_ref().unchecked_ref());
    }
}

impl ListenerHandle for WebSysListener {}

impl GenericNode for WebSysNode {
    type Event = WebEvent;
    type Listener = WebSysListener;

    fn create_element(tag: &str) -> Self {
        Self(document().create_element(tag).expect("create_element failed").into())
    }

    fn create_text_node(data: &str) -> Self {
        Self(Text::new_with_data(&document(), data).expect("create_text_node failed").into())
    }

    fn create_comment(data: &str) -> Self {
        let comment: Comment = document().create_comment(data);
        Self(comment.into())
    }

    fn create_fragment() -> Self {
        Self(document().create_document_fragment().into())
    }

    fn set_text_data(&self, data: &str) {
        self.0.set_text_content(Some(data));
    }

    fn text_data(&self) -> String {
        self.0.text_content().unwrap_or_default()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        if let Some(el) = self.as_element() {
            let _ = el.set_attribute(name, value);
        }
    }

    fn remove_attribute(&self, name: &str) {
        if let Some(el) = self.as_element() {
            let _ = el.remove_attribute(name);
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.as_element().and_then(|el| el.get_attribute(name))
    }

    fn add_class(&self, name: &str) {
        if let Some(el) = self.as_element() {
            let _ = el.class_list().add_1(name);
        }
    }

    fn remove_class(&self, name: &str) {
        if let Some(el) = self.as_element() {
            let _ = el.class_list().remove_1(name);
        }
    }

    fn has_class(&self, name: &str) -> bool {
        self.as_element().is_some_and(|el| el.class_list().contains(name))
    }

    fn set_inner_html(&self, html: &str) {
        if let Some(el) = self.as_element() {
            el.set_inner_html(html);
        }
    }

    fn append_child(&self, child: &Self) {
        let _ = self.0.append_child(&child.0);
    }

    fn insert_before(&self, new_node: &Self, reference: Option<&Self>) {
        let _ = self.0.insert_before(&new_node.0, reference.map(|r| &r.0));
    }

    fn remove_child(&self, child: &Self) {
        let _ = self.0.remove_child(&child.0);
    }

    fn parent_node(&self) -> Option<Self> {
        self.0.parent_node().map(Self)
    }

    fn next_sibling(&self) -> Option<Self> {
        self.0.next_sibling().map(Self)
    }

    fn clone_node_deep(&self) -> Self {
        Self(self.0.clone_node_with_deep(true).expect("clone_node failed"))
    }

    fn child_nodes(&self) -> Vec<Self> {
        let list = self.0.child_nodes();
        (0..list.length())
            .filter_map(|i| list.get(i))
            .map(Self)
            .collect()
    }

    fn is_comment_with_data(&self, data: &str) -> bool {
        self.0
            .dyn_ref::<Comment>()
            .is_some_and(|c| c.data() == data)
    }

    fn add_event_listener<F>(&self, event_name: &str, handler: F) -> Self::Listener
    where
        F: Fn(&Self::Event) + 'static,
    {
        let target: web_sys::EventTarget = self.0.clone().unchecked_into();
        let closure = Closure::wrap(Box::new(move |event: WebEvent| handler(&event)) as Box<dyn FnMut(WebEvent)>);
        let _ = target.add_event_listener_with_callback(event_name, closure.as_ref().unchecked_ref());
        WebSysListener {
            target,
            event_name: event_name.to_string(),
            closure,
        }
    }
}
