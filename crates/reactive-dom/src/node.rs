//! [`GenericNode`]: the host-runtime contract (spec §6) a template result is
//! mounted against.
//!
//! The template engine and component shell are written against this trait
//! rather than `web_sys` directly so that binding/reconciliation logic can
//! be exercised deterministically in [`crate::test_host`] without a real
//! browser (the teacher's `test_harness.rs` does the same for the signal
//! core — this is its DOM-shaped counterpart).

use std::fmt::Debug;

/// One DOM event, abstracted just enough for the `@event` binding's
/// modifiers (stop-propagation, prevent-default) to operate on it.
pub trait GenericEvent: Debug {
    fn stop_propagation(&self);
    fn prevent_default(&self);
    /// The key pressed, for keyboard-key modifiers (`enter`, `escape`,
    /// `space`, `tab`). `None` for non-keyboard events.
    fn key(&self) -> Option<String>;
}

/// An opaque handle returned by [`GenericNode::add_event_listener`], dropped
/// (removing the listener) when the owning binding is disposed. Not `Send`:
/// a browser `Closure` is only valid on the thread (the single JS thread)
/// that created it, matching spec §5's single-threaded host assumption.
pub trait ListenerHandle: Debug {}

/// The host-runtime contract: element creation, text/comment nodes,
/// document-fragment, class-list manipulation, attribute get/set/remove,
/// event add/remove (spec §6).
///
/// Implementors: [`crate::websys::WebSysNode`] (the real browser host) and
/// [`crate::test_host::TestNode`] (an in-memory stand-in for unit tests).
pub trait GenericNode: Clone + PartialEq + Eq + Debug + 'static {
    type Event: GenericEvent;
    type Listener: ListenerHandle;

    fn create_element(tag: &str) -> Self;
    fn create_text_node(data: &str) -> Self;
    fn create_comment(data: &str) -> Self;
    /// A document fragment: an inert container whose children get adopted
    /// into whatever live parent it is later appended to.
    fn create_fragment() -> Self;

    fn set_text_data(&self, data: &str);
    fn text_data(&self) -> String;

    fn set_attribute(&self, name: &str, value: &str);
    fn remove_attribute(&self, name: &str);
    fn attribute(&self, name: &str) -> Option<String>;

    fn add_class(&self, name: &str);
    fn remove_class(&self, name: &str);
    fn has_class(&self, name: &str) -> bool;

    /// Opt-in trusted-HTML replacement of an element's inner content
    /// (`html:inner="${v}"`).
    fn set_inner_html(&self, html: &str);

    fn append_child(&self, child: &Self);
    /// Insert `new_node` as a child of `self`, immediately before
    /// `reference` (or at the end, if `reference` is `None`).
    fn insert_before(&self, new_node: &Self, reference: Option<&Self>);
    fn remove_child(&self, child: &Self);

    fn parent_node(&self) -> Option<Self>;
    fn next_sibling(&self) -> Option<Self>;

    /// Deep-clone this node (and its subtree). Used once per mount to clone
    /// an interned template's backing markup.
    fn clone_node_deep(&self) -> Self;

    /// Children of this node, in document order. Used to walk a freshly
    /// cloned template and match markers to slot indices.
    fn child_nodes(&self) -> Vec<Self>;

    /// `true` if this node is a comment node whose data equals `data`.
    fn is_comment_with_data(&self, data: &str) -> bool;

    fn add_event_listener<F>(&self, event_name: &str, handler: F) -> Self::Listener
    where
        F: Fn(&Self::Event) + 'static;
}
