//! The tagged-template engine (spec §4.5): parses static markup once,
//! interns it, and on each call clones the cached tree and wires a
//! [`Binding`] per expression slot.
//!
//! Markup is supplied as the two halves a tagged template literal produces:
//! a `&'static [&'static str]` of static segments and a `Vec<Slot<N>>` of
//! per-slot values, one slot between every pair of adjacent segments. This
//! crate has no macro front-end (out of scope for the Rust port — see
//! `DESIGN.md`); callers build both halves directly, exactly as a proc-macro
//! front-end would generate them.
//!
//! Unlike the host runtime this is modelled on — which reparses via the
//! browser's own HTML parser on every clone — this parser runs once per
//! distinct `parts` array (interned by its pointer identity, matching the
//! spec's "weak-keyed by its identity" framing) and never touches a string
//! marker encoding: slot boundaries are tracked structurally while scanning
//! `parts`, so there is no bracketed-sentinel text to embed or strip.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use send_wrapper::SendWrapper;
use tracing::{error, trace};

use reactive_core::{Derived, Effect, Ref, Signal};

use crate::node::GenericNode;

// ---------------------------------------------------------------------
// Parsed markup
// ---------------------------------------------------------------------

/// One node of a parsed (not yet mounted) template tree.
#[derive(Debug, Clone)]
pub enum TemplateNode {
    Text(String),
    /// A slot in text position; becomes either a bound text node or a pair
    /// of sentinel comments, depending on the [`Slot`] value supplied at
    /// mount time.
    Marker(usize),
    Element {
        tag: String,
        static_attrs: Vec<(String, String)>,
        dynamic_attrs: Vec<(AttrSlot, usize)>,
        children: Vec<TemplateNode>,
    },
}

/// The attribute-position binding kind, determined by attribute syntax at
/// parse time (spec §4.5's syntax table).
#[derive(Debug, Clone)]
pub enum AttrSlot {
    Event { name: String, modifiers: Vec<EventModifier> },
    ClassToggle(String),
    ClassList,
    InnerHtml,
    Ref,
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventModifier {
    StopPropagation,
    PreventDefault,
    Once,
    Key(KeyName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    Enter,
    Escape,
    Space,
    Tab,
}

impl KeyName {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "enter" => Some(Self::Enter),
            "escape" => Some(Self::Escape),
            "space" => Some(Self::Space),
            "tab" => Some(Self::Tab),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::Escape => "Escape",
            Self::Space => " ",
            Self::Tab => "Tab",
        }
    }
}

fn parse_attr_name(name: &str) -> AttrSlot {
    if let Some(rest) = name.strip_prefix('@') {
        let mut parts = rest.split('.');
        let event_name = parts.next().unwrap_or_default().to_string();
        let modifiers = parts
            .filter_map(|word| match word {
                "stop" => Some(EventModifier::StopPropagation),
                "prevent" => Some(EventModifier::PreventDefault),
                "once" => Some(EventModifier::Once),
                key => KeyName::parse(key).map(EventModifier::Key),
            })
            .collect();
        AttrSlot::Event { name: event_name, modifiers }
    } else if let Some(rest) = name.strip_prefix("class:") {
        AttrSlot::ClassToggle(rest.to_string())
    } else if name == "class" {
        AttrSlot::ClassList
    } else if name == "html:inner" {
        AttrSlot::InnerHtml
    } else if name == "ref" {
        AttrSlot::Ref
    } else {
        AttrSlot::Attribute(name.to_string())
    }
}

// ---------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------

#[derive(Debug)]
enum Mode {
    Text,
    AttrArea,
    AttrName,
    AttrValueQuoted(char),
    AttrValueUnquoted,
}

struct OpenElement {
    tag: String,
    static_attrs: Vec<(String, String)>,
    dynamic_attrs: Vec<(AttrSlot, usize)>,
    children: Vec<TemplateNode>,
}

struct Parser {
    stack: Vec<OpenElement>,
    roots: Vec<TemplateNode>,
    mode: Mode,
    text_buf: String,
    attr_name_buf: String,
    attr_value_buf: String,
    /// When the previous part ended mid-quoted-attribute-value with an
    /// empty value buffer (an attribute slot), the next part must begin by
    /// consuming the matching closing quote.
    expect_closing_quote: Option<char>,
}

impl Parser {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            roots: Vec::new(),
            mode: Mode::Text,
            text_buf: String::new(),
            attr_name_buf: String::new(),
            attr_value_buf: String::new(),
            expect_closing_quote: None,
        }
    }

    fn push_child(&mut self, node: TemplateNode) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn flush_text(&mut self) {
        if !self.text_buf.is_empty() {
            let text = std::mem::take(&mut self.text_buf);
            self.push_child(TemplateNode::Text(text));
        }
    }

    fn finish_static_attr(&mut self) {
        let name = std::mem::take(&mut self.attr_name_buf);
        let value = std::mem::take(&mut self.attr_value_buf);
        if let Some(open) = self.stack.last_mut() {
            open.static_attrs.push((name, value));
        }
        self.mode = Mode::AttrArea;
    }

    fn close_element(&mut self) {
        if let Some(open) = self.stack.pop() {
            let node = TemplateNode::Element {
                tag: open.tag,
                static_attrs: open.static_attrs,
                dynamic_attrs: open.dynamic_attrs,
                children: open.children,
            };
            self.push_child(node);
        }
    }

    /// Process one static segment's characters.
    fn feed(&mut self, part: &str) {
        let mut chars = part.chars().peekable();

        if let Some(quote) = self.expect_closing_quote.take() {
            if chars.peek() == Some(&quote) {
                chars.next();
                self.mode = Mode::AttrArea;
            }
        }

        while let Some(c) = chars.next() {
            match &self.mode {
                Mode::Text => {
                    if c == '<' {
                        self.flush_text();
                        if chars.peek() == Some(&'/') {
                            chars.next();
                            let mut tag = String::new();
                            for c in chars.by_ref() {
                                if c == '>' {
                                    break;
                                }
                                tag.push(c);
                            }
                            let _ = tag;
                            self.close_element();
                        } else {
                            let mut tag = String::new();
                            while let Some(&c) = chars.peek() {
                                if c.is_whitespace() || c == '>' || c == '/' {
                                    break;
                                }
                                tag.push(c);
                                chars.next();
                            }
                            self.stack.push(OpenElement {
                                tag,
                                static_attrs: Vec::new(),
                                dynamic_attrs: Vec::new(),
                                children: Vec::new(),
                            });
                            self.mode = Mode::AttrArea;
                        }
                    } else {
                        self.text_buf.push(c);
                    }
                }
                Mode::AttrArea => {
                    if c.is_whitespace() {
                        // skip
                    } else if c == '>' {
                        self.mode = Mode::Text;
                    } else if c == '/' {
                        if chars.peek() == Some(&'>') {
                            chars.next();
                        }
                        self.mode = Mode::Text;
                        self.close_element();
                    } else {
                        self.attr_name_buf.push(c);
                        self.mode = Mode::AttrName;
                    }
                }
                Mode::AttrName => {
                    if c == '=' {
                        self.mode = Mode::AttrValueUnquoted;
                        self.attr_value_buf.clear();
                    } else if c.is_whitespace() || c == '>' {
                        let name = std::mem::take(&mut self.attr_name_buf);
                        if let Some(open) = self.stack.last_mut() {
                            open.static_attrs.push((name, String::new()));
                        }
                        self.mode = if c == '>' { Mode::Text } else { Mode::AttrArea };
                    } else {
                        self.attr_name_buf.push(c);
                    }
                }
                Mode::AttrValueUnquoted => {
                    if self.attr_value_buf.is_empty() && (c == '"' || c == '\'') {
                        self.mode = Mode::AttrValueQuoted(c);
                    } else if c.is_whitespace() || c == '>' {
                        self.finish_static_attr();
                        if c == '>' {
                            self.mode = Mode::Text;
                        }
                    } else {
                        self.attr_value_buf.push(c);
                    }
                }
                Mode::AttrValueQuoted(quote) => {
                    let quote = *quote;
                    if c == quote {
                        self.finish_static_attr();
                    } else {
                        self.attr_value_buf.push(c);
                    }
                }
            }
        }
    }

    /// Called at a slot boundary between two static segments.
    fn feed_slot(&mut self, index: usize) {
        match &self.mode {
            Mode::Text => {
                self.flush_text();
                self.push_child(TemplateNode::Marker(index));
            }
            Mode::AttrValueUnquoted if self.attr_value_buf.is_empty() => {
                let name = std::mem::take(&mut self.attr_name_buf);
                let slot = parse_attr_name(&name);
                if let Some(open) = self.stack.last_mut() {
                    open.dynamic_attrs.push((slot, index));
                }
                self.mode = Mode::AttrArea;
            }
            Mode::AttrValueQuoted(quote) if self.attr_value_buf.is_empty() => {
                let name = std::mem::take(&mut self.attr_name_buf);
                let slot = parse_attr_name(&name);
                if let Some(open) = self.stack.last_mut() {
                    open.dynamic_attrs.push((slot, index));
                }
                self.expect_closing_quote = Some(*quote);
            }
            other => panic!(
                "reactive-dom: unsupported slot position in template (parser state {other:?}); \
                 slots must be a full text node, a full attribute value, or an attribute name"
            ),
        }
    }

    fn finish(mut self) -> Vec<TemplateNode> {
        self.flush_text();
        while !self.stack.is_empty() {
            self.close_element();
        }
        self.roots
    }
}

/// A parsed, cached template: the static tree shape, and how many slots it
/// expects.
#[derive(Debug)]
pub struct ParsedTemplate {
    pub(crate) roots: Vec<TemplateNode>,
    pub(crate) slot_count: usize,
}

fn parse_parts(parts: &[&str], slot_count: usize) -> ParsedTemplate {
    let mut parser = Parser::new();
    for (i, part) in parts.iter().enumerate() {
        parser.feed(part);
        if i + 1 < parts.len() {
            parser.feed_slot(i);
        }
    }
    ParsedTemplate {
        roots: parser.finish(),
        slot_count,
    }
}

type InternKey = (usize, usize);

static TEMPLATE_CACHE: Lazy<Mutex<HashMap<InternKey, Arc<ParsedTemplate>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn intern(parts: &'static [&'static str]) -> Arc<ParsedTemplate> {
    let key: InternKey = (parts.as_ptr() as usize, parts.len());
    if let Some(cached) = TEMPLATE_CACHE.lock().get(&key) {
        return Arc::clone(cached);
    }
    let slot_count = parts.len().saturating_sub(1);
    let parsed = Arc::new(parse_parts(parts, slot_count));
    TEMPLATE_CACHE.lock().insert(key, Arc::clone(&parsed));
    trace!(roots = parsed.roots.len(), slots = parsed.slot_count, "interned template");
    parsed
}

// ---------------------------------------------------------------------
// Slot values
// ---------------------------------------------------------------------

/// A value accepted by one binding: either fixed at mount time, or a
/// reactive source re-read inside an [`Effect`] (spec's "Signal over
/// primitive" / "Signal over template/array/null" slot kinds).
pub enum Reactive<T> {
    Static(T),
    Dynamic(Box<dyn Fn() -> T + Send>),
}

impl<T> From<T> for Reactive<T>
where
    T: ReactiveLeaf,
{
    fn from(value: T) -> Self {
        Reactive::Static(value)
    }
}

/// Marker trait preventing the blanket `From<T>` impl above from
/// overlapping with the `From<Signal<T>>`/`From<Derived<T>>` impls below.
pub trait ReactiveLeaf {}
impl ReactiveLeaf for String {}
impl ReactiveLeaf for bool {}
impl ReactiveLeaf for Vec<String> {}

impl From<&str> for Reactive<String> {
    fn from(value: &str) -> Self {
        Reactive::Static(value.to_string())
    }
}

impl<T: Clone + Send + 'static> From<Signal<T>> for Reactive<T> {
    fn from(signal: Signal<T>) -> Self {
        Reactive::Dynamic(Box::new(move || signal.get()))
    }
}

impl<T: Clone + PartialEq + Send + 'static> From<Derived<T>> for Reactive<T> {
    fn from(derived: Derived<T>) -> Self {
        Reactive::Dynamic(Box::new(move || derived.get()))
    }
}

impl<T> Reactive<T> {
    /// Adapt a signal of one type into a reactive source of another, e.g.
    /// a `Signal<bool>` driving a `Reactive<AttrValue>` attribute slot.
    pub fn from_signal_map<S>(signal: Signal<S>, f: impl Fn(S) -> T + 'static) -> Self
    where
        S: Clone + Send + 'static,
    {
        Reactive::Dynamic(Box::new(move || f(signal.get())))
    }
}

/// Content accepted by a reactive (non-text) slot in text position: the
/// result of mounting a template, a child component, an array of either, or
/// nothing.
pub enum NodeContent<N: GenericNode> {
    None,
    Template(TemplateResult<N>),
    Component(crate::component::ComponentHandle<N>),
    Many(Vec<NodeContent<N>>),
}

impl<N: GenericNode> From<TemplateResult<N>> for NodeContent<N> {
    fn from(value: TemplateResult<N>) -> Self {
        NodeContent::Template(value)
    }
}

impl<N: GenericNode> From<Option<TemplateResult<N>>> for NodeContent<N> {
    fn from(value: Option<TemplateResult<N>>) -> Self {
        match value {
            Some(t) => NodeContent::Template(t),
            None => NodeContent::None,
        }
    }
}

impl<N: GenericNode> From<crate::component::ComponentHandle<N>> for NodeContent<N> {
    fn from(value: crate::component::ComponentHandle<N>) -> Self {
        NodeContent::Component(value)
    }
}

impl<N: GenericNode> From<Vec<TemplateResult<N>>> for NodeContent<N> {
    fn from(value: Vec<TemplateResult<N>>) -> Self {
        NodeContent::Many(value.into_iter().map(NodeContent::Template).collect())
    }
}

impl<N: GenericNode> NodeContent<N> {
    fn dom_roots(&self) -> Vec<N> {
        match self {
            NodeContent::None => Vec::new(),
            NodeContent::Template(t) => t.roots.clone(),
            NodeContent::Component(c) => vec![c.root_node()],
            NodeContent::Many(items) => items.iter().flat_map(NodeContent::dom_roots).collect(),
        }
    }

    fn dispose(&self) {
        match self {
            NodeContent::None => {}
            NodeContent::Template(t) => t.dispose(),
            NodeContent::Component(c) => c.dispose(),
            NodeContent::Many(items) => items.iter().for_each(NodeContent::dispose),
        }
    }
}

/// A value accepted by a dynamic, non-slot-kind-specific attribute: a
/// reactive string, boolean presence flag, or absence.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Text(String),
    Bool(bool),
    Null,
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}
impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}
impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}
impl From<Option<String>> for AttrValue {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(s) => AttrValue::Text(s),
            None => AttrValue::Null,
        }
    }
}

pub type EventHandler<N> = Arc<dyn Fn(&<N as GenericNode>::Event) + 'static>;

/// The value supplied for one expression slot; the variant must match the
/// binding syntax (attribute position vs. text position) the slot was
/// parsed under, or binding creation panics (spec §9's "dispatch once at
/// binding creation").
pub enum Slot<N: GenericNode> {
    Text(Reactive<String>),
    Content(Reactive<NodeContent<N>>),
    Event(EventHandler<N>),
    ClassToggle(Reactive<bool>),
    ClassList(Reactive<Vec<String>>),
    InnerHtml(Reactive<String>),
    Ref(Ref<N>),
    Attribute(Reactive<AttrValue>),
    /// A keyed list (spec §4.5's "Keyed list reconciliation"), built by
    /// [`crate::list::each`]. Takes the sentinel comment pair a text-position
    /// slot is given and returns the live binding to dispose later.
    List(EachSlotFactory<N>),
}

/// A keyed-list slot's deferred constructor: given the `(start, end)`
/// sentinel pair a text-position marker is mounted with, builds the live
/// [`crate::list::EachBinding`] and erases it behind [`Disposable`].
pub type EachSlotFactory<N> = Box<dyn FnOnce(N, N) -> Box<dyn Disposable> + Send>;

impl ReactiveLeaf for AttrValue {}

// ---------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------

/// A single live expression-slot binding (spec §3's `Binding` entity).
pub(crate) enum Binding<N: GenericNode> {
    Text {
        effect: Option<Effect>,
    },
    Content {
        end: N,
        mounted: Arc<Mutex<NodeContent<N>>>,
        effect: Option<Effect>,
    },
    Event {
        _listener: N::Listener,
    },
    ClassToggle {
        effect: Option<Effect>,
    },
    ClassList {
        effect: Option<Effect>,
    },
    InnerHtml {
        effect: Option<Effect>,
    },
    Ref {
        handle: Ref<N>,
    },
    Attribute {
        effect: Option<Effect>,
    },
    /// A keyed-list binding, owned by [`crate::list::EachBinding`]; disposed
    /// through the boxed `dyn Disposable` rather than a `Binding` match arm.
    List(Box<dyn Disposable>),
}

/// Anything a [`Binding`] can own that needs an explicit teardown call (an
/// `Effect` has no `Drop` impl — it must be disposed, matching
/// `reactive_core`'s explicit-lifetime idiom).
pub(crate) trait Disposable {
    fn dispose(&self);
}

impl<N: GenericNode> Binding<N> {
    pub(crate) fn dispose(self) {
        match self {
            Binding::Text { effect } => {
                if let Some(effect) = effect {
                    effect.dispose();
                }
            }
            Binding::Content { end, mounted, effect } => {
                if let Some(effect) = effect {
                    effect.dispose();
                }
                clear_content_between(&end, &mounted.lock());
            }
            Binding::ClassToggle { effect } | Binding::ClassList { effect } | Binding::InnerHtml { effect } | Binding::Attribute { effect } => {
                if let Some(effect) = effect {
                    effect.dispose();
                }
            }
            Binding::Event { .. } => {}
            Binding::Ref { handle } => handle.clear(),
            Binding::List(list) => list.dispose(),
        }
    }
}

fn mount_content_between<N: GenericNode>(end: &N, content: &NodeContent<N>) {
    let Some(parent) = end.parent_node() else { return };
    for node in content.dom_roots() {
        parent.insert_before(&node, Some(end));
    }
}

fn clear_content_between<N: GenericNode>(end: &N, content: &NodeContent<N>) {
    if let Some(parent) = end.parent_node() {
        for node in content.dom_roots() {
            parent.remove_child(&node);
        }
    }
    content.dispose();
}

fn bind_text<N: GenericNode>(node: N, reactive: Reactive<String>) -> Binding<N> {
    match reactive {
        Reactive::Static(s) => {
            node.set_text_data(&s);
            Binding::Text { effect: None }
        }
        Reactive::Dynamic(accessor) => {
            let target = SendWrapper::new(node.clone());
            let effect = Effect::new(move || target.set_text_data(&accessor()));
            Binding::Text { effect: Some(effect) }
        }
    }
}

fn bind_content<N: GenericNode>(start: N, end: N, reactive: Reactive<NodeContent<N>>) -> Binding<N> {
    match reactive {
        Reactive::Static(content) => {
            mount_content_between(&end, &content);
            Binding::Content {
                end,
                mounted: Arc::new(Mutex::new(content)),
                effect: None,
            }
        }
        Reactive::Dynamic(accessor) => {
            let mounted = Arc::new(Mutex::new(NodeContent::None));
            let end2 = SendWrapper::new(end.clone());
            let mounted2 = SendWrapper::new(Arc::clone(&mounted));
            let effect = Effect::new(move || {
                let new_content = accessor();
                let mut current = mounted2.lock();
                clear_content_between(&end2, &current);
                mount_content_between(&end2, &new_content);
                *current = new_content;
            });
            let _ = &start;
            Binding::Content {
                end,
                mounted,
                effect: Some(effect),
            }
        }
    }
}

fn bind_event<N: GenericNode>(el: &N, name: &str, modifiers: &[EventModifier], handler: EventHandler<N>) -> Binding<N> {
    let once = modifiers.contains(&EventModifier::Once);
    let fired = Arc::new(AtomicBool::new(false));
    let keys: Vec<KeyName> = modifiers
        .iter()
        .filter_map(|m| match m {
            EventModifier::Key(k) => Some(*k),
            _ => None,
        })
        .collect();
    let stop = modifiers.contains(&EventModifier::StopPropagation);
    let prevent = modifiers.contains(&EventModifier::PreventDefault);
    let event_name = name.to_string();

    let listener = el.add_event_listener(name, move |event: &N::Event| {
        if !keys.is_empty() && !keys.iter().any(|k| event.key().as_deref() == Some(k.as_str())) {
            return;
        }
        if once && fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if stop {
            event.stop_propagation();
        }
        if prevent {
            event.prevent_default();
        }
        // Isolated per spec §7: a throwing handler must not prevent other
        // listeners (on this or other elements) from running.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            error!("Event handler error for '{event_name}': {payload:?}");
        }
    });
    Binding::Event { _listener: listener }
}

fn bind_class_toggle<N: GenericNode>(el: N, name: String, reactive: Reactive<bool>) -> Binding<N> {
    match reactive {
        Reactive::Static(value) => {
            if value {
                el.add_class(&name);
            }
            Binding::ClassToggle { effect: None }
        }
        Reactive::Dynamic(accessor) => {
            let el = SendWrapper::new(el);
            let effect = Effect::new(move || {
                if accessor() {
                    el.add_class(&name);
                } else {
                    el.remove_class(&name);
                }
            });
            Binding::ClassToggle { effect: Some(effect) }
        }
    }
}

fn bind_class_list<N: GenericNode>(el: N, reactive: Reactive<Vec<String>>) -> Binding<N> {
    let managed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let apply = {
        let el = SendWrapper::new(el.clone());
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
            Binding::ClassList { effect: None }
        }
        Reactive::Dynamic(accessor) => {
            let effect = Effect::new(move || apply(accessor()));
            Binding::ClassList { effect: Some(effect) }
        }
    }
}

fn bind_inner_html<N: GenericNode>(el: N, reactive: Reactive<String>) -> Binding<N> {
    match reactive {
        Reactive::Static(html) => {
            el.set_inner_html(&html);
            Binding::InnerHtml { effect: None }
        }
        Reactive::Dynamic(accessor) => {
            let el = SendWrapper::new(el);
            let effect = Effect::new(move || el.set_inner_html(&accessor()));
            Binding::InnerHtml { effect: Some(effect) }
        }
    }
}

fn bind_ref<N: GenericNode>(el: N, handle: Ref<N>) -> Binding<N> {
    handle.set(el);
    Binding::Ref { handle }
}

fn bind_attribute<N: GenericNode>(el: N, name: String, reactive: Reactive<AttrValue>) -> Binding<N> {
    let el = SendWrapper::new(el);
    let apply = move |value: &AttrValue| match value {
        AttrValue::Text(s) => el.set_attribute(&name, s),
        AttrValue::Bool(true) => el.set_attribute(&name, ""),
        AttrValue::Bool(false) | AttrValue::Null => el.remove_attribute(&name),
    };

    match reactive {
        Reactive::Static(value) => {
            apply(&value);
            Binding::Attribute { effect: None }
        }
        Reactive::Dynamic(accessor) => {
            let effect = Effect::new(move || apply(&accessor()));
            Binding::Attribute { effect: Some(effect) }
        }
    }
}

fn bind_attr_slot<N: GenericNode>(el: &N, attr: AttrSlot, slot: Slot<N>) -> Binding<N> {
    match (attr, slot) {
        (AttrSlot::Event { name, modifiers }, Slot::Event(handler)) => bind_event(el, &name, &modifiers, handler),
        (AttrSlot::ClassToggle(name), Slot::ClassToggle(reactive)) => bind_class_toggle(el.clone(), name, reactive),
        (AttrSlot::ClassList, Slot::ClassList(reactive)) => bind_class_list(el.clone(), reactive),
        (AttrSlot::InnerHtml, Slot::InnerHtml(reactive)) => bind_inner_html(el.clone(), reactive),
        (AttrSlot::Ref, Slot::Ref(handle)) => bind_ref(el.clone(), handle),
        (AttrSlot::Attribute(name), Slot::Attribute(reactive)) => bind_attribute(el.clone(), name, reactive),
        (attr, _) => panic!("reactive-dom: slot value does not match attribute binding kind {attr:?}"),
    }
}

fn build_into<N: GenericNode>(parent: &N, tpl: &TemplateNode, slots: &mut [Option<Slot<N>>], bindings: &mut Vec<Binding<N>>) {
    match tpl {
        TemplateNode::Text(text) => parent.append_child(&N::create_text_node(text)),
        TemplateNode::Marker(idx) => {
            let slot = slots[*idx].take().expect("reactive-dom: slot consumed twice");
            match slot {
                Slot::Text(reactive) => {
                    let node = N::create_text_node("");
                    parent.append_child(&node);
                    bindings.push(bind_text(node, reactive));
                }
                Slot::Content(reactive) => {
                    let start = N::create_comment("");
                    let end = N::create_comment("");
                    parent.append_child(&start);
                    parent.append_child(&end);
                    bindings.push(bind_content(start, end, reactive));
                }
                Slot::List(factory) => {
                    let start = N::create_comment("");
                    let end = N::create_comment("");
                    parent.append_child(&start);
                    parent.append_child(&end);
                    bindings.push(Binding::List(factory(start, end)));
                }
                _ => panic!(
                    "reactive-dom: slot {idx} is in text position, so it must be Slot::Text or \
                     Slot::Content, not an attribute-binding-kind value"
                ),
            }
        }
        TemplateNode::Element { tag, static_attrs, dynamic_attrs, children } => {
            let el = N::create_element(tag);
            for (name, value) in static_attrs {
                el.set_attribute(name, value);
            }
            for (attr_slot, idx) in dynamic_attrs {
                let slot = slots[*idx].take().expect("reactive-dom: slot consumed twice");
                bindings.push(bind_attr_slot(&el, attr_slot.clone(), slot));
            }
            for child in children {
                build_into(&el, child, slots, bindings);
            }
            parent.append_child(&el);
        }
    }
}

// ---------------------------------------------------------------------
// TemplateResult
// ---------------------------------------------------------------------

/// A mounted template: its live root nodes plus every binding created for
/// its expression slots (spec §3's `TemplateResult`).
pub struct TemplateResult<N: GenericNode> {
    pub(crate) roots: Vec<N>,
    bindings: Mutex<Vec<Binding<N>>>,
    disposed: AtomicBool,
}

impl<N: GenericNode> std::fmt::Debug for TemplateResult<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateResult")
            .field("roots", &self.roots.len())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl<N: GenericNode> TemplateResult<N> {
    /// Append this result's root nodes into `host`. Idempotent to call more
    /// than once is not guaranteed — callers mount exactly once, per the
    /// component shell's mount sequence (spec §4.6).
    pub fn mount(&self, host: &N) {
        for root in &self.roots {
            host.append_child(root);
        }
    }

    /// Dispose every binding (stopping their effects, removing listeners,
    /// clearing refs) and detach the root nodes from their current parent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for binding in self.bindings.lock().drain(..) {
            binding.dispose();
        }
        for root in &self.roots {
            if let Some(parent) = root.parent_node() {
                parent.remove_child(root);
            }
        }
    }

    /// The root nodes, for a caller that needs to read them directly (the
    /// component shell forwarding a single-root template as its host
    /// element, or the list binding tracking per-row nodes).
    pub fn root_nodes(&self) -> &[N] {
        &self.roots
    }

    /// Build a result directly from a single already-created node with no
    /// bindings. Used by the component shell's default error fallback
    /// (spec §4.6 step 6).
    pub(crate) fn from_root(node: N) -> Self {
        Self {
            roots: vec![node],
            bindings: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }
}

/// Mount a tagged template: parse (or reuse the cached parse of) `parts`,
/// clone it into live nodes, and wire a binding for each slot in `slots`.
pub fn html<N: GenericNode>(parts: &'static [&'static str], slots: Vec<Slot<N>>) -> TemplateResult<N> {
    let parsed = intern(parts);
    assert_eq!(
        slots.len(),
        parsed.slot_count,
        "reactive-dom: template expected {} slots, got {}",
        parsed.slot_count,
        slots.len()
    );

    let scratch = N::create_fragment();
    let mut slots: Vec<Option<Slot<N>>> = slots.into_iter().map(Some).collect();
    let mut bindings = Vec::new();
    for node in &parsed.roots {
        build_into(&scratch, node, &mut slots, &mut bindings);
    }

    TemplateResult {
        roots: scratch.child_nodes(),
        bindings: Mutex::new(bindings),
        disposed: AtomicBool::new(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::{TestEvent, TestNode};
    use reactive_core::{flush_effects, Signal};

    fn tpl(parts: &'static [&'static str], slots: Vec<Slot<TestNode>>) -> TemplateResult<TestNode> {
        html(parts, slots)
    }

    #[test]
    fn mounts_static_text() {
        let t = tpl(&["<span>hello</span>"], vec![]);
        assert_eq!(t.roots.len(), 1);
        assert_eq!(t.roots[0].tag().as_deref(), Some("span"));
        assert_eq!(t.roots[0].child_nodes()[0].text_data(), "hello");
    }

    #[test]
    fn reactive_text_updates_on_flush() {
        let name = Signal::new("Alice".to_string());
        let t = tpl(
            &["<span>", "</span>"],
            vec![Slot::Text(name.clone().into())],
        );
        let text_node = t.roots[0].child_nodes()[0].clone();
        assert_eq!(text_node.text_data(), "Alice");

        name.set("Bob".to_string());
        flush_effects();
        assert_eq!(text_node.text_data(), "Bob");
    }

    #[test]
    fn static_attribute_and_dynamic_attribute() {
        let checked = Signal::new(false);
        let t = tpl(
            &["<input disabled=\"\" data-on=\"", "\">"],
            vec![Slot::Attribute(Reactive::from_signal_map(checked, |v| {
                AttrValue::Text(v.to_string())
            }))],
        );
        let el = &t.roots[0];
        assert_eq!(el.attribute("disabled"), Some(String::new()));
        assert_eq!(el.attribute("data-on"), Some("false".to_string()));
    }

    #[test]
    fn class_toggle_does_not_touch_class_list_classes() {
        let active = Signal::new(true);
        let t = tpl(
            &["<div class=\"", "\" class:hot=\"", "\"></div>"],
            vec![
                Slot::ClassList(vec!["base".to_string()].into()),
                Slot::ClassToggle(active.clone().into()),
            ],
        );
        let el = &t.roots[0];
        assert!(el.has_class("base"));
        assert!(el.has_class("hot"));
        active.set(false);
        flush_effects();
        assert!(el.has_class("base"));
        assert!(!el.has_class("hot"));
    }

    #[test]
    fn event_binding_fires_and_respects_stop_modifier() {
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let handler: EventHandler<TestNode> = Arc::new(move |_| *c.lock() += 1);
        let t = tpl(&["<button @click.stop=\"", "\"></button>"], vec![Slot::Event(handler)]);
        let button = &t.roots[0];
        let event = TestEvent::new();
        button.dispatch("click", &event);
        assert_eq!(*calls.lock(), 1);
        assert!(event.was_stopped());
    }

    #[test]
    fn ref_binding_writes_element_and_clears_on_dispose() {
        let r: Ref<TestNode> = Ref::new();
        let t = tpl(&["<div ref=\"", "\"></div>"], vec![Slot::Ref(r.clone())]);
        assert_eq!(r.current(), Some(t.roots[0].clone()));
        t.dispose();
        assert_eq!(r.current(), None);
    }

    #[test]
    fn reactive_slot_mounts_and_swaps_content_between_sentinels() {
        let show = Signal::new(true);
        let show_for_slot = show.clone();
        let content: Reactive<NodeContent<TestNode>> = Reactive::Dynamic(Box::new(move || {
            if show_for_slot.get() {
                NodeContent::Template(tpl(&["<b>yes</b>"], vec![]))
            } else {
                NodeContent::None
            }
        }));
        let t = tpl(&["<div>", "</div>"], vec![Slot::Content(content)]);
        let wrapper = &t.roots[0];
        assert_eq!(wrapper.child_nodes().len(), 3); // start, <b>, end
        show.set(false);
        flush_effects();
        assert_eq!(wrapper.child_nodes().len(), 2); // start, end
    }

    #[test]
    fn mount_then_dispose_leaves_no_live_bindings() {
        let name = Signal::new("Alice".to_string());
        let t = tpl(&["<span>", "</span>"], vec![Slot::Text(name.clone().into())]);
        let host = TestNode::create_element("div");
        t.mount(&host);
        t.dispose();
        assert!(host.child_nodes().is_empty());

        name.set("Bob".to_string());
        flush_effects(); // must not panic even though the text node is detached
    }
}
