//! Tagged-template DOM binding engine and component shell (spec §4.5, §4.6):
//! parses a tagged-template-literal-shaped `(parts, slots)` pair once per
//! distinct `parts` array, mounts typed bindings per expression slot,
//! reconciles keyed lists in a single O(n) pass, and wraps a setup function
//! as a mountable component instance with typed props.
//!
//! Everything here is written against [`node::GenericNode`] rather than a
//! concrete DOM, so it runs against [`test_host::TestNode`] in ordinary unit
//! tests and against [`websys::WebSysNode`] in a real browser.

pub mod component;
pub mod conditional;
pub mod error;
pub mod list;
pub mod node;
pub mod template;
pub mod test_host;

#[cfg(target_arch = "wasm32")]
pub mod websys;

pub use component::{ComponentBuilder, ComponentDef, ComponentHandle, PropLeaf, PropSource, PropsProxy};
pub use conditional::{show, when};
pub use error::{DomError, Result};
pub use list::each;
pub use node::{GenericEvent, GenericNode, ListenerHandle};
pub use template::{
    html, AttrValue, EachSlotFactory, EventHandler, NodeContent, Reactive, ReactiveLeaf, Slot, TemplateResult,
};
pub use test_host::{TestEvent, TestListener, TestNode};

#[cfg(target_arch = "wasm32")]
pub use websys::{WebSysListener, WebSysNode};

/// Commonly used types for building templates and components.
pub mod prelude {
    pub use crate::{
        each, html, when, ComponentDef, DomError, GenericNode, NodeContent, Reactive, Slot, TemplateResult,
    };
}
