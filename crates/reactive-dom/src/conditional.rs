//! `when()`: a reactive text-position slot that mounts one of two branches
//! based on a boolean signal (spec §4.5's "Signal over template/array/null"
//! slot kind, specialised to the common if/else case).
//!
//! Built entirely on top of [`crate::template::Reactive::Dynamic`] plus
//! [`crate::template::bind_content`]'s existing Effect-driven swap-between-
//! sentinels machinery — there is no separate tracking primitive here, the
//! condition is just another signal read inside the slot's accessor closure.

use crate::node::GenericNode;
use crate::template::{NodeContent, Reactive, Slot, TemplateResult};

/// Mount `then_branch()` while `condition` reads `true`, `else_branch()`
/// while it reads `false`, switching (disposing the old branch, mounting the
/// new one) whenever `condition` changes.
///
/// `condition` is any `Fn() -> bool` — typically `move || some_signal.get()`
/// or a [`reactive_core::Derived`]'s `move || derived.get()` — so callers can
/// combine multiple signals in the predicate without a dedicated type.
pub fn when<N, C, T, E>(condition: C, then_branch: T, else_branch: E) -> Slot<N>
where
    N: GenericNode,
    C: Fn() -> bool + Send + 'static,
    T: Fn() -> TemplateResult<N> + Send + 'static,
    E: Fn() -> TemplateResult<N> + Send + 'static,
{
    Slot::Content(Reactive::Dynamic(Box::new(move || {
        if condition() {
            NodeContent::Template(then_branch())
        } else {
            NodeContent::Template(else_branch())
        }
    })))
}

/// Like [`when`], but mounts nothing for the `false` case instead of an
/// `else` branch — the common "only show this if..." shape.
pub fn show<N, C, T>(condition: C, then_branch: T) -> Slot<N>
where
    N: GenericNode,
    C: Fn() -> bool + Send + 'static,
    T: Fn() -> TemplateResult<N> + Send + 'static,
{
    Slot::Content(Reactive::Dynamic(Box::new(move || {
        if condition() {
            NodeContent::Template(then_branch())
        } else {
            NodeContent::None
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::html;
    use crate::test_host::TestNode;
    use reactive_core::{flush_effects, Signal};

    #[test]
    fn when_switches_branch_on_condition_change() {
        let flag = Signal::new(true);
        let flag_for_cond = flag.clone();
        let slot = when(
            move || flag_for_cond.get(),
            || html(&["<b>yes</b>"], vec![]),
            || html(&["<i>no</i>"], vec![]),
        );
        let wrapper_tpl: TemplateResult<TestNode> = html(&["<div>", "</div>"], vec![slot]);
        let host = TestNode::create_element("section");
        wrapper_tpl.mount(&host);

        let div = &wrapper_tpl.roots[0];
        assert!(div.child_nodes().iter().any(|n| n.tag().as_deref() == Some("b")));

        flag.set(false);
        flush_effects();
        assert!(div.child_nodes().iter().any(|n| n.tag().as_deref() == Some("i")));
        assert!(!div.child_nodes().iter().any(|n| n.tag().as_deref() == Some("b")));
    }

    #[test]
    fn show_mounts_nothing_when_condition_is_false() {
        let visible = Signal::new(false);
        let visible_for_cond = visible.clone();
        let slot = show(move || visible_for_cond.get(), || html(&["<p>hi</p>"], vec![]));
        let wrapper_tpl: TemplateResult<TestNode> = html(&["<div>", "</div>"], vec![slot]);
        let host = TestNode::create_element("section");
        wrapper_tpl.mount(&host);

        let div = &wrapper_tpl.roots[0];
        assert!(!div.child_nodes().iter().any(|n| n.tag().as_deref() == Some("p")));

        visible.set(true);
        flush_effects();
        assert!(div.child_nodes().iter().any(|n| n.tag().as_deref() == Some("p")));
    }
}
