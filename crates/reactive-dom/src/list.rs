//! Keyed list reconciliation (spec §4.5's "Keyed list reconciliation",
//! §3's `EachEntry`).
//!
//! `each()` produces a [`crate::template::Slot::List`] value. Mounting it
//! creates an [`EachBinding`] anchored between a sentinel comment pair
//! (mirroring the reactive-slot sentinel convention in `template.rs`'s
//! `bind_content`); an [`reactive_core::Effect`] tracking the items signal
//! re-runs the reconciliation below on every write.
//!
//! Reconciliation contract (spec §4.5):
//! - a key that persists across an update keeps its `Entry`'s `TemplateResult`
//!   and DOM nodes; its item/index signals are updated in place instead of
//!   remounting;
//! - a new key mounts a fresh entry via the per-item template function;
//! - a key that disappears is disposed before its nodes are removed;
//! - duplicate keys within one snapshot are last-wins (`DESIGN.md`'s answer
//!   to spec §9 Open Question (a));
//! - final DOM order matches array order, moving only the nodes that are
//!   out of place.
//!
//! Reusing a persisted key's `Entry` updates its item/index signals, which
//! schedules that row's own bound-text effect (from `template.rs`'s
//! `bind_text`) as a second, independent entry on the effect scheduler —
//! distinct from this binding's own reconciliation effect that is still
//! running. Converging on a list mutation is therefore a cascade, not a
//! single drain: callers must settle it with [`reactive_core::flush`],
//! not [`reactive_core::flush_effects`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use send_wrapper::SendWrapper;

use reactive_core::{Effect, Signal};

use crate::node::GenericNode;
use crate::template::{Disposable, EachSlotFactory, Slot, TemplateResult};

struct Entry<N: GenericNode, T> {
    item: Signal<T>,
    index: Signal<usize>,
    template: TemplateResult<N>,
}

/// The live keyed-list binding (spec §3's `EachEntry` collection, owned as a
/// whole by the enclosing [`crate::template::Binding::List`]).
pub(crate) struct EachBinding<N, T, K>
where
    N: GenericNode,
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
{
    effect: Effect,
    state: Arc<Mutex<HashMap<K, Entry<N, T>>>>,
}

impl<N, T, K> Disposable for EachBinding<N, T, K>
where
    N: GenericNode,
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
{
    fn dispose(&self) {
        self.effect.dispose();
        for (_, entry) in self.state.lock().drain() {
            entry.template.dispose();
        }
    }
}

impl<N, T, K> EachBinding<N, T, K>
where
    N: GenericNode,
    T: Clone + PartialEq + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
{
    fn new<KeyFn, TplFn>(start: N, end: N, items: Signal<Vec<T>>, key_fn: KeyFn, template_fn: TplFn) -> Self
    where
        KeyFn: Fn(&T) -> K + Send + 'static,
        TplFn: Fn(Signal<T>, Signal<usize>) -> TemplateResult<N> + Send + 'static,
    {
        let state: Arc<Mutex<HashMap<K, Entry<N, T>>>> = Arc::new(Mutex::new(HashMap::new()));
        let state_for_effect = SendWrapper::new(Arc::clone(&state));
        // Kept only so the sentinel pair reads symmetrically with
        // `bind_content`'s (start, end); the reconciliation below only needs
        // `end` to anchor insertion.
        let _start = SendWrapper::new(start);
        let end = SendWrapper::new(end);

        let effect = Effect::new(move || {
            let new_items = items.get();

            // Last-wins dedupe (spec §9 Open Question (a)): record the final
            // index each key maps to before building entries.
            let mut keys = Vec::with_capacity(new_items.len());
            let mut last_index_for_key: HashMap<K, usize> = HashMap::with_capacity(new_items.len());
            for (i, item) in new_items.iter().enumerate() {
                let k = key_fn(item);
                last_index_for_key.insert(k.clone(), i);
                keys.push(k);
            }

            let mut old = state_for_effect.lock();
            let mut new_state: HashMap<K, Entry<N, T>> = HashMap::with_capacity(last_index_for_key.len());
            let mut ordered_nodes: Vec<Vec<N>> = Vec::with_capacity(last_index_for_key.len());

            for (i, item) in new_items.into_iter().enumerate() {
                let key = keys[i].clone();
                if last_index_for_key.get(&key) != Some(&i) {
                    continue; // superseded by a later duplicate of the same key
                }

                let entry = match old.remove(&key) {
                    Some(entry) => {
                        entry.item.set(item);
                        entry.index.set(i);
                        entry
                    }
                    None => {
                        let item_signal = Signal::new(item);
                        let index_signal = Signal::new(i);
                        let template = template_fn(item_signal, index_signal);
                        Entry {
                            item: item_signal,
                            index: index_signal,
                            template,
                        }
                    }
                };

                ordered_nodes.push(entry.template.root_nodes().to_vec());
                new_state.insert(key, entry);
            }

            // Keys that disappeared: dispose before their nodes are removed.
            for (_, removed) in old.drain() {
                removed.template.dispose();
            }

            // Single O(n) pass, back to front: a node only moves if it isn't
            // already directly before the already-settled suffix.
            if let Some(parent) = end.parent_node() {
                let mut cursor = (*end).clone();
                for row in ordered_nodes.iter().rev() {
                    for node in row.iter().rev() {
                        if node.next_sibling().as_ref() != Some(&cursor) {
                            parent.insert_before(node, Some(&cursor));
                        }
                        cursor = node.clone();
                    }
                }
            }

            *old = new_state;
        });

        Self { effect, state }
    }
}

/// Render a keyed list: `items` is a reactive array, `key_fn` derives a
/// stable key per element, and `template_fn` builds the per-row template
/// from that row's item and index signals (spec §4.5).
///
/// The result is a [`Slot::List`] value, placed in a template's text
/// position exactly like [`Slot::Content`] / [`Slot::Text`].
pub fn each<N, T, K, KeyFn, TplFn>(items: Signal<Vec<T>>, key_fn: KeyFn, template_fn: TplFn) -> Slot<N>
where
    N: GenericNode,
    T: Clone + PartialEq + Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    KeyFn: Fn(&T) -> K + Send + 'static,
    TplFn: Fn(Signal<T>, Signal<usize>) -> TemplateResult<N> + Send + 'static,
{
    let factory: EachSlotFactory<N> = Box::new(move |start, end| {
        Box::new(EachBinding::new(start, end, items, key_fn, template_fn))
    });
    Slot::List(factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{html, Reactive};
    use crate::test_host::TestNode;
    use reactive_core::flush;

    #[derive(Clone, PartialEq, Debug)]
    struct Row {
        id: String,
        text: String,
    }

    fn row_template(item: Signal<Row>, _index: Signal<usize>) -> TemplateResult<TestNode> {
        html(
            &["<li>", "</li>"],
            vec![Slot::Text(Reactive::Dynamic(Box::new(move || item.get().text)))],
        )
    }

    fn mounted_list(items: Signal<Vec<Row>>) -> (TestNode, TemplateResult<TestNode>) {
        let host = TestNode::create_element("ul");
        let slot = each(items, |r: &Row| r.id.clone(), row_template);
        let list_tpl = html(&["", ""], vec![slot]);
        list_tpl.mount(&host);
        (host, list_tpl)
    }

    fn row_texts(host: &TestNode) -> Vec<String> {
        host.child_nodes()
            .into_iter()
            .filter(|n| n.tag().as_deref() == Some("li"))
            .map(|li| li.child_nodes()[0].text_data())
            .collect()
    }

    #[test]
    fn mounts_initial_rows_in_order() {
        let items = Signal::new(vec![
            Row { id: "1".into(), text: "A".into() },
            Row { id: "2".into(), text: "B".into() },
        ]);
        let (host, _tpl) = mounted_list(items);
        assert_eq!(row_texts(&host), vec!["A", "B"]);
    }

    #[test]
    fn reordering_keys_moves_nodes_without_recreating_them() {
        let items = Signal::new(vec![
            Row { id: "1".into(), text: "A".into() },
            Row { id: "2".into(), text: "B".into() },
            Row { id: "3".into(), text: "C".into() },
        ]);
        let (host, _tpl) = mounted_list(items.clone());
        let before: Vec<TestNode> = host
            .child_nodes()
            .into_iter()
            .filter(|n| n.tag().as_deref() == Some("li"))
            .collect();

        items.set(vec![
            Row { id: "3".into(), text: "C".into() },
            Row { id: "2".into(), text: "B".into() },
            Row { id: "1".into(), text: "A".into() },
        ]);
        flush();

        assert_eq!(row_texts(&host), vec!["C", "B", "A"]);
        let after: Vec<TestNode> = host
            .child_nodes()
            .into_iter()
            .filter(|n| n.tag().as_deref() == Some("li"))
            .collect();
        // Same three node identities, just reordered.
        assert_eq!(after.len(), before.len());
        for node in &after {
            assert!(before.contains(node), "reorder must reuse existing DOM nodes");
        }
    }

    #[test]
    fn removed_keys_are_disposed_and_new_keys_mount() {
        let items = Signal::new(vec![
            Row { id: "1".into(), text: "A".into() },
            Row { id: "2".into(), text: "B".into() },
        ]);
        let (host, _tpl) = mounted_list(items.clone());

        items.set(vec![
            Row { id: "2".into(), text: "B".into() },
            Row { id: "3".into(), text: "C".into() },
        ]);
        flush();

        assert_eq!(row_texts(&host), vec!["B", "C"]);
    }

    #[test]
    fn in_place_update_reuses_template_and_updates_text() {
        let items = Signal::new(vec![Row { id: "1".into(), text: "A".into() }]);
        let (host, _tpl) = mounted_list(items.clone());
        let before = host.child_nodes()[0].clone();

        items.set(vec![Row { id: "1".into(), text: "A2".into() }]);
        flush();

        assert_eq!(row_texts(&host), vec!["A2"]);
        assert_eq!(host.child_nodes()[0], before, "same key must keep the same node");
    }

    #[test]
    fn duplicate_keys_in_one_snapshot_are_last_wins() {
        let items = Signal::new(vec![
            Row { id: "1".into(), text: "first".into() },
            Row { id: "1".into(), text: "second".into() },
        ]);
        let (host, _tpl) = mounted_list(items);
        assert_eq!(row_texts(&host), vec!["second"]);
    }
}
