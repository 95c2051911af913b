//! Graph factories shared by the unit tests.

use crate::{
    object::{NodeId, ObjectRef, Value},
    Tracker,
};

/// Adds a `/Type /Catalog` dictionary as the trailer's `/Root`.
///
/// Returns the catalog reference and its node.
pub fn with_catalog(tracker: &mut Tracker) -> (ObjectRef, NodeId) {
    let catalog = tracker.new_dictionary();
    tracker.set(catalog, "Type", Value::name("Catalog")).unwrap();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();
    (root, catalog)
}

/// Creates `count` referenced dictionaries, each pointing at the next through `/Next`.
///
/// Nothing links the head; the caller decides where the chain hangs.
pub fn reference_chain(tracker: &mut Tracker, count: usize) -> Vec<ObjectRef> {
    let mut chain: Vec<ObjectRef> = Vec::with_capacity(count);
    for position in 0..count {
        let node = tracker.new_dictionary();
        tracker
            .set(node, "Position", Value::Integer(position as i64))
            .unwrap();
        chain.push(tracker.create_reference(node.into()).unwrap());
    }
    for pair in chain.windows(2) {
        let node = tracker.deref(pair[0]).unwrap().as_node().unwrap();
        tracker.set(node, "Next", pair[1].into()).unwrap();
    }
    chain
}

/// Creates two referenced dictionaries that point at each other through `/Other`
pub fn reference_cycle(tracker: &mut Tracker) -> (ObjectRef, ObjectRef) {
    let a_node = tracker.new_dictionary();
    let a = tracker.create_reference(a_node.into()).unwrap();
    let b_node = tracker.new_dictionary();
    let b = tracker.create_reference(b_node.into()).unwrap();
    tracker.set(a_node, "Other", b.into()).unwrap();
    tracker.set(b_node, "Other", a.into()).unwrap();
    (a, b)
}
