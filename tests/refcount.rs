//! Reference counting across attach, detach and repair.
//!
//! The counts the tracker keeps lazily are compared against an independent walk of the
//! graph from the trailer.

use std::collections::HashMap;

use pdfgraph::prelude::*;

/// Counts every reference occurrence reachable from the trailer, entering each object once
fn reachable_counts(tracker: &Tracker) -> HashMap<ObjectId, i64> {
    let mut counts = HashMap::new();
    let mut nodes = vec![tracker.trailer()];
    while let Some(node) = nodes.pop() {
        let node = tracker.node(node).unwrap();
        for child in node.kind().children() {
            match child {
                Value::Node(inner) => nodes.push(*inner),
                Value::Reference(reference) => {
                    let count = counts.entry(reference.id()).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        if let Ok(Value::Node(inner)) = tracker.deref(*reference) {
                            nodes.push(*inner);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    counts
}

fn assert_counts_exact(tracker: &Tracker) {
    let expected = reachable_counts(tracker);
    for (reference, entry) in tracker.references() {
        match expected.get(&reference.id()) {
            Some(count) => assert_eq!(
                entry.refcount(),
                *count,
                "count of {} differs from the graph",
                reference
            ),
            None => assert!(
                entry.refcount() < 1,
                "{} is counted but unreachable",
                reference
            ),
        }
    }
}

/// Small deterministic generator so the operation sequence is reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) as usize) % bound
    }
}

fn fresh_object(tracker: &mut Tracker, tag: i64) -> ObjectRef {
    let node = tracker.new_dictionary();
    tracker.set(node, "Tag", Value::Integer(tag)).unwrap();
    tracker.create_reference(node.into()).unwrap()
}

fn node_of(tracker: &Tracker, reference: ObjectRef) -> Option<NodeId> {
    tracker.deref(reference).ok().and_then(Value::as_node)
}

#[test]
fn counts_are_conserved_under_attach_and_detach() {
    let mut tracker = Tracker::new();
    // Deep enough that the probe never gives up on the acyclic graphs built here
    tracker.set_cycle_probe_depth(256);
    let top = tracker.new_array();
    tracker.set(tracker.trailer(), "Top", top.into()).unwrap();

    let mut pool: Vec<ObjectRef> = (0..40).map(|tag| fresh_object(&mut tracker, tag)).collect();
    let mut random = Lcg(0x5eed);

    for step in 0..600 {
        // Dead slots are replaced so the pool never runs dry
        for (slot, reference) in pool.iter_mut().enumerate() {
            if tracker.entry(*reference).is_err() {
                *reference = fresh_object(&mut tracker, (step * 100 + slot) as i64);
            }
        }

        let low = random.next(pool.len());
        let high = random.next(pool.len());
        let (parent, child) = (low.min(high), low.max(high));
        match random.next(4) {
            // Links only ever point from a lower to a higher pool slot, so no cycles form
            0 if parent != child => {
                if let Some(node) = node_of(&tracker, pool[parent]) {
                    let key = format!("L{}", random.next(3));
                    tracker.set(node, key, pool[child].into()).unwrap();
                }
            }
            1 => tracker.push(top, pool[child].into()).unwrap(),
            2 => {
                let length = tracker.array(top).unwrap().len();
                if length > 0 {
                    let removed = tracker.remove_at(top, random.next(length)).unwrap();
                    tracker.discard(removed).unwrap();
                }
            }
            _ => {
                if let Some(node) = node_of(&tracker, pool[parent]) {
                    let key = format!("L{}", random.next(3));
                    if let Some(removed) = tracker.remove(node, &key).unwrap() {
                        tracker.discard(removed).unwrap();
                    }
                }
            }
        }

        assert!(!tracker.is_dirty(), "acyclic graph marked dirty at step {}", step);
        assert_counts_exact(&tracker);
    }

    let report = tracker.fix_res_table(&[]);
    assert_counts_exact(&tracker);
    assert_eq!(report.live, tracker.reference_count());
    assert!(tracker.references().all(|(_, entry)| entry.refcount() >= 1));
}

#[test]
fn shared_object_is_released_with_its_last_holder() {
    let mut tracker = Tracker::new();
    let catalog = tracker.new_dictionary();
    tracker.set(catalog, "Type", Value::name("Catalog")).unwrap();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();

    let child = tracker.new_dictionary();
    tracker.set(child, "Marker", Value::string(b"child".to_vec())).unwrap();
    let child = tracker.create_reference(child.into()).unwrap();
    let shared = tracker.new_dictionary();
    tracker.set(shared, "Marker", Value::string(b"shared".to_vec())).unwrap();
    tracker.set(shared, "Child", child.into()).unwrap();
    let shared = tracker.create_reference(shared.into()).unwrap();

    tracker.set(catalog, "A", shared.into()).unwrap();
    tracker.set(catalog, "B", shared.into()).unwrap();
    assert_eq!(tracker.entry(shared).unwrap().refcount(), 2);
    assert_eq!(tracker.entry(child).unwrap().refcount(), 1);

    let options = SaveOptions::classic().with_flags(SaveFlags::empty());
    let codecs = CodecSet::default();
    let before = tracker.save(&options, &codecs).unwrap();
    assert!(String::from_utf8_lossy(&before).contains("(shared)"));

    tracker.remove(catalog, "A").unwrap();
    assert_eq!(tracker.entry(shared).unwrap().refcount(), 1);
    assert_eq!(tracker.entry(child).unwrap().refcount(), 1);
    assert!(!tracker.is_dirty());

    tracker.remove(catalog, "B").unwrap();
    assert!(tracker.entry(shared).is_err());
    assert!(tracker.entry(child).is_err());

    let after = tracker.save(&options, &codecs).unwrap();
    let text = String::from_utf8_lossy(&after);
    assert!(!text.contains("Marker"));
    assert!(text.contains("/Size 2"));
}

#[test]
fn detached_cycle_is_repaired() {
    let mut tracker = Tracker::new();
    let holder = tracker.new_dictionary();
    tracker.set(tracker.trailer(), "Holder", holder.into()).unwrap();

    let a = fresh_object(&mut tracker, 1);
    let b = fresh_object(&mut tracker, 2);
    let a_node = node_of(&tracker, a).unwrap();
    let b_node = node_of(&tracker, b).unwrap();
    tracker.set(a_node, "Next", b.into()).unwrap();
    tracker.set(b_node, "Next", a.into()).unwrap();
    tracker.set(holder, "Loop", a.into()).unwrap();
    assert_eq!(tracker.entry(a).unwrap().refcount(), 2);
    assert_eq!(tracker.entry(b).unwrap().refcount(), 1);

    tracker.remove(holder, "Loop").unwrap();
    assert!(tracker.is_dirty());
    assert_eq!(tracker.reference_count(), 2);

    let report = tracker.fix_res_table(&[]);
    assert_eq!(report.pruned, 2);
    assert_eq!(report.live, 0);
    assert!(!tracker.is_dirty());
    assert!(tracker.entry(a).is_err());

    // A second pass has nothing left to do
    assert_eq!(tracker.fix_res_table(&[]).pruned, 0);
}

#[test]
fn save_repairs_dirty_counts_first() {
    let mut tracker = Tracker::new();
    let catalog = tracker.new_dictionary();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();

    let a = fresh_object(&mut tracker, 1);
    let b = fresh_object(&mut tracker, 2);
    tracker.set(node_of(&tracker, a).unwrap(), "Next", b.into()).unwrap();
    tracker.set(node_of(&tracker, b).unwrap(), "Next", a.into()).unwrap();
    tracker.set(catalog, "Loop", a.into()).unwrap();
    tracker.remove(catalog, "Loop").unwrap();
    assert!(tracker.is_dirty());

    let layout = tracker
        .build_index(&SaveOptions::classic(), &CodecSet::default())
        .unwrap();
    assert!(!tracker.is_dirty());
    assert_eq!(layout.size(), 2);
    assert_eq!(tracker.reference_count(), 1);
}
