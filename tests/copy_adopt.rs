//! Moving and copying values between documents.

use std::collections::HashMap;

use pdfgraph::{object::NodeKind, prelude::*};

/// Structural rendering that ignores identities; references are numbered in visit order
fn render(tracker: &Tracker, value: &Value, seen: &mut Vec<ObjectId>) -> String {
    match value {
        Value::Node(node) => match tracker.node(*node).unwrap().kind() {
            NodeKind::Array(array) => {
                let items: Vec<String> = array.iter().map(|item| render(tracker, item, seen)).collect();
                format!("[{}]", items.join(" "))
            }
            NodeKind::Dictionary(dict) => render_dictionary(tracker, dict, seen),
            NodeKind::Stream(stream) => format!(
                "{} stream({})",
                render_dictionary(tracker, stream.dict(), seen),
                stream.data().len()
            ),
        },
        Value::Reference(reference) => {
            if let Some(position) = seen.iter().position(|id| *id == reference.id()) {
                return format!("#{position}");
            }
            seen.push(reference.id());
            let inner = tracker.deref(*reference).unwrap().clone();
            format!("@{}", render(tracker, &inner, seen))
        }
        primitive => format!("{primitive:?}"),
    }
}

fn render_dictionary(tracker: &Tracker, dict: &Dictionary, seen: &mut Vec<ObjectId>) -> String {
    let mut keys: Vec<&Name> = dict.keys().collect();
    keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let entries: Vec<String> = keys
        .into_iter()
        .map(|key| {
            let value = dict.get(key.as_str()).unwrap();
            format!("/{} {}", key, render(tracker, value, seen))
        })
        .collect();
    format!("<<{}>>", entries.join(" "))
}

/// A detached font resource tree: a dictionary with an array and a shared reference
fn build_resources(tracker: &mut Tracker) -> Value {
    let font = tracker.new_dictionary();
    tracker.set(font, "Type", Value::name("Font")).unwrap();
    tracker.set(font, "BaseFont", Value::name("Helvetica")).unwrap();
    let font = tracker.create_reference(font.into()).unwrap();

    let widths = tracker.new_array();
    for width in [250, 333, 408] {
        tracker.push(widths, Value::Integer(width)).unwrap();
    }

    let resources = tracker.new_dictionary();
    tracker.set(resources, "Widths", widths.into()).unwrap();
    tracker.set(resources, "F1", font.into()).unwrap();
    tracker.set(resources, "F2", font.into()).unwrap();
    tracker.set(resources, "Scale", Value::Real(0.5)).unwrap();
    tracker.set(resources, "Label", Value::string(b"body".to_vec())).unwrap();
    resources.into()
}

#[test]
fn adopt_and_copy_produce_the_same_structure() {
    let mut adopt_source = Tracker::new();
    let mut copy_source = Tracker::new();
    let adopt_root = build_resources(&mut adopt_source);
    let copy_root = build_resources(&mut copy_source);
    let expected = render(&adopt_source, &adopt_root, &mut Vec::new());
    assert_eq!(expected, render(&copy_source, &copy_root, &mut Vec::new()));

    let mut adopt_dest = Tracker::new();
    let total_before = adopt_source.node_count() + adopt_dest.node_count();
    let adopted = adopt_dest.adopt(&mut adopt_source, adopt_root).unwrap();
    assert_eq!(render(&adopt_dest, &adopted, &mut Vec::new()), expected);
    assert_eq!(adopt_source.node_count() + adopt_dest.node_count(), total_before);
    assert_eq!(adopt_source.node_count(), 1);
    assert_eq!(adopt_source.reference_count(), 0);
    assert_eq!(adopt_dest.reference_count(), 1);

    let mut copy_dest = Tracker::new();
    let total_before = copy_source.node_count() + copy_dest.node_count();
    let copied = copy_dest
        .make_copy(&copy_source, copy_root.clone(), &mut NoRetarget)
        .unwrap();
    assert_eq!(render(&copy_dest, &copied, &mut Vec::new()), expected);
    assert_eq!(copy_source.node_count() + copy_dest.node_count(), total_before + 3);
    assert_eq!(render(&copy_source, &copy_root, &mut Vec::new()), expected);
}

#[test]
fn import_copies_what_cannot_be_adopted() {
    let mut source = Tracker::new();
    let resources = build_resources(&mut source);
    let holder = source.new_dictionary();
    source.set(holder, "Resources", resources.clone()).unwrap();
    source.set(source.trailer(), "Holder", holder.into()).unwrap();
    let expected = render(&source, &resources, &mut Vec::new());

    let mut dest = Tracker::new();
    let imported = dest.import(&mut source, resources.clone(), &mut NoRetarget).unwrap();
    assert_eq!(render(&dest, &imported, &mut Vec::new()), expected);
    // The source still owns and counts its tree
    assert_eq!(source.get(holder, "Resources").unwrap(), Some(&resources));
    assert_eq!(source.reference_count(), 1);
    assert!(source.references().all(|(_, entry)| entry.refcount() == 2));
}

#[test]
fn reference_cycle_is_reproduced_once() {
    let mut source = Tracker::new();
    let first = source.new_dictionary();
    let first_ref = source.create_reference(first.into()).unwrap();
    let second = source.new_dictionary();
    source.set(second, "Other", first_ref.into()).unwrap();
    let second_ref = source.create_reference(second.into()).unwrap();
    source.set(first, "Other", second_ref.into()).unwrap();

    let mut dest = Tracker::new();
    let copied = dest
        .make_copy(&source, first_ref.into(), &mut NoRetarget)
        .unwrap();
    assert_eq!(dest.reference_count(), 2);

    let local_first = copied.as_reference().unwrap();
    let local_first_node = dest.deref(local_first).unwrap().as_node().unwrap();
    let local_second = dest
        .get(local_first_node, "Other")
        .unwrap()
        .and_then(Value::as_reference)
        .unwrap();
    let local_second_node = dest.deref(local_second).unwrap().as_node().unwrap();
    assert_eq!(
        dest.get(local_second_node, "Other").unwrap(),
        Some(&Value::Reference(local_first))
    );
    assert_ne!(local_first, local_second);
    assert!(dest.references().all(|(_, entry)| !entry.is_placeholder()));
}

#[test]
fn direct_loop_is_refused() {
    let mut tracker = Tracker::new();
    let outer = tracker.new_dictionary();
    let inner = tracker.new_array();
    tracker.set(outer, "Inner", inner.into()).unwrap();
    let result = tracker.push(inner, outer.into());
    assert!(matches!(result, Err(Error::CircularDirectReference { .. })));
    // Nothing changed
    assert!(tracker.array(inner).unwrap().is_empty());
}

/// Wraps a [`PageMap`] and records how often each singleton was asked for
struct CountingMap {
    inner: PageMap,
    calls: HashMap<NodeId, usize>,
}

impl Retarget for CountingMap {
    fn retarget(
        &mut self,
        dest: &mut Tracker,
        source: &Tracker,
        request: RetargetRequest,
    ) -> Result<Value> {
        *self.calls.entry(request.node).or_insert(0) += 1;
        self.inner.retarget(dest, source, request)
    }
}

#[test]
fn pinned_singletons_are_retargeted_once_each() {
    let mut source = Document::new().unwrap();
    let first = source.add_page().unwrap();
    let second = source.add_page().unwrap();
    let catalog = source.catalog();

    let annotation = {
        let tracker = source.tracker_mut();
        let annotation = tracker.new_dictionary();
        tracker.set(annotation, "P", first.into()).unwrap();
        let destination = tracker.new_array();
        tracker.push(destination, first.into()).unwrap();
        tracker.push(destination, Value::name("Fit")).unwrap();
        tracker.set(annotation, "Dest", destination.into()).unwrap();
        tracker.set(annotation, "Next", second.into()).unwrap();
        tracker.set(annotation, "Root", catalog.into()).unwrap();
        annotation
    };

    let mut dest = Document::new().unwrap();
    let local_first = dest.add_page().unwrap();
    let local_second = dest.add_page().unwrap();
    let mut map = PageMap::new(dest.catalog(), dest.page_tree());
    map.map_page(source.page_node(first).unwrap(), local_first);
    map.map_page(source.page_node(second).unwrap(), local_second);
    let mut counting = CountingMap {
        inner: map,
        calls: HashMap::new(),
    };

    let copied = dest
        .tracker_mut()
        .make_copy(source.tracker(), annotation.into(), &mut counting)
        .unwrap();

    assert_eq!(counting.calls.len(), 3);
    assert!(counting.calls.values().all(|calls| *calls == 1));
    assert_eq!(dest.page_count().unwrap(), 2);

    let tracker = dest.tracker();
    let local = copied.as_node().unwrap();
    assert_eq!(tracker.get(local, "P").unwrap(), Some(&Value::Reference(local_first)));
    assert_eq!(tracker.get(local, "Next").unwrap(), Some(&Value::Reference(local_second)));
    assert_eq!(
        tracker.get(local, "Root").unwrap(),
        Some(&Value::Reference(dest.catalog()))
    );
    let destination = tracker.get(local, "Dest").unwrap().and_then(Value::as_node).unwrap();
    assert_eq!(
        tracker.array(destination).unwrap().get(0),
        Some(&Value::Reference(local_first))
    );
}

#[test]
fn cache_deduplicates_repeated_copies() {
    let mut source = Tracker::new();
    let font = source.new_dictionary();
    source.set(font, "Type", Value::name("Font")).unwrap();
    let font = source.create_reference(font.into()).unwrap();

    let mut dest = Tracker::new();
    dest.enable_cache();
    let first = dest.make_copy(&source, font.into(), &mut NoRetarget).unwrap();
    let second = dest.make_copy(&source, font.into(), &mut NoRetarget).unwrap();
    assert_eq!(first, second);
    assert_eq!(dest.reference_count(), 1);

    dest.disable_cache();
    let third = dest.make_copy(&source, font.into(), &mut NoRetarget).unwrap();
    assert_ne!(first, third);
    assert_eq!(dest.reference_count(), 2);
}
