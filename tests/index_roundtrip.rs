//! Save, load and save again, comparing layouts and structure.

use pdfgraph::{index::MAX_INLINE_DEPTH, object::NodeKind, prelude::*};

fn render(tracker: &Tracker, value: &Value, seen: &mut Vec<ObjectId>) -> String {
    match value {
        Value::Node(node) => match tracker.node(*node).unwrap().kind() {
            NodeKind::Array(array) => {
                let items: Vec<String> = array.iter().map(|item| render(tracker, item, seen)).collect();
                format!("[{}]", items.join(" "))
            }
            NodeKind::Dictionary(dict) => {
                let mut entries: Vec<String> = dict
                    .iter()
                    .map(|(key, value)| format!("/{} {}", key, render(tracker, value, seen)))
                    .collect();
                entries.sort();
                format!("<<{}>>", entries.join(" "))
            }
            // Stream dictionaries carry generated entries, so only the payload is compared
            NodeKind::Stream(stream) => format!("stream({:?})", stream.data()),
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

fn render_root(tracker: &Tracker) -> String {
    let root = tracker.get(tracker.trailer(), "Root").unwrap().unwrap().clone();
    render(tracker, &root, &mut Vec::new())
}

/// Two pages sharing a font, each with a content stream, and a link from the first to the
/// second
fn sample_document() -> Document {
    let mut document = Document::new().unwrap();
    let first = document.add_page().unwrap();
    let second = document.add_page().unwrap();
    let first_node = document.page_node(first).unwrap();
    let second_node = document.page_node(second).unwrap();

    let tracker = document.tracker_mut();
    let font = tracker.new_dictionary();
    tracker.set(font, "Type", Value::name("Font")).unwrap();
    tracker.set(font, "BaseFont", Value::name("Courier")).unwrap();
    let font = tracker.create_reference(font.into()).unwrap();

    for (page, text) in [(first_node, "first"), (second_node, "second")] {
        let fonts = tracker.new_dictionary();
        tracker.set(fonts, "F1", font.into()).unwrap();
        let resources = tracker.new_dictionary();
        tracker.set(resources, "Font", fonts.into()).unwrap();
        tracker.set(page, "Resources", resources.into()).unwrap();

        let content = format!("BT /F1 12 Tf ({text}) Tj ET");
        let stream = tracker.new_stream(content.into_bytes());
        tracker.set(page, "Contents", stream.into()).unwrap();
    }

    let link = tracker.new_dictionary();
    tracker.set(link, "Subtype", Value::name("Link")).unwrap();
    let destination = tracker.new_array();
    tracker.push(destination, second.into()).unwrap();
    tracker.push(destination, Value::name("Fit")).unwrap();
    tracker.set(link, "Dest", destination.into()).unwrap();
    let annotations = tracker.new_array();
    tracker.push(annotations, link.into()).unwrap();
    tracker.set(first_node, "Annots", annotations.into()).unwrap();

    let info = tracker.new_dictionary();
    tracker.set(info, "Title", Value::string(b"Round trip".to_vec())).unwrap();
    let info = tracker.create_reference(info.into()).unwrap();
    tracker.set(tracker.trailer(), "Info", info.into()).unwrap();
    document
}

fn assert_stable_round_trip(options: &SaveOptions) {
    let codecs = CodecSet::default();
    let mut document = sample_document();
    let first_bytes = document.save(options, &codecs).unwrap();

    let (mut loaded, _) = load(&first_bytes, &codecs).unwrap();
    let first_layout = loaded.build_index(options, &codecs).unwrap();
    let second_bytes = loaded.save(options, &codecs).unwrap();

    let (mut reloaded, _) = load(&second_bytes, &codecs).unwrap();
    let second_layout = reloaded.build_index(options, &codecs).unwrap();

    assert_eq!(first_layout.partition(), second_layout.partition());
    assert_eq!(first_layout.size(), second_layout.size());
    assert_eq!(render_root(&loaded), render_root(&reloaded));

    let document = Document::from_tracker(reloaded, options.version()).unwrap();
    assert_eq!(document.page_count().unwrap(), 2);
}

#[test]
fn default_layout_is_stable() {
    let options = SaveOptions::default();
    assert_stable_round_trip(&options);

    let mut document = sample_document();
    let layout = document
        .tracker_mut()
        .build_index(&options, &CodecSet::default())
        .unwrap();
    let partition = layout.partition();
    assert!(layout.xref_number().is_some());
    assert_eq!(partition.object_streams, 1);
    // The shared font is the only object eligible for an object stream
    assert_eq!(partition.compressed, 1);
}

#[test]
fn classic_layout_is_stable() {
    let options = SaveOptions::classic();
    assert_stable_round_trip(&options);

    let mut document = sample_document();
    let layout = document
        .tracker_mut()
        .build_index(&options, &CodecSet::default())
        .unwrap();
    let partition = layout.partition();
    assert!(layout.xref_number().is_none());
    assert_eq!(partition.object_streams, 0);
    assert_eq!(partition.compressed, 0);
}

#[test]
fn object_streams_are_bounded_and_well_formed() {
    let mut tracker = Tracker::new();
    let catalog = tracker.new_dictionary();
    tracker.set(catalog, "Type", Value::name("Catalog")).unwrap();
    let items = tracker.new_array();
    tracker.set(catalog, "Items", items.into()).unwrap();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();

    for index in 0..300 {
        let item = tracker.new_dictionary();
        tracker.set(item, "I", Value::Integer(index)).unwrap();
        let item = tracker.create_reference(item.into()).unwrap();
        tracker.set_save_mode(item, SaveMode::Compressed).unwrap();
        tracker.push(items, item.into()).unwrap();
    }

    // Without COMPRESS_STREAMS the payloads stay readable
    let options = SaveOptions::default()
        .with_flags(SaveFlags::OBJECT_STREAMS)
        .with_object_stream_capacity(255)
        .unwrap();
    let codecs = CodecSet::default();
    let layout = tracker.build_index(&options, &codecs).unwrap();

    let batches = layout.object_streams();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 255);
    assert_eq!(batches[1].len(), 45);

    for batch in batches {
        assert_eq!(batch.filter(), None);
        let payload = batch.payload();
        let bodies: Vec<&[u8]> = payload[batch.first()..]
            .split(|byte| *byte == b'\n')
            .filter(|body| !body.is_empty())
            .collect();
        assert_eq!(bodies.len(), batch.len());

        let mut offset = 0;
        let mut pairs = Vec::new();
        for (member, body) in batch.members().iter().zip(&bodies) {
            pairs.push(format!("{member} {offset}"));
            offset += body.len() + 1;
            assert!(body.starts_with(b"<</I "));
        }
        let header = format!("{}\n", pairs.join(" "));
        assert_eq!(&payload[..batch.first()], header.as_bytes());
        assert!(!batch.members().contains(&batch.number()));
    }

    let bytes = tracker.save(&options, &codecs).unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("/Type /ObjStm /N 255 /First"));
    assert!(text.contains("/Type /ObjStm /N 45 /First"));

    let (loaded, _) = load(&bytes, &codecs).unwrap();
    let compressed = loaded
        .references()
        .filter(|(_, entry)| entry.save_mode() == SaveMode::Compressed)
        .count();
    assert_eq!(compressed, 300);
    assert_eq!(render_root(&loaded), render_root(&tracker));
}

#[test]
fn documents_round_trip_through_files() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("sample.pdf");
    let codecs = CodecSet::default();

    let mut document = sample_document();
    document
        .save_to_file(&path, &SaveOptions::default(), &codecs)
        .unwrap();

    let loaded = Document::load_file(&path, &codecs).unwrap();
    assert_eq!(loaded.page_count().unwrap(), 2);
    assert_eq!(loaded.version(), PdfVersion::default());

    let pages = loaded.pages().unwrap();
    let first = loaded.page_node(pages[0]).unwrap();
    let contents = loaded
        .tracker()
        .get(first, "Contents")
        .unwrap()
        .and_then(Value::as_reference)
        .unwrap();
    let stream = loaded.tracker().deref(contents).unwrap().as_node().unwrap();
    let filters = loaded.tracker().stream_filters(stream).unwrap();
    let payload = loaded.tracker().stream(stream).unwrap().data();
    let data = codecs.decode_chain(&filters, &[], payload).unwrap();
    assert_eq!(data, b"BT /F1 12 Tf (first) Tj ET");
}

/// Hangs `length` single-use dictionaries under `/First` of the catalog, each pointing at the
/// next through `/Next`
fn single_use_chain(length: usize) -> Tracker {
    let mut tracker = Tracker::new();
    let catalog = tracker.new_dictionary();
    tracker.set(catalog, "Type", Value::name("Catalog")).unwrap();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();

    let mut next: Option<ObjectRef> = None;
    for position in (0..length).rev() {
        let node = tracker.new_dictionary();
        tracker
            .set(node, "Position", Value::Integer(position as i64))
            .unwrap();
        if let Some(next) = next {
            tracker.set(node, "Next", next.into()).unwrap();
        }
        next = Some(tracker.create_reference(node.into()).unwrap());
    }
    tracker.set(catalog, "First", next.unwrap().into()).unwrap();
    tracker
}

/// Follows `/First` and `/Next` through references and inlined dictionaries alike
fn chain_positions(tracker: &Tracker) -> Vec<i64> {
    let root = tracker.get(tracker.trailer(), "Root").unwrap().unwrap().clone();
    let catalog = tracker.deref(root.as_reference().unwrap()).unwrap().as_node().unwrap();
    let mut positions = Vec::new();
    let mut link = tracker.get(catalog, "First").unwrap().cloned();
    while let Some(mut value) = link {
        while let Some(reference) = value.as_reference() {
            value = tracker.deref(reference).unwrap().clone();
        }
        let node = value.as_node().unwrap();
        positions.push(tracker.get(node, "Position").unwrap().unwrap().as_integer().unwrap());
        link = tracker.get(node, "Next").unwrap().cloned();
    }
    positions
}

#[test]
fn long_single_use_chains_load_back() {
    let codecs = CodecSet::default();
    for options in [SaveOptions::classic(), SaveOptions::default()] {
        let mut tracker = single_use_chain(300);
        let bytes = tracker.save(&options, &codecs).unwrap();
        let (loaded, _) = load(&bytes, &codecs).unwrap();
        let expected: Vec<i64> = (0..300).collect();
        assert_eq!(chain_positions(&loaded), expected);
    }
}

#[test]
fn very_long_chains_are_written_in_bounded_depth() {
    let codecs = CodecSet::default();
    let mut tracker = single_use_chain(20_000);
    let layout = tracker.build_index(&SaveOptions::classic(), &codecs).unwrap();
    let partition = layout.partition();
    assert!(partition.indirect > 20_000 / MAX_INLINE_DEPTH);
    assert_eq!(partition.indirect + partition.direct, 20_001);

    let bytes = tracker.save(&SaveOptions::classic(), &codecs).unwrap();
    let (loaded, _) = load(&bytes, &codecs).unwrap();
    assert_eq!(chain_positions(&loaded).len(), 20_000);
}

#[test]
fn references_to_references_are_inlined_in_bounded_depth() {
    let codecs = CodecSet::default();
    let mut tracker = Tracker::new();
    let catalog = tracker.new_dictionary();
    let root = tracker.create_reference(catalog.into()).unwrap();
    tracker.set(tracker.trailer(), "Root", root.into()).unwrap();

    let mut value = Value::from(7);
    for _ in 0..1_000 {
        value = tracker.create_reference(value).unwrap().into();
    }
    tracker.set(catalog, "Deep", value).unwrap();

    let bytes = tracker.save(&SaveOptions::classic(), &codecs).unwrap();
    let (loaded, _) = load(&bytes, &codecs).unwrap();
    let root = loaded.get(loaded.trailer(), "Root").unwrap().unwrap().clone();
    let catalog = loaded.deref(root.as_reference().unwrap()).unwrap().as_node().unwrap();
    let mut value = loaded.get(catalog, "Deep").unwrap().unwrap().clone();
    let mut hops = 0;
    while let Some(reference) = value.as_reference() {
        value = loaded.deref(reference).unwrap().clone();
        hops += 1;
    }
    assert_eq!(value.as_integer(), Some(7));
    assert!(hops < 1_000);
}
