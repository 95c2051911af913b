//! Save layout construction.
//!
//! Before a document is written, the index builder turns the tracker table into an
//! [`IndexLayout`]: which reference is inlined, written as its own object, packed into an
//! object stream or dropped, which number each indexed object gets, and how the object
//! streams are batched.
//!
//! # Architecture
//!
//! Construction runs in phases, all before any byte is written:
//!
//! 1. **Repair**: [`crate::Tracker::fix_res_table`] if the dirty flag is raised
//! 2. **Reachability**: walk from the trailer; placeholders and unassigned modes abort
//! 3. **Mode resolution**: `Auto` becomes `Direct`, `Compressed` or `Indirect`; streams,
//!    pinned nodes and the catalog are forced to `Indirect` where needed
//! 4. **Cycle demotion**: a loop made only of `Direct` references would inline forever, one
//!    reference per loop is demoted to `Indirect`
//! 5. **Depth demotion**: a `Direct` reference nested deeper than [`MAX_INLINE_DEPTH`] inside
//!    its top-level object gets a body of its own, so no object outgrows what the reader
//!    accepts
//! 6. **Renumbering**: [`ObjectRemapper`] packs the indexed objects into `1..=n`
//! 7. **Batching**: compressed objects are serialized into [`ObjectStreamBatch`]es, whose
//!    payloads are compressed in parallel
//!
//! The tracker is left untouched on error, except that every `save_string` is cleared.
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::{codec::CodecSet, index::{SaveFlags, SaveOptions}, Tracker, Value};
//!
//! let mut tracker = Tracker::new();
//! let catalog = tracker.new_dictionary();
//! tracker.set(catalog, "Type", Value::name("Catalog"))?;
//! let root = tracker.create_reference(catalog.into())?;
//! tracker.set(tracker.trailer(), "Root", root.into())?;
//!
//! let options = SaveOptions::default().with_flags(SaveFlags::empty());
//! let layout = tracker.build_index(&options, &CodecSet::default())?;
//! assert_eq!(layout.partition().indirect, 1);
//! assert_eq!(layout.catalog(), Some(root.id()));
//! # Ok::<(), pdfgraph::Error>(())
//! ```

mod objstream;
mod remap;
mod xref;

pub use objstream::{ObjectStreamBatch, MAX_OBJECT_STREAM_CAPACITY};
pub use remap::ObjectRemapper;
pub use xref::{parse_stream_rows, stream_rows, write_table, SlotLocation, XREF_STREAM_WIDTHS};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use bitflags::bitflags;
use log::{debug, trace};
use rayon::prelude::*;

use crate::{
    codec::CodecSet,
    object::{ObjectId, SaveMode, Value, MAX_NESTING_DEPTH},
    tracker::Tracker,
    writer::SyntaxWriter,
    Error::{UnassignedSaveMode, UnresolvedPlaceholder},
    Result,
};

/// Default number of members per object stream
pub const DEFAULT_OBJECT_STREAM_CAPACITY: usize = 100;

/// Deepest position, counting containers and inlined references, at which a `Direct`
/// reference is still inlined
pub const MAX_INLINE_DEPTH: usize = MAX_NESTING_DEPTH / 2;

/// File format versions the writer can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PdfVersion {
    /// 1.4, the last version without object streams
    V1_4,
    /// 1.5, introduces object and cross-reference streams
    V1_5,
    /// 1.6
    V1_6,
    /// 1.7
    #[default]
    V1_7,
    /// 2.0
    V2_0,
}

impl PdfVersion {
    /// The version as written in the header
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfVersion::V1_4 => "1.4",
            PdfVersion::V1_5 => "1.5",
            PdfVersion::V1_6 => "1.6",
            PdfVersion::V1_7 => "1.7",
            PdfVersion::V2_0 => "2.0",
        }
    }

    /// Parses a header version; versions before 1.4 are read as 1.4
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "1.0" | "1.1" | "1.2" | "1.3" | "1.4" => Some(PdfVersion::V1_4),
            "1.5" => Some(PdfVersion::V1_5),
            "1.6" => Some(PdfVersion::V1_6),
            "1.7" => Some(PdfVersion::V1_7),
            "2.0" => Some(PdfVersion::V2_0),
            _ => None,
        }
    }

    /// Returns true if the version has object streams and cross-reference streams
    #[must_use]
    pub fn supports_object_streams(&self) -> bool {
        *self >= PdfVersion::V1_5
    }
}

impl fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Layout features requested for a save
    pub struct SaveFlags: u32 {
        /// Pack eligible objects into object streams and write a cross-reference stream
        const OBJECT_STREAMS = 0x0001;
        /// Compress object streams, the cross-reference stream and unfiltered streams
        const COMPRESS_STREAMS = 0x0002;
        /// Write a document `/ID` derived from the written bytes
        const DOCUMENT_ID = 0x0004;
    }
}

/// Options of one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    version: PdfVersion,
    flags: SaveFlags,
    object_stream_capacity: usize,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            version: PdfVersion::default(),
            flags: SaveFlags::all(),
            object_stream_capacity: DEFAULT_OBJECT_STREAM_CAPACITY,
        }
    }
}

impl SaveOptions {
    /// Options for a version 1.4 file with a classic table and no compression
    #[must_use]
    pub fn classic() -> Self {
        SaveOptions {
            version: PdfVersion::V1_4,
            flags: SaveFlags::DOCUMENT_ID,
            object_stream_capacity: DEFAULT_OBJECT_STREAM_CAPACITY,
        }
    }

    /// Sets the declared version
    #[must_use]
    pub fn with_version(mut self, version: PdfVersion) -> Self {
        self.version = version;
        self
    }

    /// Replaces the feature flags
    #[must_use]
    pub fn with_flags(mut self, flags: SaveFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the maximum number of members per object stream
    ///
    /// # Errors
    /// Returns an error for capacities outside `1..=255`.
    pub fn with_object_stream_capacity(mut self, capacity: usize) -> Result<Self> {
        if !(1..=MAX_OBJECT_STREAM_CAPACITY).contains(&capacity) {
            return Err(crate::Error::Error(format!(
                "object stream capacity {capacity} outside 1..={MAX_OBJECT_STREAM_CAPACITY}"
            )));
        }
        self.object_stream_capacity = capacity;
        Ok(self)
    }

    /// The declared version
    #[must_use]
    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// The feature flags
    #[must_use]
    pub fn flags(&self) -> SaveFlags {
        self.flags
    }

    /// Maximum number of members per object stream
    #[must_use]
    pub fn object_stream_capacity(&self) -> usize {
        self.object_stream_capacity
    }

    /// Returns true if this save writes object streams and a cross-reference stream
    #[must_use]
    pub fn uses_object_streams(&self) -> bool {
        self.flags.contains(SaveFlags::OBJECT_STREAMS) && self.version.supports_object_streams()
    }
}

/// How many reachable references ended up in each mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Partition {
    /// Objects written with their own `obj` body, object streams excluded
    pub indirect: usize,
    /// Objects stored inside object streams
    pub compressed: usize,
    /// References inlined at their point of use
    pub direct: usize,
    /// References written as `null`
    pub ignored: usize,
    /// Object streams
    pub object_streams: usize,
}

/// The result of index construction, consumed by the writer.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    version: PdfVersion,
    modes: HashMap<ObjectId, SaveMode>,
    numbers: HashMap<ObjectId, u32>,
    write_order: Vec<ObjectId>,
    catalog: Option<ObjectId>,
    batches: Vec<ObjectStreamBatch>,
    slots: Vec<SlotLocation>,
    xref_number: Option<u32>,
    encoded_streams: HashMap<ObjectId, Vec<u8>>,
}

impl IndexLayout {
    /// Version written in the header
    #[must_use]
    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// Effective mode of a reachable reference
    #[must_use]
    pub fn mode(&self, id: ObjectId) -> Option<SaveMode> {
        self.modes.get(&id).copied()
    }

    /// Number an indexed object is written under
    #[must_use]
    pub fn number(&self, id: ObjectId) -> Option<u32> {
        self.numbers.get(&id).copied()
    }

    /// Indirect objects other than the catalog, in write order
    #[must_use]
    pub fn write_order(&self) -> &[ObjectId] {
        &self.write_order
    }

    /// The catalog, written after every other top-level object
    #[must_use]
    pub fn catalog(&self) -> Option<ObjectId> {
        self.catalog
    }

    /// Object streams in write order
    #[must_use]
    pub fn object_streams(&self) -> &[ObjectStreamBatch] {
        &self.batches
    }

    /// Slot of every object number; offsets are filled in by the writer
    #[must_use]
    pub fn slots(&self) -> &[SlotLocation] {
        &self.slots
    }

    /// The `/Size` of the index
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Object number of the cross-reference stream, `None` for a classic table
    #[must_use]
    pub fn xref_number(&self) -> Option<u32> {
        self.xref_number
    }

    /// Compressed data replacing the stored data of an unfiltered stream
    #[must_use]
    pub fn encoded_stream(&self, id: ObjectId) -> Option<&[u8]> {
        self.encoded_streams.get(&id).map(Vec::as_slice)
    }

    /// Mode counts over every reachable reference
    #[must_use]
    pub fn partition(&self) -> Partition {
        let mut partition = Partition {
            object_streams: self.batches.len(),
            ..Partition::default()
        };
        for mode in self.modes.values() {
            match mode {
                SaveMode::Indirect => partition.indirect += 1,
                SaveMode::Compressed => partition.compressed += 1,
                SaveMode::Direct => partition.direct += 1,
                _ => partition.ignored += 1,
            }
        }
        partition
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Builds an [`IndexLayout`] from a tracker.
pub struct IndexBuilder<'a> {
    tracker: &'a mut Tracker,
    options: &'a SaveOptions,
    codecs: &'a CodecSet,
}

impl<'a> IndexBuilder<'a> {
    /// Creates a builder; nothing happens until [`IndexBuilder::build`]
    pub fn new(tracker: &'a mut Tracker, options: &'a SaveOptions, codecs: &'a CodecSet) -> Self {
        IndexBuilder {
            tracker,
            options,
            codecs,
        }
    }

    /// Runs every phase and returns the layout
    ///
    /// # Errors
    /// - [`crate::Error::UnresolvedPlaceholder`] if a placeholder is reachable
    /// - [`crate::Error::UnassignedSaveMode`] if a reachable object has no mode
    /// - [`crate::Error::ObjectLimitExceeded`] if the numbers run out
    pub fn build(self) -> Result<IndexLayout> {
        for entry in self.tracker.table.values_mut() {
            entry.save_string = None;
        }
        if self.tracker.is_dirty() {
            let report = self.tracker.fix_res_table(&[]);
            debug!(
                "repaired reference counts before save: {} live, {} pruned",
                report.live, report.pruned
            );
        }

        let reachable = self.reachable()?;
        let catalog = self.catalog();
        let mut modes = self.resolve_modes(&reachable, catalog)?;
        self.demote_direct_cycles(&reachable, &mut modes);
        self.demote_deep_inlining(&reachable, &mut modes)?;

        let indexed: Vec<ObjectId> = reachable
            .iter()
            .copied()
            .filter(|id| modes.get(id).is_some_and(SaveMode::is_indexed))
            .collect();
        let mut remapper = ObjectRemapper::build(&indexed)?;

        let mut numbers = HashMap::with_capacity(indexed.len());
        for id in &indexed {
            let number = remapper
                .map(*id)
                .ok_or_else(|| malformed_error!("Object {} was not renumbered", id))?;
            numbers.insert(*id, number);
        }

        let write_order = indexed
            .iter()
            .copied()
            .filter(|id| modes.get(id) == Some(&SaveMode::Indirect) && Some(*id) != catalog)
            .collect();
        let compressed: Vec<ObjectId> = indexed
            .iter()
            .copied()
            .filter(|id| modes.get(id) == Some(&SaveMode::Compressed))
            .collect();

        let mut layout = IndexLayout {
            version: self.options.version(),
            modes,
            numbers,
            write_order,
            catalog,
            batches: Vec::new(),
            slots: Vec::new(),
            xref_number: None,
            encoded_streams: HashMap::new(),
        };

        let mut members: Vec<(u32, u32, u32)> = Vec::new();
        let mut batches = Vec::new();
        for batch in objstream::plan_batches(&compressed, self.options.object_stream_capacity()) {
            let container = remapper.reserve()?;
            let mut bodies = Vec::with_capacity(batch.len());
            for (index, id) in batch.iter().enumerate() {
                let number = layout
                    .number(*id)
                    .ok_or_else(|| malformed_error!("Object {} was not renumbered", id))?;
                let value = self.value_of(*id)?;
                bodies.push((number, SyntaxWriter::serialize(self.tracker, &layout, value)?));
                members.push((number, container, index as u32));
            }
            batches.push(ObjectStreamBatch::assemble(container, bodies));
        }

        let compress = self.options.flags().contains(SaveFlags::COMPRESS_STREAMS);
        if compress {
            let codecs = self.codecs;
            batches.par_iter_mut().for_each(|batch| batch.compress(codecs));
            layout.encoded_streams = self.encode_streams(&layout)?;
        }

        if self.options.uses_object_streams() {
            layout.xref_number = Some(remapper.reserve()?);
        }

        let mut slots = vec![SlotLocation::Free; remapper.size() as usize];
        for (number, container, index) in members {
            slots[number as usize] = SlotLocation::InStream { container, index };
        }
        layout.slots = slots;
        layout.batches = batches;

        for (id, number) in &layout.numbers {
            if let Some(entry) = self.tracker.table.get_mut(id) {
                entry.save_string = Some(format!("{number} 0 R").into_bytes());
            }
        }

        let partition = layout.partition();
        debug!(
            "index built: {} indirect, {} compressed in {} object streams, {} direct, {} ignored",
            partition.indirect,
            partition.compressed,
            partition.object_streams,
            partition.direct,
            partition.ignored
        );
        Ok(layout)
    }

    /// References reachable from the trailer, in breadth-first discovery order
    fn reachable(&self) -> Result<Vec<ObjectId>> {
        let tracker = &*self.tracker;
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<ObjectId> = tracker
            .direct_refs(&Value::Node(tracker.trailer()))
            .into_iter()
            .map(|reference| reference.id())
            .collect();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(entry) = tracker.table.get(&id) else {
                trace!("dangling reference {} written as null", id);
                continue;
            };
            let Some(value) = entry.value() else {
                return Err(UnresolvedPlaceholder(id));
            };
            match entry.save_mode() {
                SaveMode::Unknown => return Err(UnassignedSaveMode(id)),
                SaveMode::Ignore => {
                    order.push(id);
                    continue;
                }
                _ => order.push(id),
            }
            queue.extend(tracker.direct_refs(value).into_iter().map(|r| r.id()));
        }
        Ok(order)
    }

    fn catalog(&self) -> Option<ObjectId> {
        self.tracker
            .get(self.tracker.trailer(), "Root")
            .ok()
            .flatten()
            .and_then(Value::as_reference)
            .map(|reference| reference.id())
    }

    fn value_of(&self, id: ObjectId) -> Result<&Value> {
        self.tracker
            .table
            .get(&id)
            .and_then(|entry| entry.value())
            .ok_or(UnresolvedPlaceholder(id))
    }

    /// Objects that must get their own body: streams, pinned nodes and the catalog
    fn indirect_only(&self, id: ObjectId, catalog: Option<ObjectId>) -> Result<bool> {
        if Some(id) == catalog {
            return Ok(true);
        }
        match self.value_of(id)? {
            Value::Node(node) => {
                let node = self.tracker.node(*node)?;
                Ok(node.is_stream() || node.pinned().is_some())
            }
            _ => Ok(false),
        }
    }

    fn resolve_modes(
        &self,
        reachable: &[ObjectId],
        catalog: Option<ObjectId>,
    ) -> Result<HashMap<ObjectId, SaveMode>> {
        let compress = self.options.uses_object_streams();
        let mut modes = HashMap::with_capacity(reachable.len());

        for id in reachable {
            let Some(entry) = self.tracker.table.get(id) else {
                continue;
            };
            let indirect_only = self.indirect_only(*id, catalog)?;
            let mode = match entry.save_mode() {
                SaveMode::Auto if entry.refcount() == 1 && !indirect_only => SaveMode::Direct,
                SaveMode::Auto | SaveMode::Compressed if compress && !indirect_only => {
                    SaveMode::Compressed
                }
                SaveMode::Direct if !indirect_only => SaveMode::Direct,
                SaveMode::Ignore => SaveMode::Ignore,
                _ => SaveMode::Indirect,
            };
            trace!("{} resolved {} -> {}", id, entry.save_mode(), mode);
            modes.insert(*id, mode);
        }
        Ok(modes)
    }

    /// Demotes one reference of every loop made only of `Direct` references
    fn demote_direct_cycles(&self, reachable: &[ObjectId], modes: &mut HashMap<ObjectId, SaveMode>) {
        let tracker = &*self.tracker;
        let direct_edges = |id: ObjectId| -> Vec<ObjectId> {
            tracker
                .table
                .get(&id)
                .and_then(|entry| entry.value())
                .map(|value| {
                    tracker
                        .direct_refs(value)
                        .into_iter()
                        .map(|reference| reference.id())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut colors: HashMap<ObjectId, Color> = HashMap::new();
        for start in reachable {
            if modes.get(start) != Some(&SaveMode::Direct)
                || colors.get(start).copied().unwrap_or(Color::White) != Color::White
            {
                continue;
            }
            colors.insert(*start, Color::Gray);
            let mut stack = vec![(*start, direct_edges(*start), 0usize)];

            while let Some((node, edges, position)) = stack.last_mut() {
                let Some(target) = edges.get(*position).copied() else {
                    colors.insert(*node, Color::Black);
                    stack.pop();
                    continue;
                };
                *position += 1;
                if modes.get(&target) != Some(&SaveMode::Direct) {
                    continue;
                }
                match colors.get(&target).copied().unwrap_or(Color::White) {
                    Color::White => {
                        colors.insert(target, Color::Gray);
                        let edges = direct_edges(target);
                        stack.push((target, edges, 0));
                    }
                    Color::Gray => {
                        debug!("{} closes a loop of direct references, writing it indirect", target);
                        modes.insert(target, SaveMode::Indirect);
                    }
                    Color::Black => {}
                }
            }
        }
    }

    /// Gives a body of its own to every `Direct` reference inlined too deep.
    ///
    /// Walks each top-level object with an explicit stack. Containers and inlined references
    /// both count one level, so chains of references holding references are bounded too.
    fn demote_deep_inlining(
        &self,
        reachable: &[ObjectId],
        modes: &mut HashMap<ObjectId, SaveMode>,
    ) -> Result<()> {
        let tracker = &*self.tracker;
        let demoted = if self.options.uses_object_streams() {
            SaveMode::Compressed
        } else {
            SaveMode::Indirect
        };

        let trailer = Value::Node(tracker.trailer());
        let mut stack: Vec<(&Value, usize)> = vec![(&trailer, 0)];
        for id in reachable {
            if modes.get(id).is_some_and(SaveMode::is_indexed) {
                stack.push((self.value_of(*id)?, 0));
            }
        }

        let mut deepest: HashMap<ObjectId, usize> = HashMap::new();
        while let Some((value, depth)) = stack.pop() {
            match value {
                Value::Node(node) => {
                    for child in tracker.node(*node)?.kind().children() {
                        stack.push((child, depth + 1));
                    }
                }
                Value::Reference(reference) => {
                    let id = reference.id();
                    if modes.get(&id) != Some(&SaveMode::Direct) {
                        continue;
                    }
                    if depth > MAX_INLINE_DEPTH {
                        debug!("{} is inlined {} levels deep, writing it {}", id, depth, demoted);
                        modes.insert(id, demoted);
                        stack.push((self.value_of(id)?, 0));
                        continue;
                    }
                    if deepest.get(&id).is_some_and(|seen| *seen >= depth) {
                        continue;
                    }
                    deepest.insert(id, depth);
                    stack.push((self.value_of(id)?, depth + 1));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compresses unfiltered streams written as their own objects
    fn encode_streams(&self, layout: &IndexLayout) -> Result<HashMap<ObjectId, Vec<u8>>> {
        let mut candidates = Vec::new();
        for id in layout.write_order().iter().chain(layout.catalog.iter()) {
            if let Value::Node(node) = self.value_of(*id)? {
                if let Some(stream) = self.tracker.node(*node)?.as_stream() {
                    if stream.filter().is_none() && !stream.data().is_empty() {
                        candidates.push((*id, stream.data()));
                    }
                }
            }
        }

        let codecs = self.codecs;
        Ok(candidates
            .par_iter()
            .filter_map(|(id, data)| match codecs.encode("FlateDecode", data) {
                Ok(encoded) if encoded.len() < data.len() => Some((*id, encoded)),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{reference_chain, reference_cycle, with_catalog},
        Error,
    };

    #[test]
    fn test_auto_single_use_is_direct() {
        let mut tracker = Tracker::new();
        let (root, catalog_node) = with_catalog(&mut tracker);
        let info = tracker.create_reference(Value::from(7)).unwrap();
        tracker.set(catalog_node, "Info", info.into()).unwrap();

        let layout = tracker
            .build_index(&SaveOptions::classic(), &CodecSet::default())
            .unwrap();
        assert_eq!(layout.mode(info.id()), Some(SaveMode::Direct));
        assert_eq!(layout.mode(root.id()), Some(SaveMode::Indirect));
        assert_eq!(layout.number(root.id()), Some(1));
        assert_eq!(layout.size(), 2);
        assert!(layout.write_order().is_empty());
        assert_eq!(tracker.entry(root).unwrap().save_string(), Some(&b"1 0 R"[..]));
    }

    #[test]
    fn test_shared_objects_are_compressed() {
        let mut tracker = Tracker::new();
        let (root, catalog_node) = with_catalog(&mut tracker);
        let shared = tracker.create_reference(Value::from(1)).unwrap();
        tracker.set(catalog_node, "A", shared.into()).unwrap();
        tracker.set(catalog_node, "B", shared.into()).unwrap();

        let options = SaveOptions::default();
        let layout = tracker.build_index(&options, &CodecSet::default()).unwrap();
        assert_eq!(layout.mode(shared.id()), Some(SaveMode::Compressed));
        assert_eq!(layout.object_streams().len(), 1);
        assert!(layout.xref_number().is_some());

        let classic = options.with_version(PdfVersion::V1_4);
        let layout = tracker.build_index(&classic, &CodecSet::default()).unwrap();
        assert_eq!(layout.mode(shared.id()), Some(SaveMode::Indirect));
        assert!(layout.xref_number().is_none());
    }

    #[test]
    fn test_streams_never_compressed() {
        let mut tracker = Tracker::new();
        let (root, catalog_node) = with_catalog(&mut tracker);
        let stream = tracker.new_stream(b"q Q".to_vec());
        let reference = tracker.create_reference(stream.into()).unwrap();
        tracker.set_save_mode(reference, SaveMode::Compressed).unwrap();
        tracker.set(catalog_node, "Contents", reference.into()).unwrap();

        let layout = tracker
            .build_index(&SaveOptions::default(), &CodecSet::default())
            .unwrap();
        assert_eq!(layout.mode(reference.id()), Some(SaveMode::Indirect));
        assert_eq!(layout.mode(root.id()), Some(SaveMode::Indirect));
    }

    #[test]
    fn test_direct_cycle_is_demoted() {
        let mut tracker = Tracker::new();
        let (_, catalog_node) = with_catalog(&mut tracker);

        let (a, b) = reference_cycle(&mut tracker);
        tracker.set(catalog_node, "Loop", a.into()).unwrap();
        tracker.set_save_mode(a, SaveMode::Direct).unwrap();
        tracker.set_save_mode(b, SaveMode::Direct).unwrap();

        let layout = tracker
            .build_index(&SaveOptions::classic(), &CodecSet::default())
            .unwrap();
        let modes = [layout.mode(a.id()), layout.mode(b.id())];
        assert!(modes.contains(&Some(SaveMode::Indirect)));
        assert!(modes.contains(&Some(SaveMode::Direct)));
    }

    #[test]
    fn test_deep_inlining_is_demoted() {
        let mut tracker = Tracker::new();
        let (_, catalog_node) = with_catalog(&mut tracker);
        let chain = reference_chain(&mut tracker, 300);
        tracker.set(catalog_node, "First", chain[0].into()).unwrap();

        let layout = tracker
            .build_index(&SaveOptions::classic(), &CodecSet::default())
            .unwrap();
        // Each link sits two levels below the previous one: the reference and its dictionary
        let demoted: Vec<usize> = chain
            .iter()
            .enumerate()
            .filter(|(_, reference)| layout.mode(reference.id()) == Some(SaveMode::Indirect))
            .map(|(position, _)| position)
            .collect();
        assert!(!demoted.is_empty());
        assert!(demoted[0] > 0);
        assert!(demoted
            .windows(2)
            .all(|pair| pair[1] - pair[0] <= MAX_INLINE_DEPTH / 2 + 1));
        assert!(chain
            .iter()
            .all(|reference| layout.mode(reference.id()).is_some_and(|mode| mode != SaveMode::Compressed)));

        let layout = tracker
            .build_index(&SaveOptions::default(), &CodecSet::default())
            .unwrap();
        assert_eq!(layout.partition().compressed, demoted.len());
    }

    #[test]
    fn test_chain_numbering_is_dense() {
        let mut tracker = Tracker::new();
        let (root, catalog_node) = with_catalog(&mut tracker);
        let chain = reference_chain(&mut tracker, 5);
        tracker.set(catalog_node, "First", chain[0].into()).unwrap();
        for reference in &chain {
            tracker.set_save_mode(*reference, SaveMode::Indirect).unwrap();
        }
        let orphan = tracker.new_dictionary();
        tracker.create_reference(orphan.into()).unwrap();

        let layout = tracker
            .build_index(&SaveOptions::classic(), &CodecSet::default())
            .unwrap();
        assert_eq!(layout.size(), 7);
        assert_eq!(layout.write_order().len(), 5);
        assert_eq!(layout.catalog(), Some(root.id()));
        let mut numbers: Vec<u32> = chain
            .iter()
            .filter_map(|reference| layout.number(reference.id()))
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reachable_placeholder_fails() {
        let mut tracker = Tracker::new();
        let (root, catalog_node) = with_catalog(&mut tracker);
        let pending = tracker.create_temp_reference().unwrap();
        tracker.set(catalog_node, "Pending", pending.into()).unwrap();

        let result = tracker.build_index(&SaveOptions::default(), &CodecSet::default());
        assert!(matches!(result, Err(Error::UnresolvedPlaceholder(id)) if id == pending.id()));
    }

    #[test]
    fn test_unknown_mode_fails() {
        let mut tracker = Tracker::new();
        let (root, _) = with_catalog(&mut tracker);
        tracker.set_save_mode(root, SaveMode::Unknown).unwrap();
        let result = tracker.build_index(&SaveOptions::default(), &CodecSet::default());
        assert!(matches!(result, Err(Error::UnassignedSaveMode(_))));
    }

    #[test]
    fn test_capacity_range() {
        assert!(SaveOptions::default().with_object_stream_capacity(0).is_err());
        assert!(SaveOptions::default().with_object_stream_capacity(256).is_err());
        let options = SaveOptions::default().with_object_stream_capacity(255).unwrap();
        assert_eq!(options.object_stream_capacity(), 255);
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(PdfVersion::parse("1.2"), Some(PdfVersion::V1_4));
        assert_eq!(PdfVersion::parse("2.0"), Some(PdfVersion::V2_0));
        assert_eq!(PdfVersion::parse("3.1"), None);
        assert!(!PdfVersion::V1_4.supports_object_streams());
        assert_eq!(PdfVersion::V1_6.to_string(), "1.6");
    }
}
