//! The per-document object table and container mutation API.
//!
//! A [`Tracker`] owns every node and indirect object of one document. It is the only way to
//! mutate containers, which lets it keep three things consistent on every call:
//!
//! - **Ownership** - a container only ever holds handles of its own tracker, and a mutable
//!   node has at most one holder
//! - **Reference counts** - linking a value into a reachable container counts the references
//!   it carries, unlinking releases them (see [`crate::tracker::RepairReport`] for the repair
//!   pass that makes the counts authoritative again)
//! - **Structure** - loops made only of direct containment are refused at the point they
//!   would be closed
//!
//! # Architecture
//!
//! Nodes live in a generation-checked arena; references live in an ordered table keyed by
//! [`ObjectId`]. The trailer is a pinned dictionary created with the tracker and is the root
//! every liveness question ends at.
//!
//! Foreign values enter through [`Tracker::adopt`], [`Tracker::make_copy`] or
//! [`Tracker::import`]; passing a foreign handle straight to a mutator is refused with
//! [`crate::Error::ForeignValue`].
//!
//! # Examples
//!
//! ```rust
//! use pdfgraph::{Tracker, Value};
//!
//! let mut tracker = Tracker::new();
//! let font = tracker.new_dictionary();
//! tracker.set(font, "Type", Value::name("Font"))?;
//! let font_ref = tracker.create_reference(font.into())?;
//!
//! let resources = tracker.new_dictionary();
//! tracker.set(resources, "F1", font_ref.into())?;
//! tracker.set(tracker.trailer(), "Resources", resources.into())?;
//!
//! assert_eq!(tracker.entry(font_ref)?.refcount(), 1);
//! # Ok::<(), pdfgraph::Error>(())
//! ```

mod adopt;
mod arena;
mod cache;
mod copy;
mod placeholder;
mod refcount;
mod retarget;

pub use cache::{CacheEntry, ForeignCache, ForeignKey};
pub use refcount::{RepairReport, DEFAULT_CYCLE_PROBE_DEPTH};
pub use retarget::{NoRetarget, Retarget, RetargetRequest, SaveListener};

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::{
    codec::CodecSet,
    index::{IndexLayout, SaveOptions},
    object::{
        Array, Dictionary, Holder, Name, Node, NodeId, NodeKind, NodePath, ObjectId, ObjectRef,
        PathSegment, PinnedKind, RefEntry, SaveMode, SlotKey, Stream, TrackerId, Value,
    },
    Error::{
        CircularDirectReference, ForeignValue, ImmutableNode, IndexOutOfBounds, NodeAlreadyLinked,
        ObjectLimitExceeded, ReferenceNotFound, TypeMismatch, UnresolvedPlaceholder,
    },
    Result,
};

use arena::Arena;

/// Object table and node arena of one document.
pub struct Tracker {
    id: TrackerId,
    pub(crate) arena: Arena,
    pub(crate) table: BTreeMap<ObjectId, RefEntry>,
    next_number: u32,
    trailer: NodeId,
    pub(crate) dirty: bool,
    pub(crate) probe_depth: usize,
    pub(crate) cache: Option<ForeignCache>,
    listeners: Vec<Box<dyn SaveListener>>,
}

impl Tracker {
    /// Creates an empty tracker holding only the trailer dictionary.
    #[must_use]
    pub fn new() -> Self {
        let id = TrackerId::next();
        let mut arena = Arena::new(id);
        let mut trailer = Node::new(NodeKind::Dictionary(Dictionary::new()));
        trailer.pinned = Some(PinnedKind::Trailer);
        let trailer = arena.alloc(trailer);

        Tracker {
            id,
            arena,
            table: BTreeMap::new(),
            next_number: 1,
            trailer,
            dirty: false,
            probe_depth: DEFAULT_CYCLE_PROBE_DEPTH,
            cache: None,
            listeners: Vec::new(),
        }
    }

    /// Identity of this tracker
    #[must_use]
    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// The trailer dictionary, root of the reachable graph
    #[must_use]
    pub fn trailer(&self) -> NodeId {
        self.trailer
    }

    /// Returns true when reference counts may overstate liveness.
    ///
    /// Set when the cycle probe could not prove that a decremented object is unreachable
    /// from itself; cleared by [`Tracker::fix_res_table`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sets how many reference levels the cycle probe follows after a decrement
    pub fn set_cycle_probe_depth(&mut self, depth: usize) {
        self.probe_depth = depth;
    }

    /// Number of nodes currently allocated, detached ones included
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of entries in the reference table
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.table.len()
    }

    /// Iterates over the reference table in object number order
    pub fn references(&self) -> impl Iterator<Item = (ObjectRef, &RefEntry)> {
        let tracker = self.id;
        self.table
            .iter()
            .map(move |(id, entry)| (ObjectRef::new(tracker, *id), entry))
    }

    /// Returns the handle for an object number of this tracker, if present
    #[must_use]
    pub fn lookup(&self, id: ObjectId) -> Option<ObjectRef> {
        self.table
            .contains_key(&id)
            .then(|| ObjectRef::new(self.id, id))
    }

    // Node access

    /// The node behind `id`
    ///
    /// # Errors
    /// [`crate::Error::StaleNode`] if the handle is foreign or has been freed.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.arena.get(id)
    }

    /// The array behind `id`
    ///
    /// # Errors
    /// [`crate::Error::TypeMismatch`] if the node is not an array.
    pub fn array(&self, id: NodeId) -> Result<&Array> {
        self.node(id)?.as_array().ok_or(TypeMismatch {
            node: id,
            expected: "an array",
        })
    }

    /// The dictionary behind `id`, or the stream dictionary of a stream
    ///
    /// # Errors
    /// [`crate::Error::TypeMismatch`] if the node is an array.
    pub fn dictionary(&self, id: NodeId) -> Result<&Dictionary> {
        self.node(id)?.as_dictionary().ok_or(TypeMismatch {
            node: id,
            expected: "a dictionary",
        })
    }

    /// The stream behind `id`
    ///
    /// # Errors
    /// [`crate::Error::TypeMismatch`] if the node is not a stream.
    pub fn stream(&self, id: NodeId) -> Result<&Stream> {
        self.node(id)?.as_stream().ok_or(TypeMismatch {
            node: id,
            expected: "a stream",
        })
    }

    /// Value stored under `key` in a dictionary or stream dictionary
    pub fn get(&self, container: NodeId, key: &str) -> Result<Option<&Value>> {
        Ok(self.dictionary(container)?.get(key))
    }

    /// Follows references until a non-reference value is reached
    ///
    /// # Errors
    /// [`crate::Error::ReferenceNotFound`] for dangling references and
    /// [`crate::Error::UnresolvedPlaceholder`] for placeholders.
    pub fn resolve<'a>(&'a self, value: &'a Value) -> Result<&'a Value> {
        let mut current = value;
        let mut hops = 0;
        while let Value::Reference(reference) = current {
            current = self.deref(*reference)?;
            hops += 1;
            if hops > self.table.len() {
                return Err(malformed_error!("Reference chain starting at {} loops", reference));
            }
        }
        Ok(current)
    }

    /// Names of the filters applied to a stream's payload, outermost first
    pub fn stream_filters(&self, stream: NodeId) -> Result<Vec<Name>> {
        let Some(filter) = self.stream(stream)?.dict().get("Filter") else {
            return Ok(Vec::new());
        };
        match self.resolve(filter)? {
            Value::Name(name) => Ok(vec![name.clone()]),
            Value::Node(array) => Ok(self
                .array(*array)?
                .iter()
                .filter_map(|value| self.resolve(value).ok())
                .filter_map(Value::as_name)
                .cloned()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    // Node construction

    /// Allocates an empty, detached array
    pub fn new_array(&mut self) -> NodeId {
        self.arena.alloc(Node::new(NodeKind::Array(Array::new())))
    }

    /// Allocates an empty, detached dictionary
    pub fn new_dictionary(&mut self) -> NodeId {
        self.arena
            .alloc(Node::new(NodeKind::Dictionary(Dictionary::new())))
    }

    /// Allocates a detached stream with an empty dictionary and the given payload
    pub fn new_stream(&mut self, data: Vec<u8>) -> NodeId {
        self.arena
            .alloc(Node::new(NodeKind::Stream(Stream::new(Dictionary::new(), data))))
    }

    /// Allocates a detached dictionary marked as a document singleton
    pub fn new_pinned(&mut self, kind: PinnedKind) -> NodeId {
        let mut node = Node::new(NodeKind::Dictionary(Dictionary::new()));
        node.pinned = Some(kind);
        self.arena.alloc(node)
    }

    /// Marks `node` and every node it directly contains as immutable.
    ///
    /// Frozen nodes reject mutation and may be linked into any number of slots.
    pub fn freeze(&mut self, node: NodeId) -> Result<()> {
        if node == self.trailer {
            return Err(ImmutableNode(node));
        }
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let entry = self.arena.get_mut(current)?;
            if !entry.mutable {
                continue;
            }
            entry.mutable = false;
            if entry.holder.take().is_some() {
                entry.links = 1;
            }
            pending.extend(entry.kind.child_nodes());
        }
        trace!("froze subtree rooted at {}", node);
        Ok(())
    }

    /// Frees a detached value.
    ///
    /// Values returned by [`Tracker::remove`] and friends stay allocated so they can be
    /// relinked; call this once they are no longer needed. Primitives and references are
    /// accepted and ignored.
    ///
    /// # Errors
    /// [`crate::Error::NodeAlreadyLinked`] if the node is still held somewhere.
    pub fn discard(&mut self, value: Value) -> Result<()> {
        let Value::Node(node) = value else {
            return Ok(());
        };
        self.check_owned(&value)?;
        let entry = self.arena.get(node)?;
        if entry.holder.is_some() || entry.links > 0 || node == self.trailer {
            return Err(NodeAlreadyLinked(node));
        }
        self.free_subtree(node);
        Ok(())
    }

    // Container mutation

    /// Stores `value` under `key` in a dictionary or stream dictionary.
    ///
    /// Returns the previous value, detached. Direct streams and pinned nodes are wrapped in
    /// a fresh indirect reference before they are stored.
    ///
    /// # Errors
    /// - [`crate::Error::ForeignValue`] if `value` belongs to another tracker
    /// - [`crate::Error::NodeAlreadyLinked`] if `value` is a mutable node with a holder
    /// - [`crate::Error::CircularDirectReference`] if `container` is inside `value`
    /// - [`crate::Error::ImmutableNode`] if `container` is frozen
    pub fn set(
        &mut self,
        container: NodeId,
        key: impl Into<Name>,
        value: Value,
    ) -> Result<Option<Value>> {
        let key = key.into();
        self.writable(container)?;
        if self.arena.get(container)?.as_dictionary().is_none() {
            return Err(TypeMismatch {
                node: container,
                expected: "a dictionary",
            });
        }

        let slot = SlotKey::Key(key.clone());
        let value = self.link_into(container, &slot, value)?;
        let live = self.is_live(container);

        let node = self.arena.get_mut(container)?;
        let previous = match &mut node.kind {
            NodeKind::Dictionary(dict) => dict.insert(key, value.clone()),
            NodeKind::Stream(stream) => stream.dict_mut().insert(key, value.clone()),
            NodeKind::Array(_) => None,
        };

        self.settle(live, Some(&value), previous.as_ref());
        Ok(previous)
    }

    /// Removes `key` from a dictionary or stream dictionary, returning the detached value
    pub fn remove(&mut self, container: NodeId, key: &str) -> Result<Option<Value>> {
        self.writable(container)?;
        let live = self.is_live(container);
        let node = self.arena.get_mut(container)?;
        let previous = match &mut node.kind {
            NodeKind::Dictionary(dict) => dict.remove(key),
            NodeKind::Stream(stream) => stream.dict_mut().remove(key),
            NodeKind::Array(_) => {
                return Err(TypeMismatch {
                    node: container,
                    expected: "a dictionary",
                })
            }
        };
        self.settle(live, None, previous.as_ref());
        Ok(previous)
    }

    /// Appends `value` to an array
    pub fn push(&mut self, array: NodeId, value: Value) -> Result<()> {
        let len = self.array_len(array)?;
        self.insert(array, len, value)
    }

    /// Inserts `value` into an array at `index`, shifting later elements
    pub fn insert(&mut self, array: NodeId, index: usize, value: Value) -> Result<()> {
        let len = self.array_len(array)?;
        if index > len {
            return Err(IndexOutOfBounds { index, len });
        }
        let value = self.link_into(array, &SlotKey::Index(index), value)?;
        let live = self.is_live(array);
        if let NodeKind::Array(items) = &mut self.arena.get_mut(array)?.kind {
            items.insert(index, value.clone());
        }
        self.settle(live, Some(&value), None);
        Ok(())
    }

    /// Removes and returns the detached element at `index`
    pub fn remove_at(&mut self, array: NodeId, index: usize) -> Result<Value> {
        let len = self.array_len(array)?;
        if index >= len {
            return Err(IndexOutOfBounds { index, len });
        }
        let live = self.is_live(array);
        let previous = match &mut self.arena.get_mut(array)?.kind {
            NodeKind::Array(items) => items.remove(index),
            _ => Value::Null,
        };
        self.settle(live, None, Some(&previous));
        Ok(previous)
    }

    /// Replaces the element at `index`, returning the detached previous element
    pub fn replace_at(&mut self, array: NodeId, index: usize, value: Value) -> Result<Value> {
        let len = self.array_len(array)?;
        if index >= len {
            return Err(IndexOutOfBounds { index, len });
        }
        let value = self.link_into(array, &SlotKey::Index(index), value)?;
        let live = self.is_live(array);
        let previous = match &mut self.arena.get_mut(array)?.kind {
            NodeKind::Array(items) => items.replace(index, value.clone()),
            _ => None,
        }
        .unwrap_or(Value::Null);
        self.settle(live, Some(&value), Some(&previous));
        Ok(previous)
    }

    /// Replaces a stream's payload
    pub fn set_stream_data(&mut self, stream: NodeId, data: Vec<u8>) -> Result<()> {
        self.writable(stream)?;
        match &mut self.arena.get_mut(stream)?.kind {
            NodeKind::Stream(payload) => {
                payload.set_data(data);
                Ok(())
            }
            _ => Err(TypeMismatch {
                node: stream,
                expected: "a stream",
            }),
        }
    }

    // References

    /// Creates an indirect object holding `value`.
    ///
    /// The entry starts out unregistered; it is counted once something reachable links it.
    /// Streams and pinned nodes default to [`SaveMode::Indirect`], everything else to
    /// [`SaveMode::Auto`].
    pub fn create_reference(&mut self, value: Value) -> Result<ObjectRef> {
        let save_mode = match &value {
            Value::Node(node) => {
                self.check_owned(&value)?;
                self.arena.get(*node)?.default_save_mode()
            }
            _ => SaveMode::Auto,
        };
        let id = self.allocate_id()?;
        let value = self.link_value(Holder::Reference(id), value, false)?;
        self.table.insert(id, RefEntry::new(Some(value), save_mode));
        trace!("created reference {}", id);
        Ok(ObjectRef::new(self.id, id))
    }

    /// Creates a placeholder reference whose value is supplied later with
    /// [`Tracker::set_reference_value`].
    pub fn create_temp_reference(&mut self) -> Result<ObjectRef> {
        let id = self.allocate_id()?;
        self.table.insert(id, RefEntry::new(None, SaveMode::Auto));
        Ok(ObjectRef::new(self.id, id))
    }

    /// Replaces the value of an indirect object, returning the detached previous value
    pub fn set_reference_value(
        &mut self,
        reference: ObjectRef,
        value: Value,
    ) -> Result<Option<Value>> {
        self.check_owned(&Value::Reference(reference))?;
        let entry = self
            .table
            .get(&reference.id)
            .ok_or(ReferenceNotFound(reference.id))?;
        let live = entry.refcount >= 1;
        let resolving = entry.value.is_none() && entry.save_mode == SaveMode::Auto;

        let value = self.link_value(Holder::Reference(reference.id), value, false)?;
        let node_mode = match &value {
            Value::Node(node) => Some(self.arena.get(*node)?.default_save_mode()),
            _ => None,
        };
        let entry = self
            .table
            .get_mut(&reference.id)
            .ok_or(ReferenceNotFound(reference.id))?;
        if let (true, Some(mode)) = (resolving, node_mode) {
            entry.save_mode = mode;
        }
        let previous = entry.value.replace(value.clone());
        self.settle(live, Some(&value), previous.as_ref());
        Ok(previous)
    }

    /// Requests a save mode for an indirect object
    pub fn set_save_mode(&mut self, reference: ObjectRef, mode: SaveMode) -> Result<()> {
        self.check_owned(&Value::Reference(reference))?;
        self.table
            .get_mut(&reference.id)
            .ok_or(ReferenceNotFound(reference.id))?
            .save_mode = mode;
        Ok(())
    }

    /// The table record of `reference`
    pub fn entry(&self, reference: ObjectRef) -> Result<&RefEntry> {
        if reference.tracker != self.id {
            return Err(ForeignValue);
        }
        self.table
            .get(&reference.id)
            .ok_or(ReferenceNotFound(reference.id))
    }

    /// The value of `reference`
    ///
    /// # Errors
    /// [`crate::Error::UnresolvedPlaceholder`] if the value has not been supplied yet.
    pub fn deref(&self, reference: ObjectRef) -> Result<&Value> {
        self.entry(reference)?
            .value()
            .ok_or(UnresolvedPlaceholder(reference.id))
    }

    /// Location of `node` relative to the closest indirect object or the trailer
    #[must_use]
    pub fn path_to(&self, node: NodeId) -> NodePath {
        let mut segments = Vec::new();
        let mut current = node;
        let mut guard = self.arena.len();
        while guard > 0 {
            guard -= 1;
            let Ok(entry) = self.arena.get(current) else {
                break;
            };
            match entry.holder {
                Some(Holder::Node(parent)) => {
                    if let Some(slot) = self.slot_of(parent, current) {
                        segments.push(PathSegment::Slot(slot));
                    }
                    current = parent;
                }
                Some(Holder::Reference(id)) => {
                    segments.push(PathSegment::Reference(id));
                    break;
                }
                None => break,
            }
        }
        let mut path = NodePath::root();
        for segment in segments.into_iter().rev() {
            path.push(segment);
        }
        path
    }

    /// Registers a collaborator notified around every save
    pub fn add_save_listener(&mut self, listener: Box<dyn SaveListener>) {
        self.listeners.push(listener);
    }

    /// Builds the index and serializes the whole document.
    ///
    /// Listeners run before the index is built and after the bytes are produced.
    pub fn save(&mut self, options: &SaveOptions, codecs: &CodecSet) -> Result<Vec<u8>> {
        let mut listeners = std::mem::take(&mut self.listeners);
        let result = self.save_with_listeners(&mut listeners, options, codecs);
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        result
    }

    fn save_with_listeners(
        &mut self,
        listeners: &mut [Box<dyn SaveListener>],
        options: &SaveOptions,
        codecs: &CodecSet,
    ) -> Result<Vec<u8>> {
        for listener in listeners.iter_mut() {
            listener.before_save(self)?;
        }
        let layout = self.build_index(options, codecs)?;
        let bytes = crate::writer::write_document(self, &layout, options)?;
        debug!(
            "saved {} bytes, {} indirect and {} compressed objects",
            bytes.len(),
            layout.partition().indirect,
            layout.partition().compressed
        );
        for listener in listeners.iter_mut() {
            listener.after_save(self, &layout)?;
        }
        Ok(bytes)
    }

    /// Builds the save layout without serializing
    pub fn build_index(&mut self, options: &SaveOptions, codecs: &CodecSet) -> Result<IndexLayout> {
        crate::index::IndexBuilder::new(self, options, codecs).build()
    }

    // Internals shared with the other tracker modules, the reader and the index builder

    pub(crate) fn allocate_id(&mut self) -> Result<ObjectId> {
        let number = self.next_number;
        self.next_number = number
            .checked_add(1)
            .ok_or(ObjectLimitExceeded(number as usize))?;
        Ok(ObjectId::new(number, 0))
    }

    /// Inserts an entry under a fixed id, used when loading files
    pub(crate) fn insert_loaded(
        &mut self,
        id: ObjectId,
        value: Value,
        save_mode: SaveMode,
    ) -> Result<ObjectRef> {
        let value = self.link_value(Holder::Reference(id), value, false)?;
        self.table.insert(id, RefEntry::new(Some(value), save_mode));
        self.next_number = self.next_number.max(id.number().saturating_add(1));
        Ok(ObjectRef::new(self.id, id))
    }

    /// Allocates a node for an already built container, taking over the child nodes it holds
    pub(crate) fn alloc_node(&mut self, kind: NodeKind) -> NodeId {
        let children = kind.child_nodes();
        let id = self.arena.alloc(Node::new(kind));
        for child in children {
            if let Ok(node) = self.arena.get_mut(child) {
                if node.mutable {
                    node.holder = Some(Holder::Node(id));
                    node.links = 1;
                } else {
                    node.links += 1;
                }
            }
        }
        id
    }

    pub(crate) fn set_pinned(&mut self, node: NodeId, kind: PinnedKind) -> Result<()> {
        self.arena.get_mut(node)?.pinned = Some(kind);
        Ok(())
    }

    pub(crate) fn handle(&self, id: ObjectId) -> ObjectRef {
        ObjectRef::new(self.id, id)
    }

    /// Rejects handles of other trackers and handles that no longer resolve
    pub(crate) fn check_owned(&self, value: &Value) -> Result<()> {
        match value {
            Value::Node(node) => {
                if node.tracker != self.id {
                    return Err(ForeignValue);
                }
                self.arena.get(*node).map(|_| ())
            }
            Value::Reference(reference) => {
                if reference.tracker != self.id {
                    return Err(ForeignValue);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns true when the holder chain of `node` ends at the trailer or at a counted
    /// reference
    pub(crate) fn is_live(&self, node: NodeId) -> bool {
        let mut current = node;
        let mut guard = self.arena.len() + 1;
        while guard > 0 {
            guard -= 1;
            if current == self.trailer {
                return true;
            }
            let Ok(entry) = self.arena.get(current) else {
                return false;
            };
            match entry.holder {
                Some(Holder::Node(parent)) => current = parent,
                Some(Holder::Reference(id)) => {
                    return self.table.get(&id).is_some_and(|entry| entry.refcount >= 1)
                }
                None => return false,
            }
        }
        false
    }

    pub(crate) fn writable(&self, container: NodeId) -> Result<()> {
        if container.tracker != self.id {
            return Err(ForeignValue);
        }
        if !self.arena.get(container)?.mutable {
            return Err(ImmutableNode(container));
        }
        Ok(())
    }

    fn array_len(&self, array: NodeId) -> Result<usize> {
        self.writable(array)?;
        Ok(self.array(array)?.len())
    }

    pub(crate) fn slot_of(&self, parent: NodeId, child: NodeId) -> Option<SlotKey> {
        let kind = &self.arena.get(parent).ok()?.kind;
        kind.slots()
            .into_iter()
            .find(|slot| kind.get(slot) == Some(&Value::Node(child)))
    }

    /// Validates `value` for a container slot and records the new holder
    fn link_into(&mut self, container: NodeId, slot: &SlotKey, value: Value) -> Result<Value> {
        if let Value::Node(node) = value {
            if node.tracker == self.id && self.arena.get(node)?.mutable {
                let mut current = Some(container);
                while let Some(ancestor) = current {
                    if ancestor == node {
                        return Err(CircularDirectReference {
                            path: self
                                .path_to(container)
                                .join(PathSegment::Slot(slot.clone())),
                        });
                    }
                    current = match self.arena.get(ancestor)?.holder {
                        Some(Holder::Node(parent)) => Some(parent),
                        _ => None,
                    };
                }
            }
        }
        self.link_value(Holder::Node(container), value, true)
    }

    /// Records `holder` on the node inside `value`.
    ///
    /// With `wrap_indirect`, streams and pinned nodes are first wrapped in a new reference
    /// and the reference is what gets stored.
    fn link_value(&mut self, holder: Holder, value: Value, wrap_indirect: bool) -> Result<Value> {
        self.check_owned(&value)?;
        let Value::Node(node) = value else {
            return Ok(value);
        };
        if node == self.trailer {
            return Err(NodeAlreadyLinked(node));
        }

        let entry = self.arena.get(node)?;
        if entry.mutable && entry.holder.is_some() {
            return Err(NodeAlreadyLinked(node));
        }
        if wrap_indirect && entry.default_save_mode() == SaveMode::Indirect {
            let reference = self.create_reference(value)?;
            return Ok(Value::Reference(reference));
        }

        let entry = self.arena.get_mut(node)?;
        if entry.mutable {
            entry.holder = Some(holder);
            entry.links = 1;
        } else {
            entry.links += 1;
        }
        Ok(value)
    }

    /// Releases the holder of a value that left its slot
    fn unlink(&mut self, value: &Value) {
        if let Value::Node(node) = value {
            if let Ok(entry) = self.arena.get_mut(*node) {
                if entry.mutable {
                    entry.holder = None;
                    entry.links = 0;
                } else {
                    entry.links = entry.links.saturating_sub(1);
                }
            }
        }
    }

    /// Applies the counting and holder bookkeeping of a slot change
    fn settle(&mut self, live: bool, incoming: Option<&Value>, outgoing: Option<&Value>) {
        if live {
            if let Some(value) = incoming {
                self.inc_value(value);
            }
            if let Some(value) = outgoing {
                self.dec_value(value);
            }
        }
        if let Some(value) = outgoing {
            self.unlink(value);
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("nodes", &self.arena.len())
            .field("references", &self.table.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
