//! Arena nodes: containers plus the ownership metadata the tracker keeps for them.
//!
//! A [`Node`] wraps one of the three container shapes ([`NodeKind`]) together with
//!
//! - a `mutable` flag. Mutable nodes have at most one [`Holder`]; immutable (frozen) nodes
//!   may be aliased by any number of slots and count their aliases in `links`,
//! - an optional [`PinnedKind`] marking document singletons that are never duplicated,
//! - the back link to whatever holds the node, which the tracker follows to decide whether
//!   a container is reachable and to detect direct containment loops.

use strum::{EnumCount, EnumIter};

use crate::object::{
    container::dictionary_keys, Array, Dictionary, ObjectId, ObjectRef, SaveMode, SlotKey,
    Stream, Value,
};

/// Document singletons that are retargeted instead of copied.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, EnumIter, EnumCount, strum::Display)]
pub enum PinnedKind {
    /// A leaf of the page tree
    Page,
    /// The root of the page tree
    PageTree,
    /// The document catalog
    Catalog,
    /// The trailer dictionary
    Trailer,
}

/// What currently holds a mutable node.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Holder {
    /// A slot of another container node
    Node(crate::object::NodeId),
    /// The value of an indirect object
    Reference(ObjectId),
}

/// The container shape of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `[ ... ]`
    Array(Array),
    /// `<< ... >>`
    Dictionary(Dictionary),
    /// A dictionary followed by `stream ... endstream`
    Stream(Stream),
}

impl NodeKind {
    /// Short name of the shape, used in diagnostics
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Array(_) => "an array",
            NodeKind::Dictionary(_) => "a dictionary",
            NodeKind::Stream(_) => "a stream",
        }
    }

    /// Returns the slot keys in iteration order
    #[must_use]
    pub fn slots(&self) -> Vec<SlotKey> {
        match self {
            NodeKind::Array(array) => (0..array.len()).map(SlotKey::Index).collect(),
            NodeKind::Dictionary(dict) => dictionary_keys(dict),
            NodeKind::Stream(stream) => dictionary_keys(stream.dict()),
        }
    }

    /// Value stored in `slot`
    #[must_use]
    pub fn get(&self, slot: &SlotKey) -> Option<&Value> {
        match (self, slot) {
            (NodeKind::Array(array), SlotKey::Index(index)) => array.get(*index),
            (NodeKind::Dictionary(dict), SlotKey::Key(key)) => dict.get(key.as_str()),
            (NodeKind::Stream(stream), SlotKey::Key(key)) => stream.dict().get(key.as_str()),
            _ => None,
        }
    }

    /// Overwrites an existing slot, returning the previous value.
    ///
    /// Used by the tracker internals that rewrite handles in place; no bookkeeping happens
    /// here.
    pub(crate) fn put(&mut self, slot: &SlotKey, value: Value) -> Option<Value> {
        match (self, slot) {
            (NodeKind::Array(array), SlotKey::Index(index)) => array.replace(*index, value),
            (NodeKind::Dictionary(dict), SlotKey::Key(key)) => dict.insert(key.clone(), value),
            (NodeKind::Stream(stream), SlotKey::Key(key)) => {
                stream.dict_mut().insert(key.clone(), value)
            }
            _ => None,
        }
    }

    /// Iterates over every child value, primitives included
    pub fn children(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            NodeKind::Array(array) => Box::new(array.iter()),
            NodeKind::Dictionary(dict) => Box::new(dict.iter().map(|(_, value)| value)),
            NodeKind::Stream(stream) => Box::new(stream.dict().iter().map(|(_, value)| value)),
        }
    }

    /// References held directly in this container's slots (one level, per occurrence)
    #[must_use]
    pub fn child_refs(&self) -> Vec<ObjectRef> {
        self.children().filter_map(Value::as_reference).collect()
    }

    /// Direct sub-objects held in this container's slots
    #[must_use]
    pub fn child_nodes(&self) -> Vec<crate::object::NodeId> {
        self.children().filter_map(Value::as_node).collect()
    }

    /// Builds a structurally identical container whose child values are mapped through `f`.
    ///
    /// Stream payloads are carried over unchanged.
    pub(crate) fn map_children<F>(&self, mut f: F) -> crate::Result<NodeKind>
    where
        F: FnMut(&Value) -> crate::Result<Value>,
    {
        Ok(match self {
            NodeKind::Array(array) => {
                let mut items = Vec::with_capacity(array.len());
                for value in array.iter() {
                    items.push(f(value)?);
                }
                NodeKind::Array(Array::from_values(items))
            }
            NodeKind::Dictionary(dict) => NodeKind::Dictionary(map_dictionary(dict, &mut f)?),
            NodeKind::Stream(stream) => NodeKind::Stream(Stream::new(
                map_dictionary(stream.dict(), &mut f)?,
                stream.data().to_vec(),
            )),
        })
    }

    /// Same shape, every slot set to `null`. Used to pre-allocate copy targets.
    #[must_use]
    pub(crate) fn hollow(&self) -> NodeKind {
        match self {
            NodeKind::Array(array) => {
                NodeKind::Array(Array::from_values(vec![Value::Null; array.len()]))
            }
            NodeKind::Dictionary(dict) => NodeKind::Dictionary(hollow_dictionary(dict)),
            NodeKind::Stream(stream) => NodeKind::Stream(Stream::new(
                hollow_dictionary(stream.dict()),
                stream.data().to_vec(),
            )),
        }
    }
}

fn map_dictionary<F>(dict: &Dictionary, f: &mut F) -> crate::Result<Dictionary>
where
    F: FnMut(&Value) -> crate::Result<Value>,
{
    let mut mapped = Dictionary::new();
    for (key, value) in dict.iter() {
        mapped.insert(key.clone(), f(value)?);
    }
    Ok(mapped)
}

fn hollow_dictionary(dict: &Dictionary) -> Dictionary {
    let mut hollow = Dictionary::new();
    for key in dict.keys() {
        hollow.insert(key.clone(), Value::Null);
    }
    hollow
}

/// A container living in a tracker's arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) mutable: bool,
    pub(crate) pinned: Option<PinnedKind>,
    pub(crate) holder: Option<Holder>,
    pub(crate) links: u32,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            mutable: true,
            pinned: None,
            holder: None,
            links: 0,
        }
    }

    /// The container shape
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns false once the node has been frozen
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// The singleton role of this node, if any
    #[must_use]
    pub fn pinned(&self) -> Option<PinnedKind> {
        self.pinned
    }

    /// The current holder of a mutable node
    #[must_use]
    pub fn holder(&self) -> Option<Holder> {
        self.holder
    }

    /// Number of slots or references currently pointing at this node
    #[must_use]
    pub fn links(&self) -> u32 {
        self.links
    }

    /// Returns true for stream nodes
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self.kind, NodeKind::Stream(_))
    }

    /// Mode given to a fresh reference wrapping this node
    #[must_use]
    pub fn default_save_mode(&self) -> SaveMode {
        if self.is_stream() || self.pinned.is_some() {
            SaveMode::Indirect
        } else {
            SaveMode::Auto
        }
    }

    /// The array payload, if this is an array
    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match &self.kind {
            NodeKind::Array(array) => Some(array),
            _ => None,
        }
    }

    /// The dictionary payload, or the stream dictionary for streams
    #[must_use]
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match &self.kind {
            NodeKind::Dictionary(dict) => Some(dict),
            NodeKind::Stream(stream) => Some(stream.dict()),
            NodeKind::Array(_) => None,
        }
    }

    /// The stream payload, if this is a stream
    #[must_use]
    pub fn as_stream(&self) -> Option<&Stream> {
        match &self.kind {
            NodeKind::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Name, TrackerId};

    fn sample_dictionary() -> NodeKind {
        let mut dict = Dictionary::new();
        dict.insert(Name::from("Type"), Value::name("Page"));
        dict.insert(
            Name::from("Contents"),
            Value::Reference(ObjectRef::new(TrackerId::next(), ObjectId::new(5, 0))),
        );
        NodeKind::Dictionary(dict)
    }

    #[test]
    fn test_slots_and_get() {
        let kind = sample_dictionary();
        let slots = kind.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(kind.get(&slots[0]), Some(&Value::name("Page")));
        assert_eq!(kind.get(&SlotKey::Index(0)), None);
    }

    #[test]
    fn test_child_refs_one_level() {
        let kind = sample_dictionary();
        let refs = kind.child_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id(), ObjectId::new(5, 0));
        assert!(kind.child_nodes().is_empty());
    }

    #[test]
    fn test_hollow_keeps_shape() {
        let kind = sample_dictionary();
        let hollow = kind.hollow();
        assert_eq!(hollow.slots(), kind.slots());
        assert!(hollow.children().all(Value::is_null));
    }

    #[test]
    fn test_map_children() {
        let array = NodeKind::Array(Array::from_values(vec![Value::from(1), Value::from(2)]));
        let doubled = array
            .map_children(|value| Ok(Value::from(value.as_integer().unwrap_or(0) * 2)))
            .unwrap();
        assert_eq!(doubled.get(&SlotKey::Index(1)), Some(&Value::from(4)));
    }

    #[test]
    fn test_default_save_mode() {
        let mut node = Node::new(NodeKind::Stream(Stream::default()));
        assert_eq!(node.default_save_mode(), SaveMode::Indirect);

        node = Node::new(NodeKind::Dictionary(Dictionary::new()));
        assert_eq!(node.default_save_mode(), SaveMode::Auto);
        node.pinned = Some(PinnedKind::Page);
        assert_eq!(node.default_save_mode(), SaveMode::Indirect);
    }
}
