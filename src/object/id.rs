//! Identifiers for indirect objects, arena nodes and trackers.
//!
//! All three identifiers are small `Copy` values. [`ObjectId`] is the `(number, generation)`
//! pair the file format uses to address indirect objects, [`TrackerId`] names one document's
//! tracker for the lifetime of the process, and [`NodeId`] is a generation-checked handle
//! into a tracker's node arena.
//!
//! Every handle that can end up inside a container carries the [`TrackerId`] of its owner,
//! which turns the question "does this value belong to this document?" into a field
//! comparison.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Highest object number the cross-reference formats can address.
pub const MAX_OBJECT_NUMBER: u32 = 8_388_607;

/// The `(number, generation)` pair addressing an indirect object.
///
/// Generations are carried for compatibility with files that use them; this engine writes
/// every object with generation 0 because numbering is normalized on each save.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    number: u32,
    generation: u16,
}

impl ObjectId {
    /// Creates a new object id
    #[must_use]
    pub fn new(number: u32, generation: u16) -> Self {
        ObjectId { number, generation }
    }

    /// Returns the object number
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Returns the generation number
    #[must_use]
    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// Returns true if this is the reserved object 0
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.number == 0
    }

    /// Returns the same number with generation 0
    #[must_use]
    pub fn normalized(&self) -> Self {
        ObjectId::new(self.number, 0)
    }
}

impl From<u32> for ObjectId {
    fn from(number: u32) -> Self {
        ObjectId::new(number, 0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({} {})", self.number, self.generation)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

static NEXT_TRACKER: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of one tracker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TrackerId(u32);

impl TrackerId {
    /// Issues a fresh tracker identity
    pub(crate) fn next() -> Self {
        TrackerId(NEXT_TRACKER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Generation-checked handle to a node in a tracker's arena.
///
/// A handle stays valid until the node is freed. Freed slots are reused with a bumped
/// generation, so an old handle can never silently alias a newer node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub(crate) tracker: TrackerId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    /// Returns the tracker owning this node
    #[must_use]
    pub fn tracker(&self) -> TrackerId {
        self.tracker
    }

    /// Returns the arena slot index
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the slot generation this handle was issued for
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeId({}, slot: {}, gen: {})",
            self.tracker, self.index, self.generation
        )
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}.{}", self.tracker, self.index, self.generation)
    }
}
