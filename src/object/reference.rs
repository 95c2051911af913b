//! Indirect references and their table records.

use std::fmt;

use crate::object::{ObjectId, SaveMode, TrackerId, Value};

/// Reference count of an entry whose children have never been counted.
///
/// Distinct from zero (which never lingers in the table) and from every live count.
pub const UNREGISTERED: i64 = -1;

/// Handle to an indirect object of one tracker.
///
/// The handle is a plain value; the record it designates lives in the owning tracker's
/// table and is looked up through [`crate::Tracker::entry`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub(crate) tracker: TrackerId,
    pub(crate) id: ObjectId,
}

impl ObjectRef {
    pub(crate) fn new(tracker: TrackerId, id: ObjectId) -> Self {
        ObjectRef { tracker, id }
    }

    /// Returns the tracker owning this reference
    #[must_use]
    pub fn tracker(&self) -> TrackerId {
        self.tracker
    }

    /// Returns the object id inside the owning tracker
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}, {})", self.tracker, self.id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One record of the tracker table.
#[derive(Debug, Clone)]
pub struct RefEntry {
    pub(crate) value: Option<Value>,
    pub(crate) refcount: i64,
    pub(crate) save_mode: SaveMode,
    pub(crate) save_string: Option<Vec<u8>>,
}

impl RefEntry {
    pub(crate) fn new(value: Option<Value>, save_mode: SaveMode) -> Self {
        RefEntry {
            value,
            refcount: UNREGISTERED,
            save_mode,
            save_string: None,
        }
    }

    /// The referenced value, `None` for an unresolved placeholder
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Current reference count, [`UNREGISTERED`] if never counted
    #[must_use]
    pub fn refcount(&self) -> i64 {
        self.refcount
    }

    /// The requested save mode
    #[must_use]
    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    /// Serialized form produced by the last index construction
    #[must_use]
    pub fn save_string(&self) -> Option<&[u8]> {
        self.save_string.as_deref()
    }

    /// Returns true if the value has not been supplied yet
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.value.is_none()
    }

    /// Returns true once the entry has been counted at least once
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.refcount != UNREGISTERED
    }
}
