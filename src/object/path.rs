//! Slot keys and node paths used for traversal bookkeeping and diagnostics.

use std::fmt;

use crate::object::{Name, ObjectId};

/// Addresses one child slot of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    /// Position inside an array
    Index(usize),
    /// Key inside a dictionary or a stream dictionary
    Key(Name),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Index(index) => write!(f, "[{index}]"),
            SlotKey::Key(key) => write!(f, "{key}"),
        }
    }
}

/// One step of a [`NodePath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Entered an indirect object
    Reference(ObjectId),
    /// Entered a container slot
    Slot(SlotKey),
}

/// Location of a node relative to the root of a traversal, e.g. `<12 0 R>/Kids[3]/Annots`.
///
/// Carried by structural and ownership errors so a caller can report precisely which
/// part of a document is defective.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    /// Creates an empty path (the traversal root)
    #[must_use]
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    /// Appends a segment
    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    /// Returns a copy extended by one segment
    #[must_use]
    pub fn join(&self, segment: PathSegment) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    /// Returns the segments
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns true for the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Reference(id) => write!(f, "<{id}>")?,
                PathSegment::Slot(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}
