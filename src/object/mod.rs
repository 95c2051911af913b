//! The object model: identifiers, values, containers and arena nodes.
//!
//! # Key Components
//!
//! - [`ObjectId`], [`TrackerId`], [`NodeId`] - identity handles
//! - [`Value`] - what a container slot holds
//! - [`Array`], [`Dictionary`], [`Stream`] - read-only views of the container shapes
//! - [`Node`] - a container plus ownership metadata
//! - [`ObjectRef`], [`RefEntry`] - indirect references and their table records
//! - [`SaveMode`] - per-reference layout choice
//! - [`NodePath`] - locations used in error reports
//!
//! All mutation goes through [`crate::Tracker`].

mod container;
mod id;
mod node;
mod path;
mod reference;
mod savemode;
mod value;

pub use container::{Array, Dictionary, Stream};
pub use id::{NodeId, ObjectId, TrackerId, MAX_OBJECT_NUMBER};
pub use node::{Holder, Node, NodeKind, PinnedKind};
pub use path::{NodePath, PathSegment, SlotKey};
pub use reference::{ObjectRef, RefEntry, UNREGISTERED};
pub use savemode::SaveMode;
pub use value::{Name, Value};

/// Deepest array and dictionary nesting a single object may have in a file
pub const MAX_NESTING_DEPTH: usize = 256;
