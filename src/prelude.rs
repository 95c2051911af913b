//! # pdfgraph Prelude
//!
//! The types most programs need, for glob import:
//!
//! ```rust
//! use pdfgraph::prelude::*;
//!
//! let mut tracker = Tracker::new();
//! let node = tracker.new_dictionary();
//! tracker.set(node, "Type", Value::name("Font"))?;
//! # Ok::<(), Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pdfgraph operations
pub use crate::Error;

/// The result type used throughout pdfgraph
pub use crate::Result;

// ================================================================================================
// Documents and Trackers
// ================================================================================================

/// Catalog, page tree and page import on top of a tracker
pub use crate::document::{Document, PageMap, ProducerStamp};

/// The per-document object table
pub use crate::tracker::Tracker;

/// Hooks for pinned singletons during copies and around saves
pub use crate::tracker::{NoRetarget, Retarget, RetargetRequest, SaveListener};

// ================================================================================================
// Object Model
// ================================================================================================

/// Values, handles and containers
pub use crate::object::{
    Array, Dictionary, Name, NodeId, NodePath, ObjectId, ObjectRef, PinnedKind, SaveMode, Stream,
    Value,
};

// ================================================================================================
// Saving and Loading
// ================================================================================================

/// Save configuration and the resulting layout
pub use crate::index::{IndexLayout, PdfVersion, SaveFlags, SaveOptions};

/// Stream filters
pub use crate::codec::{Codec, CodecSet, FlateCodec};

/// Loading from bytes
pub use crate::reader::load;
