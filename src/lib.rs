// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # pdfgraph
//!
//! The persistence core of a PDF document library: an in-memory object graph with strict
//! ownership rules, lazy reference counting with a repair pass, cross-document adoption and
//! copy, and construction of the file index (a classic `xref` table, or object streams plus a
//! cross-reference stream).
//!
//! ## Features
//!
//! - **Owned graph** - every container belongs to exactly one [`Tracker`]; mutable nodes have
//!   a single holder, frozen nodes may be shared
//! - **Reference counting** - counts follow reachability from the trailer; a bounded cycle
//!   probe flags uncertain cases and [`Tracker::fix_res_table`] makes them exact again
//! - **Import** - [`Tracker::adopt`] moves unshared values between documents,
//!   [`Tracker::make_copy`] duplicates them with cycle-safe placeholders, and pinned
//!   singletons such as pages are retargeted instead of copied
//! - **Compact output** - single-use objects are inlined, shared ones are packed into
//!   compressed object streams
//!
//! ## Quick Start
//!
//! ```rust
//! use pdfgraph::prelude::*;
//!
//! let mut document = Document::new()?;
//! let page = document.add_page()?;
//! let node = document.page_node(page)?;
//!
//! let tracker = document.tracker_mut();
//! let content = tracker.new_stream(b"0 0 m 100 100 l S".to_vec());
//! let content = tracker.create_reference(content.into())?;
//! tracker.set(node, "Contents", content.into())?;
//!
//! let codecs = CodecSet::default();
//! let bytes = document.save(&SaveOptions::default(), &codecs)?;
//! let reloaded = Document::load(&bytes, &codecs)?;
//! assert_eq!(reloaded.page_count()?, 1);
//! # Ok::<(), pdfgraph::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`object`] - handles and value types: [`Value`], [`object::ObjectId`], [`object::NodeId`]
//! - [`tracker`] - the per-document table, container mutation, counting, adoption and copy
//! - [`index`] - save-mode resolution, renumbering and object stream batching
//! - [`writer`] - PDF syntax and document assembly
//! - [`reader`] - loading documents back into a tracker
//! - [`codec`] - stream filters, `FlateDecode` out of the box
//! - [`file`] - byte sources and the reader's cursor
//! - [`document`] - catalog, page tree and page import on top of a tracker
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`]. Errors that concern a place in the graph
//! carry its [`object::NodePath`], for example `12 0 R/Kids[3]/Annots`. Inconsistent
//! reference counts are not an error: they raise [`Tracker::is_dirty`] and are repaired
//! before the next save.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

pub mod codec;
pub mod document;
pub mod file;
pub mod index;
pub mod object;
pub mod prelude;
pub mod reader;
pub mod tracker;
pub mod writer;

/// `pdfgraph` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `pdfgraph` Error type
///
/// # Examples
///
/// ```rust
/// use pdfgraph::{codec::CodecSet, reader, Error};
///
/// match reader::load(b"not a document", &CodecSet::default()) {
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
///     Ok(_) => unreachable!(),
/// }
/// ```
pub use error::Error;

pub use document::{Document, PageMap, ProducerStamp};
pub use object::{ObjectRef, SaveMode, Value};
pub use tracker::Tracker;
