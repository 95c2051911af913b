use thiserror::Error;

use crate::object::{NodeId, NodePath, ObjectId};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Structural Errors
/// Fatal for the call that raised them; the document graph is left as it was before the call.
/// - [`Error::CircularDirectReference`] - A loop of direct containment with no reference in it
/// - [`Error::UnresolvedPlaceholder`] - A placeholder reference outlived the operation that created it
/// - [`Error::ObjectLimitExceeded`] - More objects than the file format can address
/// - [`Error::UnassignedSaveMode`] - An object still carries [`crate::object::SaveMode::Unknown`]
/// - [`Error::Malformed`] - Damaged input or an internally inconsistent structure
///
/// ## Ownership Errors
/// Fatal to the specific call, recoverable by the caller (usually by copying instead of adopting).
/// - [`Error::AdoptionRefused`] - Some descendant cannot change owner
/// - [`Error::NodeAlreadyLinked`] - A mutable node already has a holder
/// - [`Error::ForeignValue`] - A handle of another tracker was offered without importing it
/// - [`Error::ImmutableNode`] - Attempted mutation of a frozen node
/// - [`Error::StaleNode`] - The arena slot behind a handle has been freed
/// - [`Error::ReferenceNotFound`] - The reference is not (or no longer) in the table
/// - [`Error::RetargetFailed`] - The owning document has no equivalent for a pinned object
///
/// ## Local Errors
/// - [`Error::Codec`] - A filter failed; index construction stores the data uncompressed instead
/// - [`Error::FileError`], [`Error::OutOfBounds`], [`Error::Empty`], [`Error::NotSupported`]
///
/// # Examples
///
/// ```rust
/// use pdfgraph::{Error, Tracker};
///
/// let mut tracker = Tracker::new();
/// let a = tracker.new_dictionary();
/// let b = tracker.new_dictionary();
/// tracker.set(a, "Child", b.into())?;
///
/// match tracker.set(b, "Parent", a.into()) {
///     Err(Error::CircularDirectReference { path }) => println!("refused: {path}"),
///     other => panic!("unexpected: {other:?}"),
/// }
/// # Ok::<(), pdfgraph::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Structural errors
    /// A cycle made only of direct containment was found.
    ///
    /// Reference-mediated cycles are legal; a loop in which every edge is a direct
    /// (inlined) container slot would describe infinite nesting and is rejected.
    #[error("Circular direct reference at {path}")]
    CircularDirectReference {
        /// Location of the slot that closes the loop
        path: NodePath,
    },

    /// A placeholder reference was still unresolved when its scope closed.
    #[error("Placeholder reference {0} was never resolved")]
    UnresolvedPlaceholder(ObjectId),

    /// The document holds more objects than the format can address.
    #[error("Object count {0} exceeds the addressable maximum")]
    ObjectLimitExceeded(usize),

    /// A reference still has [`crate::object::SaveMode::Unknown`] at save time.
    #[error("Save mode of {0} was never assigned")]
    UnassignedSaveMode(ObjectId),

    /// The structure is damaged and could not be processed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    // Ownership errors
    /// Adoption was refused because a descendant cannot change owner.
    ///
    /// The caller can always fall back to [`crate::Tracker::make_copy`], which is what
    /// [`crate::Tracker::import`] does.
    #[error("Adoption refused at {path}: {reason}")]
    AdoptionRefused {
        /// Location of the first node that could not be adopted
        path: NodePath,
        /// Why the node could not be adopted
        reason: &'static str,
    },

    /// A mutable node that already has a holder was linked a second time.
    #[error("Node {0} is already linked into the graph")]
    NodeAlreadyLinked(NodeId),

    /// A handle belonging to another tracker was offered to a container.
    #[error("Value belongs to another document, import it first")]
    ForeignValue,

    /// A frozen node was the target of a mutation.
    #[error("Node {0} is immutable")]
    ImmutableNode(NodeId),

    /// The arena slot behind the handle has been freed or reused.
    #[error("Node {0} is stale")]
    StaleNode(NodeId),

    /// The reference is not present in the tracker table.
    #[error("Reference {0} not found")]
    ReferenceNotFound(ObjectId),

    /// The owning document could not supply an equivalent for a pinned singleton.
    #[error("Retarget failed - {0}")]
    RetargetFailed(String),

    // Container access errors
    /// The node does not have the container shape required by the operation.
    #[error("Node {node} is not {expected}")]
    TypeMismatch {
        /// The node that was accessed
        node: NodeId,
        /// The shape the operation expected
        expected: &'static str,
    },

    /// Array index past the end of the array.
    #[error("Index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Array length at the time of the access
        len: usize,
    },

    // Local errors
    /// A filter failed to encode or decode.
    #[error("Codec {filter} failed: {message}")]
    Codec {
        /// Filter name, e.g. `FlateDecode`
        filter: String,
        /// Details from the codec
        message: String,
    },

    /// An out of bound access was attempted while reading input.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This file or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
