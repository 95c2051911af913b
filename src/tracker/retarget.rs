//! Collaborator traits implemented by the owning document.

use crate::{
    index::IndexLayout,
    object::{NodeId, ObjectRef, PinnedKind, Value},
    tracker::Tracker,
    Error::RetargetFailed,
    Result,
};

/// A pinned singleton reached while copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetargetRequest {
    /// Role of the singleton
    pub kind: PinnedKind,
    /// The foreign node
    pub node: NodeId,
    /// The foreign reference through which the node was reached, if any
    pub reference: Option<ObjectRef>,
}

/// Supplies the destination's equivalent of a pinned singleton.
///
/// Copies never duplicate pages, page trees, catalogs or trailers. When a copy reaches one,
/// it calls this hook once per distinct singleton and stores whatever value is returned at
/// every place the singleton was used. An error aborts the whole copy.
pub trait Retarget {
    /// Returns the value standing in for `request` inside `dest`
    ///
    /// # Errors
    /// Implementations return [`crate::Error::RetargetFailed`] when no equivalent exists.
    fn retarget(
        &mut self,
        dest: &mut Tracker,
        source: &Tracker,
        request: RetargetRequest,
    ) -> Result<Value>;
}

/// Refuses every pinned singleton.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetarget;

impl Retarget for NoRetarget {
    fn retarget(
        &mut self,
        _dest: &mut Tracker,
        _source: &Tracker,
        request: RetargetRequest,
    ) -> Result<Value> {
        Err(RetargetFailed(format!(
            "no equivalent for {} {}",
            request.kind, request.node
        )))
    }
}

/// Notified around every [`Tracker::save`].
pub trait SaveListener: Send {
    /// Runs before the index is built; may still mutate the graph
    fn before_save(&mut self, tracker: &mut Tracker) -> Result<()>;

    /// Runs after the document has been serialized
    fn after_save(&mut self, _tracker: &Tracker, _layout: &IndexLayout) -> Result<()> {
        Ok(())
    }
}
