//! Deferred slot writes for direct loops met while copying.
//!
//! When a copy finds a container directly holding one of its own ancestors, and a reference
//! somewhere along the loop makes the structure legal, the slot cannot be filled yet: the
//! ancestor's copy is still under construction. A [`Placeholder`] records what has to be
//! written where, and is resolved once the ancestor's frame completes.

use crate::object::{NodeId, ObjectRef, SlotKey};

/// A slot of a local node waiting for the copy of a source ancestor.
#[derive(Debug, Clone)]
pub(crate) struct Placeholder {
    /// The source node the slot stands for
    pub(crate) target: NodeId,
    /// The local node owning the slot
    pub(crate) holder: NodeId,
    /// The slot to fill
    pub(crate) slot: SlotKey,
    /// Ancestors (source nodes) on the copy stack when the loop was detected
    pub(crate) snapshot: Vec<NodeId>,
}

/// How a placeholder gets filled once its target is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The target's copy already is the value of a local reference
    Reuse(ObjectRef),
    /// The target's copy is held directly and has to be moved behind a new reference
    Wrap,
}

impl Placeholder {
    /// Depth of the target inside the snapshot, or `None` if the snapshot does not contain it
    pub(crate) fn target_depth(&self) -> Option<usize> {
        self.snapshot.iter().position(|node| *node == self.target)
    }

    /// Picks the resolution given the reference the target was entered through, or the one
    /// created for an earlier placeholder of the same target.
    pub(crate) fn resolution(existing: Option<ObjectRef>) -> Resolution {
        existing.map_or(Resolution::Wrap, Resolution::Reuse)
    }
}

/// Placeholders waiting for their targets.
#[derive(Debug, Default)]
pub(crate) struct PlaceholderQueue {
    pending: Vec<Placeholder>,
}

impl PlaceholderQueue {
    pub(crate) fn push(&mut self, placeholder: Placeholder) {
        self.pending.push(placeholder);
    }

    /// Removes and returns every placeholder waiting for `target`, in detection order
    pub(crate) fn take_for(&mut self, target: NodeId) -> Vec<Placeholder> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|placeholder| placeholder.target == target);
        self.pending = waiting;
        ready
    }

    pub(crate) fn first(&self) -> Option<&Placeholder> {
        self.pending.first()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
