//! Generation-checked node arena.
//!
//! Freed slots go onto a free list and are reused with a bumped generation, so a stale
//! [`NodeId`] is detected instead of silently aliasing a newer node.

use crate::{
    object::{Node, NodeId, TrackerId},
    Error::StaleNode,
    Result,
};

enum Slot {
    Occupied { generation: u32, node: Node },
    Vacant { generation: u32 },
}

/// Arena owning every node of one tracker.
pub(crate) struct Arena {
    tracker: TrackerId,
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    len: usize,
}

impl Arena {
    pub(crate) fn new(tracker: TrackerId) -> Self {
        Arena {
            tracker,
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Allocate a slot for `node`, returning its handle.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation } => generation.wrapping_add(1),
                Slot::Occupied { generation, .. } => generation.wrapping_add(1),
            };
            *slot = Slot::Occupied { generation, node };
            return NodeId {
                tracker: self.tracker,
                index,
                generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            node,
        });
        NodeId {
            tracker: self.tracker,
            index,
            generation: 0,
        }
    }

    /// Free the slot behind `id`, returning the node it held.
    pub(crate) fn free(&mut self, id: NodeId) -> Result<Node> {
        self.get(id)?;
        let slot = &mut self.slots[id.index as usize];
        let previous = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: id.generation,
            },
        );
        self.free_list.push(id.index);
        self.len -= 1;
        match previous {
            Slot::Occupied { node, .. } => Ok(node),
            Slot::Vacant { .. } => Err(StaleNode(id)),
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Node> {
        if id.tracker != self.tracker {
            return Err(StaleNode(id));
        }
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Ok(node),
            _ => Err(StaleNode(id)),
        }
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        if id.tracker != self.tracker {
            return Err(StaleNode(id));
        }
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Ok(node),
            _ => Err(StaleNode(id)),
        }
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of live nodes
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over every live node with its handle
    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        let tracker = self.tracker;
        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(index, slot)| match slot {
                Slot::Occupied { generation, node } => Some((
                    NodeId {
                        tracker,
                        index: index as u32,
                        generation: *generation,
                    },
                    node,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("tracker", &self.tracker)
            .field("len", &self.len)
            .field("free", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Dictionary, NodeKind};

    fn node() -> Node {
        Node::new(NodeKind::Dictionary(Dictionary::default()))
    }

    #[test]
    fn test_alloc_and_get() {
        let mut arena = Arena::new(TrackerId::next());
        let a = arena.alloc(node());
        let b = arena.alloc(node());

        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert!(arena.get(a).is_ok());
        assert_eq!(arena.iter().count(), 2);
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut arena = Arena::new(TrackerId::next());
        let a = arena.alloc(node());
        arena.free(a).unwrap();
        let b = arena.alloc(node());

        assert_eq!(a.index(), b.index());
        assert!(matches!(arena.get(a), Err(StaleNode(_))));
        assert!(arena.get(b).is_ok());
        assert!(arena.free(a).is_err());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = Arena::new(TrackerId::next());
        let second = Arena::new(TrackerId::next());
        let a = first.alloc(node());

        assert!(!second.contains(a));
    }
}
