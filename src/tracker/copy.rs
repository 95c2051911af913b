//! Structural copy of a foreign subgraph.
//!
//! A [`CopySession`] walks the source graph with two explicit stacks instead of recursion:
//! the check stack holds the source nodes currently being copied (the ancestors of the next
//! slot), the resume stack holds one [`Frame`] per ancestor with the pre-allocated local
//! node and the next slot position.
//!
//! For every child the session takes one of these paths:
//!
//! 1. primitives are cloned;
//! 2. references map through `ref_map`, so every pointer to the same foreign object ends at
//!    one local reference. The local reference is created as a placeholder on first
//!    encounter and receives its value when the frame copying that value completes, which is
//!    what lets reference cycles close onto themselves;
//! 3. frozen nodes are copied once per session (and once per cache lifetime) and aliased.
//!    They get a frame like mutable nodes, so deep frozen subtrees need no recursion either;
//! 4. pinned singletons are handed to the [`Retarget`] collaborator, once per singleton;
//! 5. a direct child equal to an ancestor queues a [`Placeholder`] if a reference mediates
//!    the loop and fails with [`crate::Error::CircularDirectReference`] otherwise.
//!
//! A reference whose value is another reference is followed in a loop, and the chain of local
//! references is filled from its far end once the loop stops.
//!
//! Any error rolls the destination back: references created by the session are pruned, its
//! nodes are freed and its cache entries are never committed.

use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    object::{Holder, Name, Node, NodeId, ObjectId, ObjectRef, PathSegment, PinnedKind, SlotKey, Value},
    tracker::{
        placeholder::{Placeholder, PlaceholderQueue, Resolution},
        CacheEntry, ForeignKey, Retarget, RetargetRequest, Tracker,
    },
    Error::{CircularDirectReference, Empty, ForeignValue, NodeAlreadyLinked, UnresolvedPlaceholder},
    Result,
};

/// One source container being copied.
struct Frame {
    source: NodeId,
    local: NodeId,
    slots: Vec<SlotKey>,
    position: usize,
    via_reference: Option<ObjectRef>,
    frozen: bool,
}

/// Outcome of copying one reference of a chain.
enum Link {
    /// The local value; a pushed frame may still be filling it
    Copied(Value),
    /// `local` stands for a source reference whose value is the reference `next`
    Forward { local: ObjectRef, next: ObjectRef },
}

/// State of one copy operation from `source` into `dest`.
pub(crate) struct CopySession<'a> {
    dest: &'a mut Tracker,
    source: &'a Tracker,
    retarget: &'a mut dyn Retarget,
    ref_map: HashMap<ObjectId, ObjectRef>,
    pinned: HashMap<NodeId, Value>,
    frozen: HashMap<NodeId, NodeId>,
    completed: HashMap<NodeId, (NodeId, Option<ObjectRef>)>,
    wrapped: HashMap<NodeId, ObjectRef>,
    check: Vec<NodeId>,
    resume: Vec<Frame>,
    placeholders: PlaceholderQueue,
    created_refs: Vec<ObjectRef>,
    created_nodes: Vec<NodeId>,
    cache_entries: Vec<(ForeignKey, CacheEntry)>,
    roots: Vec<Value>,
}

impl<'a> CopySession<'a> {
    pub(crate) fn new(
        dest: &'a mut Tracker,
        source: &'a Tracker,
        retarget: &'a mut dyn Retarget,
    ) -> Self {
        CopySession {
            dest,
            source,
            retarget,
            ref_map: HashMap::new(),
            pinned: HashMap::new(),
            frozen: HashMap::new(),
            completed: HashMap::new(),
            wrapped: HashMap::new(),
            check: Vec::new(),
            resume: Vec::new(),
            placeholders: PlaceholderQueue::default(),
            created_refs: Vec::new(),
            created_nodes: Vec::new(),
            cache_entries: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Copies every value in order; the results are returned by [`CopySession::commit`]
    pub(crate) fn copy_all(&mut self, values: Vec<Value>) -> Result<()> {
        for value in values {
            let copied = self.copy_root(value)?;
            self.roots.push(copied);
            self.run()?;
        }
        self.finish()
    }

    /// Publishes the session's cache entries and returns the copied roots
    pub(crate) fn commit(self) -> Vec<Value> {
        debug!(
            "copy session finished: {} references, {} nodes created",
            self.created_refs.len(),
            self.created_nodes.len()
        );
        self.dest.cache_commit(self.cache_entries);
        self.roots
    }

    /// Undoes everything the session allocated
    pub(crate) fn rollback(self) {
        debug!(
            "rolling back copy session: {} references, {} nodes",
            self.created_refs.len(),
            self.created_nodes.len()
        );
        self.dest.prune_refs(&self.created_refs);
        for node in self.created_nodes {
            if self.dest.arena.contains(node) {
                self.dest.free_subtree(node);
            }
        }
    }

    fn copy_root(&mut self, value: Value) -> Result<Value> {
        match value.owner() {
            None => return Ok(value),
            Some(owner) if owner == self.dest.id() => return Ok(value),
            Some(owner) if owner != self.source.id() => return Err(ForeignValue),
            Some(_) => {}
        }
        match value {
            Value::Reference(reference) => self.copy_reference(reference),
            Value::Node(node) => self.copy_node(node, None)?.ok_or(Empty),
            primitive => Ok(primitive),
        }
    }

    fn run(&mut self) -> Result<()> {
        while let Some(frame) = self.resume.last_mut() {
            if frame.position >= frame.slots.len() {
                self.complete_frame()?;
                continue;
            }
            let slot = frame.slots[frame.position].clone();
            frame.position += 1;
            let (source, local) = (frame.source, frame.local);

            let child = self
                .source
                .node(source)?
                .kind()
                .get(&slot)
                .cloned()
                .unwrap_or(Value::Null);
            let copied = match child {
                Value::Reference(reference) => {
                    if reference.tracker() != self.source.id() {
                        return Err(ForeignValue);
                    }
                    Some(self.copy_reference(reference)?)
                }
                Value::Node(node) => self.copy_node(node, Some((local, &slot)))?,
                primitive => Some(primitive),
            };
            if let Some(value) = copied {
                self.write_slot(local, &slot, value)?;
            }
        }
        Ok(())
    }

    /// Copies a direct node; `None` means the slot is filled later by a placeholder
    fn copy_node(
        &mut self,
        node: NodeId,
        parent: Option<(NodeId, &SlotKey)>,
    ) -> Result<Option<Value>> {
        let source = self.source;
        let entry = source.node(node)?;
        if let Some(kind) = entry.pinned() {
            return self.retarget_pinned(kind, node, None).map(Some);
        }
        if !entry.is_mutable() {
            return self
                .copy_frozen(node, None)
                .map(|local| Some(Value::Node(local)));
        }

        if let Some(depth) = self.check.iter().position(|ancestor| *ancestor == node) {
            let mediated = self.resume[depth + 1..]
                .iter()
                .any(|frame| frame.via_reference.is_some());
            let (holder, slot) = match parent {
                Some((holder, slot)) if mediated => (holder, slot.clone()),
                _ => {
                    let closing = self.check.last().copied().unwrap_or(node);
                    let mut path = self.source.path_to(closing);
                    if let Some((_, slot)) = parent {
                        path.push(PathSegment::Slot(slot.clone()));
                    }
                    return Err(CircularDirectReference { path });
                }
            };
            trace!("queueing placeholder for direct loop back to {}", node);
            self.placeholders.push(Placeholder {
                target: node,
                holder,
                slot,
                snapshot: self.check.clone(),
            });
            return Ok(None);
        }

        let local = self.push_frame(node, None)?;
        Ok(Some(Value::Node(local)))
    }

    fn copy_reference(&mut self, reference: ObjectRef) -> Result<Value> {
        let mut chain = Vec::new();
        let mut next = reference;
        let mut value = loop {
            match self.copy_link(next)? {
                Link::Copied(value) => break value,
                Link::Forward { local, next: inner } => {
                    chain.push(local);
                    next = inner;
                }
            }
        };
        for local in chain.into_iter().rev() {
            self.dest.set_reference_value(local, value)?;
            value = Value::Reference(local);
        }
        Ok(value)
    }

    fn copy_link(&mut self, reference: ObjectRef) -> Result<Link> {
        if let Some(local) = self.ref_map.get(&reference.id()) {
            return Ok(Link::Copied(Value::Reference(*local)));
        }
        if let Some(hit) = self.dest.cache_lookup(ForeignKey::Reference(reference)) {
            if let Some(local) = hit.reference {
                self.ref_map.insert(reference.id(), local);
            }
            return Ok(Link::Copied(hit.local));
        }

        let source = self.source;
        let entry = source.entry(reference)?;
        let save_mode = entry.save_mode();
        let value = entry
            .value()
            .cloned()
            .ok_or(UnresolvedPlaceholder(reference.id()))?;
        if let Value::Node(node) = &value {
            if let Some(kind) = source.node(*node)?.pinned() {
                return self
                    .retarget_pinned(kind, *node, Some(reference))
                    .map(Link::Copied);
            }
        }

        let local = self.dest.create_temp_reference()?;
        self.dest.set_save_mode(local, save_mode)?;
        self.created_refs.push(local);
        self.ref_map.insert(reference.id(), local);
        self.cache_entries.push((
            ForeignKey::Reference(reference),
            CacheEntry {
                local: Value::Reference(local),
                reference: Some(local),
            },
        ));

        match value {
            Value::Node(node) if source.node(node)?.is_mutable() => {
                if self.check.contains(&node) {
                    return Err(malformed_error!(
                        "Node {} is both held directly and by {}",
                        node,
                        reference
                    ));
                }
                self.push_frame(node, Some(local))?;
            }
            Value::Node(node) => {
                self.copy_frozen(node, Some(local))?;
            }
            Value::Reference(next) => return Ok(Link::Forward { local, next }),
            primitive => {
                self.dest.set_reference_value(local, primitive)?;
            }
        }
        Ok(Link::Copied(Value::Reference(local)))
    }

    /// Copies a frozen subtree once and aliases it afterwards.
    ///
    /// A first encounter pushes a frame; `via_reference` receives the copy when it completes.
    fn copy_frozen(&mut self, node: NodeId, via_reference: Option<ObjectRef>) -> Result<NodeId> {
        let known = match self.frozen.get(&node) {
            Some(local) => Some(*local),
            None => match self.dest.cache_lookup(ForeignKey::Node(node)) {
                Some(CacheEntry {
                    local: Value::Node(local),
                    ..
                }) => {
                    self.frozen.insert(node, local);
                    Some(local)
                }
                _ => None,
            },
        };
        if let Some(local) = known {
            if let Some(reference) = via_reference {
                self.dest.set_reference_value(reference, Value::Node(local))?;
            }
            return Ok(local);
        }

        let local = self.push_frame(node, via_reference)?;
        self.frozen.insert(node, local);
        Ok(local)
    }

    fn retarget_pinned(
        &mut self,
        kind: PinnedKind,
        node: NodeId,
        reference: Option<ObjectRef>,
    ) -> Result<Value> {
        if let Some(value) = self.pinned.get(&node) {
            return Ok(value.clone());
        }
        let request = RetargetRequest {
            kind,
            node,
            reference,
        };
        let value = self.retarget.retarget(self.dest, self.source, request)?;
        self.dest.check_owned(&value)?;
        trace!("retargeted {} {} to {:?}", kind, node, value);

        self.pinned.insert(node, value.clone());
        if let (Some(reference), Value::Reference(local)) = (reference, &value) {
            self.ref_map.insert(reference.id(), *local);
        }
        Ok(value)
    }

    fn push_frame(&mut self, node: NodeId, via_reference: Option<ObjectRef>) -> Result<NodeId> {
        let entry = self.source.node(node)?;
        let slots = entry.kind().slots();
        let frozen = !entry.is_mutable();
        let mut copy = Node::new(entry.kind().hollow());
        copy.mutable = !frozen;
        let local = self.dest.arena.alloc(copy);
        self.created_nodes.push(local);
        self.check.push(node);
        self.resume.push(Frame {
            source: node,
            local,
            slots,
            position: 0,
            via_reference,
            frozen,
        });
        Ok(local)
    }

    fn complete_frame(&mut self) -> Result<()> {
        let Some(frame) = self.resume.pop() else {
            return Ok(());
        };
        self.check.pop();
        if let Some(reference) = frame.via_reference {
            self.dest
                .set_reference_value(reference, Value::Node(frame.local))?;
        }
        if frame.frozen {
            self.cache_entries.push((
                ForeignKey::Node(frame.source),
                CacheEntry {
                    local: Value::Node(frame.local),
                    reference: None,
                },
            ));
        }
        self.completed
            .insert(frame.source, (frame.local, frame.via_reference));

        for placeholder in self.placeholders.take_for(frame.source) {
            self.resolve(placeholder)?;
        }
        Ok(())
    }

    fn resolve(&mut self, placeholder: Placeholder) -> Result<()> {
        let depth = placeholder.target_depth().ok_or_else(|| {
            malformed_error!("Placeholder target {} not on its stack", placeholder.target)
        })?;
        let (local, via) = self
            .completed
            .get(&placeholder.target)
            .copied()
            .ok_or_else(|| malformed_error!("Target {} never completed", placeholder.target))?;
        trace!(
            "resolving placeholder for {} found at depth {}",
            placeholder.target,
            depth
        );

        let existing = via.or_else(|| self.wrapped.get(&placeholder.target).copied());
        let reference = match Placeholder::resolution(existing) {
            Resolution::Reuse(reference) => reference,
            Resolution::Wrap => self.wrap(placeholder.target, local)?,
        };
        self.write_slot(
            placeholder.holder,
            &placeholder.slot,
            Value::Reference(reference),
        )
    }

    /// Moves a finished, directly held local node behind a new reference
    fn wrap(&mut self, target: NodeId, local: NodeId) -> Result<ObjectRef> {
        let reference = self.dest.create_temp_reference()?;
        self.created_refs.push(reference);

        match self.dest.arena.get(local)?.holder() {
            Some(Holder::Node(parent)) => {
                let slot = self.dest.slot_of(parent, local).ok_or_else(|| {
                    malformed_error!("Node {} missing from its holder {}", local, parent)
                })?;
                self.dest
                    .arena
                    .get_mut(parent)?
                    .kind
                    .put(&slot, Value::Reference(reference));
            }
            Some(Holder::Reference(id)) => {
                return Err(malformed_error!("Node {} is already held by {}", local, id));
            }
            None => {
                for root in &mut self.roots {
                    if *root == Value::Node(local) {
                        *root = Value::Reference(reference);
                    }
                }
            }
        }

        let node = self.dest.arena.get_mut(local)?;
        node.holder = None;
        node.links = 0;
        self.dest
            .set_reference_value(reference, Value::Node(local))?;
        self.wrapped.insert(target, reference);
        Ok(reference)
    }

    /// Stores `value` in a slot of a session-owned node
    fn write_slot(&mut self, holder: NodeId, slot: &SlotKey, value: Value) -> Result<()> {
        if let Value::Node(child) = value {
            let node = self.dest.arena.get_mut(child)?;
            if node.mutable {
                if node.holder.is_some() {
                    return Err(NodeAlreadyLinked(child));
                }
                node.holder = Some(Holder::Node(holder));
                node.links = 1;
            } else {
                node.links += 1;
            }
        }
        self.dest.arena.get_mut(holder)?.kind.put(slot, value);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(placeholder) = self.placeholders.first() {
            let id = self
                .source
                .path_to(placeholder.target)
                .segments()
                .iter()
                .find_map(|segment| match segment {
                    PathSegment::Reference(id) => Some(*id),
                    PathSegment::Slot(_) => None,
                })
                .unwrap_or_else(|| ObjectId::new(0, 0));
            return Err(UnresolvedPlaceholder(id));
        }
        for reference in &self.created_refs {
            if self
                .dest
                .table
                .get(&reference.id())
                .is_some_and(|entry| entry.is_placeholder())
            {
                return Err(UnresolvedPlaceholder(reference.id()));
            }
        }
        Ok(())
    }
}

impl Tracker {
    /// Copies a foreign value into this tracker.
    ///
    /// Indirect objects reachable from `value` are copied once each; cycles through
    /// references are reproduced. Pinned singletons are not copied: `retarget` supplies the
    /// local equivalent. The source is only borrowed, so it cannot change while the copy
    /// runs. On error nothing the copy created is left behind.
    ///
    /// # Errors
    /// - [`crate::Error::CircularDirectReference`] for direct loops in the source
    /// - [`crate::Error::RetargetFailed`] or any error of the retarget hook
    /// - [`crate::Error::ForeignValue`] if `value` belongs to neither tracker
    pub fn make_copy(
        &mut self,
        source: &Tracker,
        value: Value,
        retarget: &mut dyn Retarget,
    ) -> Result<Value> {
        let mut copies = copy_values(self, source, vec![value], retarget)?;
        copies.pop().ok_or(Empty)
    }

    /// Copies the entries of a foreign dictionary into an existing local dictionary.
    ///
    /// Used to duplicate pinned singletons such as pages, whose own identity is never
    /// copied. Keys listed in `skip` are left out.
    pub fn copy_contents(
        &mut self,
        source: &Tracker,
        from: NodeId,
        into: NodeId,
        skip: &[&str],
        retarget: &mut dyn Retarget,
    ) -> Result<()> {
        self.writable(into)?;
        let (keys, values): (Vec<Name>, Vec<Value>) = source
            .dictionary(from)?
            .iter()
            .filter(|(key, _)| !skip.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .unzip();

        let copies = copy_values(self, source, values, retarget)?;
        for (key, value) in keys.into_iter().zip(copies) {
            self.set(into, key, value)?;
        }
        Ok(())
    }
}

fn copy_values(
    dest: &mut Tracker,
    source: &Tracker,
    values: Vec<Value>,
    retarget: &mut dyn Retarget,
) -> Result<Vec<Value>> {
    let mut session = CopySession::new(dest, source, retarget);
    match session.copy_all(values) {
        Ok(()) => Ok(session.commit()),
        Err(error) => {
            session.rollback();
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tracker::NoRetarget, Error};

    #[test]
    fn test_copy_primitive_and_owned_values() {
        let mut dest = Tracker::new();
        let source = Tracker::new();
        let local = dest.new_dictionary();

        let copied = dest
            .make_copy(&source, Value::from(3), &mut NoRetarget)
            .unwrap();
        assert_eq!(copied, Value::from(3));
        let same = dest
            .make_copy(&source, Value::Node(local), &mut NoRetarget)
            .unwrap();
        assert_eq!(same, Value::Node(local));
    }

    #[test]
    fn test_copy_reference_cycle() {
        let mut source = Tracker::new();
        let a_dict = source.new_dictionary();
        let a = source.create_reference(a_dict.into()).unwrap();
        let b_dict = source.new_dictionary();
        source.set(b_dict, "Back", a.into()).unwrap();
        let b = source.create_reference(b_dict.into()).unwrap();
        source.set(a_dict, "Next", b.into()).unwrap();

        let mut dest = Tracker::new();
        let copy = dest
            .make_copy(&source, a.into(), &mut NoRetarget)
            .unwrap();
        assert_eq!(dest.reference_count(), 2);

        let local_a = copy.as_reference().unwrap();
        let local_a_dict = dest.deref(local_a).unwrap().as_node().unwrap();
        let local_b = dest
            .get(local_a_dict, "Next")
            .unwrap()
            .and_then(Value::as_reference)
            .unwrap();
        let local_b_dict = dest.deref(local_b).unwrap().as_node().unwrap();
        assert_eq!(
            dest.get(local_b_dict, "Back").unwrap(),
            Some(&Value::Reference(local_a))
        );
    }

    #[test]
    fn test_copy_frozen_node_shared_once() {
        let mut source = Tracker::new();
        let shared = source.new_array();
        source.push(shared, Value::from(1)).unwrap();
        source.freeze(shared).unwrap();
        let outer = source.new_array();
        source.push(outer, shared.into()).unwrap();
        source.push(outer, shared.into()).unwrap();

        let mut dest = Tracker::new();
        let before = dest.node_count();
        let copy = dest
            .make_copy(&source, outer.into(), &mut NoRetarget)
            .unwrap();
        let copy = copy.as_node().unwrap();
        assert_eq!(dest.node_count(), before + 2);

        let items = dest.array(copy).unwrap();
        assert_eq!(items.get(0), items.get(1));
        let alias = items.get(0).and_then(Value::as_node).unwrap();
        assert_eq!(dest.node(alias).unwrap().links(), 2);
        assert!(!dest.node(alias).unwrap().is_mutable());
    }

    #[test]
    fn test_copy_long_reference_chain() {
        let mut source = Tracker::new();
        let mut head = source.create_reference(Value::from(7)).unwrap();
        for _ in 1..100_000 {
            head = source.create_reference(head.into()).unwrap();
        }

        let mut dest = Tracker::new();
        let copy = dest
            .make_copy(&source, head.into(), &mut NoRetarget)
            .unwrap();
        assert_eq!(dest.reference_count(), 100_000);

        let mut value = copy;
        let mut hops = 0;
        while let Some(reference) = value.as_reference() {
            value = dest.deref(reference).unwrap().clone();
            hops += 1;
        }
        assert_eq!(hops, 100_000);
        assert_eq!(value, Value::from(7));
    }

    #[test]
    fn test_copy_reference_to_reference_cycle() {
        let mut source = Tracker::new();
        let a = source.create_temp_reference().unwrap();
        let b = source.create_reference(a.into()).unwrap();
        source.set_reference_value(a, b.into()).unwrap();

        let mut dest = Tracker::new();
        let copy = dest
            .make_copy(&source, a.into(), &mut NoRetarget)
            .unwrap();
        let local_a = copy.as_reference().unwrap();
        let local_b = dest.deref(local_a).unwrap().as_reference().unwrap();
        assert_ne!(local_a, local_b);
        assert_eq!(dest.deref(local_b).unwrap(), &Value::Reference(local_a));
    }

    #[test]
    fn test_copy_deep_frozen_subtree() {
        let mut source = Tracker::new();
        let mut outer = source.new_array();
        source.push(outer, Value::from(1)).unwrap();
        for _ in 1..100_000 {
            let array = source.new_array();
            source.push(array, outer.into()).unwrap();
            outer = array;
        }
        source.freeze(outer).unwrap();
        let holder = source.create_reference(outer.into()).unwrap();

        let mut dest = Tracker::new();
        let before = dest.node_count();
        let copy = dest
            .make_copy(&source, holder.into(), &mut NoRetarget)
            .unwrap();
        assert_eq!(dest.node_count(), before + 100_000);

        let mut node = dest.deref(copy.as_reference().unwrap()).unwrap().as_node().unwrap();
        let mut depth = 1;
        while let Some(inner) = dest.array(node).unwrap().get(0).and_then(Value::as_node) {
            assert!(!dest.node(inner).unwrap().is_mutable());
            assert_eq!(dest.node(inner).unwrap().links(), 1);
            node = inner;
            depth += 1;
        }
        assert_eq!(depth, 100_000);
        assert_eq!(dest.array(node).unwrap().get(0), Some(&Value::from(1)));
    }

    /// A dictionary that reaches itself through a reference and then directly, which the
    /// public mutators never build: `root /Child -> ref -> child`, `child /Back -> root`.
    fn mediated_direct_loop(source: &mut Tracker) -> NodeId {
        let root = source.new_dictionary();
        let child = source.new_dictionary();
        let child_ref = source.create_reference(child.into()).unwrap();
        source.set(root, "Child", child_ref.into()).unwrap();
        let entry = source.arena.get_mut(child).unwrap();
        entry
            .kind
            .put(&SlotKey::Key(Name::new("Back")), Value::Node(root));
        entry
            .kind
            .put(&SlotKey::Key(Name::new("Again")), Value::Node(root));
        root
    }

    #[test]
    fn test_direct_loop_through_reference_is_wrapped() {
        let mut source = Tracker::new();
        let root = mediated_direct_loop(&mut source);

        let mut dest = Tracker::new();
        let before = dest.node_count();
        let copy = dest
            .make_copy(&source, root.into(), &mut NoRetarget)
            .unwrap();
        assert_eq!(dest.node_count(), before + 2);
        assert_eq!(dest.reference_count(), 2);

        // The root's copy was held directly, so it moved behind a new reference
        let wrapper = copy.as_reference().unwrap();
        let local_root = dest.deref(wrapper).unwrap().as_node().unwrap();
        let child_ref = dest
            .get(local_root, "Child")
            .unwrap()
            .and_then(Value::as_reference)
            .unwrap();
        let local_child = dest.deref(child_ref).unwrap().as_node().unwrap();
        assert_eq!(dest.get(local_child, "Back").unwrap(), Some(&copy));
        assert_eq!(dest.get(local_child, "Again").unwrap(), Some(&copy));
        assert_eq!(
            dest.node(local_root).unwrap().holder(),
            Some(Holder::Reference(wrapper.id()))
        );
    }

    #[test]
    fn test_unmediated_direct_loop_is_refused() {
        let mut source = Tracker::new();
        let root = source.new_dictionary();
        let child = source.new_dictionary();
        source.set(root, "Child", child.into()).unwrap();
        source
            .arena
            .get_mut(child)
            .unwrap()
            .kind
            .put(&SlotKey::Key(Name::new("Back")), Value::Node(root));

        let mut dest = Tracker::new();
        let nodes = dest.node_count();
        let result = dest.make_copy(&source, root.into(), &mut NoRetarget);
        assert!(matches!(result, Err(Error::CircularDirectReference { .. })));
        assert_eq!(dest.node_count(), nodes);
        assert_eq!(dest.reference_count(), 0);
    }

    #[test]
    fn test_failed_retarget_rolls_back() {
        let mut source = Tracker::new();
        let page = source.new_pinned(PinnedKind::Page);
        let page_ref = source.create_reference(page.into()).unwrap();
        let annot = source.new_dictionary();
        source.set(annot, "P", page_ref.into()).unwrap();
        let extra = source.create_reference(Value::from(7)).unwrap();
        source.set(annot, "Extra", extra.into()).unwrap();
        let annot_ref = source.create_reference(annot.into()).unwrap();

        let mut dest = Tracker::new();
        let nodes = dest.node_count();
        let result = dest.make_copy(&source, annot_ref.into(), &mut NoRetarget);

        assert!(matches!(result, Err(Error::RetargetFailed(_))));
        assert_eq!(dest.reference_count(), 0);
        assert_eq!(dest.node_count(), nodes);
    }

    #[test]
    fn test_cache_deduplicates_across_copies() {
        let mut source = Tracker::new();
        let font = source.create_reference(Value::name("Helvetica")).unwrap();

        let mut dest = Tracker::new();
        dest.enable_cache();
        let first = dest
            .make_copy(&source, font.into(), &mut NoRetarget)
            .unwrap();
        let second = dest
            .make_copy(&source, font.into(), &mut NoRetarget)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(dest.reference_count(), 1);

        dest.disable_cache();
        let third = dest
            .make_copy(&source, font.into(), &mut NoRetarget)
            .unwrap();
        assert_ne!(first, third);
    }
}
