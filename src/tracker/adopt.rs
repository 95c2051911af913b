//! Adoption: taking ownership of a foreign subtree without copying it.
//!
//! Adoption runs in two passes. Verification walks the subtree without touching either
//! tracker and refuses it if anything in it is still in use by the source document:
//!
//! - a mutable node held from outside the adopted value,
//! - a reference the source has already counted,
//! - a pinned singleton, which is only ever retargeted.
//!
//! References are deferred onto an adopt-later list so each is checked once, even when the
//! subtree shares or cycles through them. Transfer then moves the mutable nodes between
//! arenas, copies frozen nodes (the source keeps its own) and re-registers the references
//! under fresh numbers.
//!
//! [`Tracker::import`] is the usual entry point: it adopts when possible and copies when
//! adoption is refused.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    object::{Holder, Node, NodeId, NodeKind, NodePath, ObjectId, ObjectRef, PathSegment, RefEntry, SlotKey, Value},
    tracker::{CacheEntry, ForeignKey, Retarget, Tracker},
    Error::{AdoptionRefused, CircularDirectReference, ForeignValue},
    Result,
};

/// What verification found and transfer has to move.
#[derive(Debug, Default)]
struct AdoptionPlan {
    moved: Vec<NodeId>,
    frozen: Vec<NodeId>,
    refs: Vec<ObjectId>,
}

enum Visit {
    Enter {
        node: NodeId,
        path: NodePath,
        expected: Option<Holder>,
    },
    Exit(NodeId),
}

impl AdoptionPlan {
    fn verify(source: &Tracker, root: &Value) -> Result<AdoptionPlan> {
        let mut plan = AdoptionPlan::default();
        let mut seen_nodes = HashSet::new();
        let mut seen_refs = HashSet::new();
        let mut ancestors = HashSet::new();
        let mut later: Vec<(ObjectRef, NodePath)> = Vec::new();
        let mut stack: Vec<Visit> = Vec::new();

        match root {
            Value::Node(node) => stack.push(Visit::Enter {
                node: *node,
                path: NodePath::root(),
                expected: None,
            }),
            Value::Reference(reference) => later.push((*reference, NodePath::root())),
            _ => return Ok(plan),
        }

        loop {
            while let Some(visit) = stack.pop() {
                let (node, path, expected) = match visit {
                    Visit::Exit(node) => {
                        ancestors.remove(&node);
                        continue;
                    }
                    Visit::Enter {
                        node,
                        path,
                        expected,
                    } => (node, path, expected),
                };
                if ancestors.contains(&node) {
                    return Err(CircularDirectReference { path });
                }
                if !seen_nodes.insert(node) {
                    continue;
                }

                let entry = source.node(node)?;
                if entry.pinned().is_some() {
                    return Err(AdoptionRefused {
                        path,
                        reason: "pinned singletons are retargeted, not adopted",
                    });
                }
                if entry.is_mutable() {
                    if entry.holder() != expected {
                        return Err(AdoptionRefused {
                            path,
                            reason: "node is held from outside the adopted value",
                        });
                    }
                    plan.moved.push(node);
                } else {
                    plan.frozen.push(node);
                }

                ancestors.insert(node);
                stack.push(Visit::Exit(node));
                for slot in entry.kind().slots() {
                    match entry.kind().get(&slot) {
                        Some(Value::Node(child)) => stack.push(Visit::Enter {
                            node: *child,
                            path: path.join(PathSegment::Slot(slot.clone())),
                            expected: Some(Holder::Node(node)),
                        }),
                        Some(Value::Reference(reference)) => later.push((
                            *reference,
                            path.join(PathSegment::Slot(slot.clone())),
                        )),
                        _ => {}
                    }
                }
            }

            let Some((reference, path)) = later.pop() else {
                break;
            };
            if reference.tracker() != source.id() {
                return Err(ForeignValue);
            }
            if !seen_refs.insert(reference.id()) {
                continue;
            }
            let path = path.join(PathSegment::Reference(reference.id()));
            let entry = source.entry(reference)?;
            if entry.is_registered() {
                return Err(AdoptionRefused {
                    path,
                    reason: "reference is counted by the source document",
                });
            }
            let Some(value) = entry.value() else {
                return Err(AdoptionRefused {
                    path,
                    reason: "placeholder reference has no value yet",
                });
            };
            plan.refs.push(reference.id());
            match value {
                Value::Node(node) => stack.push(Visit::Enter {
                    node: *node,
                    path,
                    expected: Some(Holder::Reference(reference.id())),
                }),
                Value::Reference(inner) => later.push((*inner, path)),
                _ => {}
            }
        }

        Ok(plan)
    }
}

fn rewrite(
    value: &Value,
    nodes: &HashMap<NodeId, NodeId>,
    refs: &HashMap<ObjectId, ObjectRef>,
) -> Result<Value> {
    match value {
        Value::Node(node) => nodes
            .get(node)
            .map(|local| Value::Node(*local))
            .ok_or_else(|| malformed_error!("Node {} escaped adoption", node)),
        Value::Reference(reference) => refs
            .get(&reference.id())
            .map(|local| Value::Reference(*local))
            .ok_or_else(|| malformed_error!("Reference {} escaped adoption", reference)),
        primitive => Ok(primitive.clone()),
    }
}

impl Tracker {
    /// Takes ownership of a foreign value, moving instead of copying.
    ///
    /// # Errors
    /// - [`crate::Error::AdoptionRefused`] naming the first node that cannot change owner;
    ///   neither tracker has been modified
    /// - [`crate::Error::CircularDirectReference`] for direct loops in the source
    pub fn adopt(&mut self, source: &mut Tracker, value: Value) -> Result<Value> {
        match value.owner() {
            None => return Ok(value),
            Some(owner) if owner == self.id() => return Ok(value),
            Some(owner) if owner != source.id() => return Err(ForeignValue),
            Some(_) => {}
        }

        let plan = AdoptionPlan::verify(source, &value)?;
        debug!(
            "adopting {} nodes, {} frozen nodes and {} references from {}",
            plan.moved.len(),
            plan.frozen.len(),
            plan.refs.len(),
            source.id()
        );
        self.transfer(source, &plan, &value)
    }

    /// Adopts `value` if possible and copies it otherwise
    pub fn import(
        &mut self,
        source: &mut Tracker,
        value: Value,
        retarget: &mut dyn Retarget,
    ) -> Result<Value> {
        match self.adopt(source, value.clone()) {
            Err(AdoptionRefused { path, reason }) => {
                debug!("adoption refused at {}: {}, copying instead", path, reason);
                self.make_copy(source, value, retarget)
            }
            other => other,
        }
    }

    fn transfer(&mut self, source: &mut Tracker, plan: &AdoptionPlan, root: &Value) -> Result<Value> {
        let mut refs = HashMap::new();
        for id in &plan.refs {
            let local = self.allocate_id()?;
            refs.insert(*id, self.handle(local));
        }

        let mut nodes = HashMap::new();
        let mut fresh_frozen = Vec::new();
        for node in &plan.frozen {
            if let Some(CacheEntry {
                local: Value::Node(local),
                ..
            }) = self.cache_lookup(ForeignKey::Node(*node))
            {
                nodes.insert(*node, local);
                continue;
            }
            let local = self
                .arena
                .alloc(Node::new(NodeKind::Dictionary(Default::default())));
            nodes.insert(*node, local);
            fresh_frozen.push(*node);
        }
        for node in &plan.moved {
            let local = self
                .arena
                .alloc(Node::new(NodeKind::Dictionary(Default::default())));
            nodes.insert(*node, local);
        }

        let mut rebuilt = Vec::new();
        for node in &fresh_frozen {
            let kind = source
                .node(*node)?
                .kind()
                .map_children(|value| rewrite(value, &nodes, &refs))?;
            let local = nodes[node];
            let entry = self.arena.get_mut(local)?;
            entry.kind = kind;
            entry.mutable = false;
            rebuilt.push(local);
        }
        let mut released = Vec::new();
        for node in &plan.moved {
            let moved = source.arena.free(*node)?;
            released.extend(moved.kind.child_nodes());
            let kind = moved
                .kind
                .map_children(|value| rewrite(value, &nodes, &refs))?;
            let holder = match moved.holder {
                Some(Holder::Node(parent)) => nodes.get(&parent).map(|local| Holder::Node(*local)),
                Some(Holder::Reference(id)) => {
                    refs.get(&id).map(|local| Holder::Reference(local.id()))
                }
                None => None,
            };
            let local = nodes[node];
            let entry = self.arena.get_mut(local)?;
            entry.kind = kind;
            entry.holder = holder;
            entry.links = u32::from(holder.is_some());
            rebuilt.push(local);
        }

        let mut frozen_links = Vec::new();
        for id in &plan.refs {
            let Some(entry) = source.table.remove(id) else {
                return Err(malformed_error!("Reference {} vanished during adoption", id));
            };
            if let Some(Value::Node(node)) = &entry.value {
                released.push(*node);
            }
            let value = match &entry.value {
                Some(value) => Some(rewrite(value, &nodes, &refs)?),
                None => None,
            };
            if let Some(Value::Node(local)) = &value {
                frozen_links.push(*local);
            }
            let local = refs[id];
            self.table
                .insert(local.id(), RefEntry::new(value, entry.save_mode()));
        }

        source.release_frozen(released);

        for local in &rebuilt {
            frozen_links.extend(self.arena.get(*local)?.kind().child_nodes());
        }
        for local in frozen_links {
            let entry = self.arena.get_mut(local)?;
            if !entry.mutable {
                entry.links += 1;
            }
        }

        let committed = fresh_frozen
            .iter()
            .map(|node| {
                (
                    ForeignKey::Node(*node),
                    CacheEntry {
                        local: Value::Node(nodes[node]),
                        reference: None,
                    },
                )
            })
            .collect();
        self.cache_commit(committed);

        rewrite(root, &nodes, &refs)
    }

    /// Drops the links moved nodes and references held on frozen nodes left behind
    fn release_frozen(&mut self, nodes: Vec<NodeId>) {
        for node in nodes {
            let Ok(entry) = self.arena.get_mut(node) else {
                continue;
            };
            if entry.mutable {
                continue;
            }
            entry.links = entry.links.saturating_sub(1);
            if entry.links == 0 {
                self.free_subtree(node);
            }
        }
    }
}
