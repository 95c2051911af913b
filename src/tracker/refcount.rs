//! Lazy reference counting, the bounded cycle probe and the repair pass.
//!
//! Counting is one level deep and lazy: when an entry's count goes from unregistered to 1,
//! only the references its value holds directly (through inline containers) are counted,
//! and those propagate the same way as they transition. Dropping to 0 removes the entry,
//! frees its value's nodes and releases its direct references.
//!
//! Reference cycles keep their members above zero forever. After every decrement that
//! leaves an entry alive, a probe of bounded depth looks for a path back to it; when it
//! cannot rule one out, the tracker is marked dirty and the next save runs
//! [`Tracker::fix_res_table`], which recounts everything from the trailer.

use std::collections::{HashSet, VecDeque};

use log::{debug, trace, warn};

use crate::{
    object::{NodeId, ObjectId, ObjectRef, Value, UNREGISTERED},
    tracker::Tracker,
    Error::{ForeignValue, ReferenceNotFound},
    Result,
};

/// Reference levels followed by the cycle probe unless configured otherwise
pub const DEFAULT_CYCLE_PROBE_DEPTH: usize = 4;

/// Outcome of [`Tracker::fix_res_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairReport {
    /// Entries reachable from the trailer or the keep list
    pub live: usize,
    /// Entries removed because nothing reachable holds them
    pub pruned: usize,
    /// Reachable references whose entry does not exist
    pub dangling: usize,
}

impl Tracker {
    /// References reachable from `value` without passing through another reference.
    ///
    /// Inline containers are walked; every occurrence counts, so a reference stored twice in
    /// one object is reported twice.
    pub(crate) fn direct_refs(&self, value: &Value) -> Vec<ObjectRef> {
        let mut refs = Vec::new();
        let mut pending: Vec<NodeId> = Vec::new();
        match value {
            Value::Reference(reference) => return vec![*reference],
            Value::Node(node) => pending.push(*node),
            _ => return refs,
        }

        while let Some(node) = pending.pop() {
            let Ok(entry) = self.arena.get(node) else {
                continue;
            };
            for child in entry.kind.children() {
                match child {
                    Value::Reference(reference) => refs.push(*reference),
                    Value::Node(inner) => pending.push(*inner),
                    _ => {}
                }
            }
        }
        refs
    }

    /// Counts one more holder of `reference`.
    ///
    /// On the transition to 1 the references held directly by its value are counted too.
    pub fn inc_ref_count(&mut self, reference: ObjectRef) -> Result<()> {
        if reference.tracker != self.id() {
            return Err(ForeignValue);
        }
        if !self.table.contains_key(&reference.id) {
            return Err(ReferenceNotFound(reference.id));
        }
        self.inc_ids(vec![reference.id]);
        Ok(())
    }

    /// Releases one holder of `reference`.
    ///
    /// At 0 the entry is removed, its value's nodes are freed and its direct references are
    /// released in turn.
    pub fn dec_ref_count(&mut self, reference: ObjectRef) -> Result<()> {
        if reference.tracker != self.id() {
            return Err(ForeignValue);
        }
        if !self.table.contains_key(&reference.id) {
            return Err(ReferenceNotFound(reference.id));
        }
        self.dec_ids(vec![reference.id]);
        Ok(())
    }

    /// Counts every reference `value` holds directly
    pub(crate) fn inc_value(&mut self, value: &Value) {
        let ids = self.direct_refs(value).iter().map(ObjectRef::id).collect();
        self.inc_ids(ids);
    }

    /// Releases every reference `value` holds directly
    pub(crate) fn dec_value(&mut self, value: &Value) {
        let ids = self.direct_refs(value).iter().map(ObjectRef::id).collect();
        self.dec_ids(ids);
    }

    fn inc_ids(&mut self, mut pending: Vec<ObjectId>) {
        while let Some(id) = pending.pop() {
            let Some(entry) = self.table.get_mut(&id) else {
                trace!("inc of dangling reference {}", id);
                continue;
            };
            if entry.refcount >= 1 {
                entry.refcount += 1;
                continue;
            }
            entry.refcount = 1;
            if let Some(value) = entry.value.clone() {
                pending.extend(self.direct_refs(&value).iter().map(ObjectRef::id));
            }
        }
    }

    fn dec_ids(&mut self, mut pending: Vec<ObjectId>) {
        while let Some(id) = pending.pop() {
            let Some(entry) = self.table.get_mut(&id) else {
                continue;
            };
            if entry.refcount > 1 {
                entry.refcount -= 1;
                if !self.dirty && !self.probe_acyclic(id) {
                    warn!("possible reference cycle through {}, counts marked dirty", id);
                    self.dirty = true;
                }
                continue;
            }
            if entry.refcount < 1 {
                // never counted, so nothing below it was either
                self.dirty = true;
                continue;
            }

            let Some(entry) = self.table.remove(&id) else {
                continue;
            };
            trace!("released {}", id);
            if let Some(value) = entry.value {
                pending.extend(self.direct_refs(&value).iter().map(ObjectRef::id));
                self.release_value(&value);
            }
        }
    }

    /// Returns true if no path of at most `probe_depth` references leads from `start` back
    /// to itself and the search finished within that depth.
    fn probe_acyclic(&self, start: ObjectId) -> bool {
        let Some(Some(value)) = self.table.get(&start).map(|entry| entry.value.as_ref()) else {
            return true;
        };
        let mut frontier: VecDeque<(ObjectId, usize)> = self
            .direct_refs(value)
            .iter()
            .map(|reference| (reference.id, 1))
            .collect();
        let mut seen = HashSet::new();

        while let Some((id, depth)) = frontier.pop_front() {
            if id == start || depth > self.probe_depth {
                return false;
            }
            if !seen.insert(id) {
                continue;
            }
            let Some(Some(value)) = self.table.get(&id).map(|entry| entry.value.as_ref()) else {
                continue;
            };
            frontier.extend(
                self.direct_refs(value)
                    .iter()
                    .map(|reference| (reference.id, depth + 1)),
            );
        }
        true
    }

    /// Recomputes every reference count from scratch.
    ///
    /// Counts are negated, then every reference reachable from the trailer is counted again.
    /// References reachable only from `keep` survive unregistered. Everything else that is
    /// still non-positive is pruned and its nodes are freed. Idempotent; clears the dirty
    /// flag.
    pub fn fix_res_table(&mut self, keep: &[ObjectRef]) -> RepairReport {
        for entry in self.table.values_mut() {
            if entry.refcount > 0 {
                entry.refcount = -entry.refcount;
            }
        }

        let mut report = RepairReport::default();
        let mut pending: Vec<ObjectId> = self
            .direct_refs(&Value::Node(self.trailer()))
            .iter()
            .map(ObjectRef::id)
            .collect();
        while let Some(id) = pending.pop() {
            let Some(entry) = self.table.get_mut(&id) else {
                report.dangling += 1;
                continue;
            };
            if entry.refcount >= 1 {
                entry.refcount += 1;
                continue;
            }
            entry.refcount = 1;
            if let Some(value) = entry.value.clone() {
                pending.extend(self.direct_refs(&value).iter().map(ObjectRef::id));
            }
        }

        let mut kept = HashSet::new();
        let mut pending: Vec<ObjectId> = keep
            .iter()
            .filter(|reference| reference.tracker == self.id())
            .map(ObjectRef::id)
            .collect();
        while let Some(id) = pending.pop() {
            let Some(entry) = self.table.get_mut(&id) else {
                continue;
            };
            if entry.refcount >= 1 || !kept.insert(id) {
                continue;
            }
            entry.refcount = UNREGISTERED;
            if let Some(value) = entry.value.clone() {
                pending.extend(self.direct_refs(&value).iter().map(ObjectRef::id));
            }
        }

        let doomed: Vec<ObjectId> = self
            .table
            .iter()
            .filter(|(id, entry)| entry.refcount < 1 && !kept.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            if let Some(entry) = self.table.remove(id) {
                if let Some(value) = entry.value {
                    self.release_value(&value);
                }
            }
        }

        report.pruned = doomed.len();
        report.live = self.table.len();
        self.dirty = false;
        debug!(
            "repaired reference table: {} live, {} pruned, {} dangling",
            report.live, report.pruned, report.dangling
        );
        report
    }

    /// Removes the given entries outright.
    ///
    /// Entries that had been counted release their direct references; their values' nodes
    /// are freed. Used to roll back work that created references.
    pub fn prune_refs(&mut self, refs: &[ObjectRef]) {
        for reference in refs {
            if reference.tracker != self.id() {
                continue;
            }
            let Some(entry) = self.table.remove(&reference.id) else {
                continue;
            };
            if let Some(value) = entry.value {
                if entry.refcount >= 1 {
                    self.dirty = true;
                    let ids = self.direct_refs(&value).iter().map(ObjectRef::id).collect();
                    self.dec_ids(ids);
                }
                self.release_value(&value);
            }
        }
    }

    /// Drops one link to the node inside `value`, freeing it once nothing holds it
    pub(crate) fn release_value(&mut self, value: &Value) {
        let Value::Node(node) = value else {
            return;
        };
        let Ok(entry) = self.arena.get_mut(*node) else {
            return;
        };
        if entry.mutable {
            entry.holder = None;
            entry.links = 0;
        } else {
            entry.links = entry.links.saturating_sub(1);
            if entry.links > 0 {
                return;
            }
        }
        self.free_subtree(*node);
    }

    /// Frees `root` and every node only it keeps alive
    pub(crate) fn free_subtree(&mut self, root: NodeId) {
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            let Ok(freed) = self.arena.free(node) else {
                continue;
            };
            for child in freed.kind.child_nodes() {
                let Ok(entry) = self.arena.get_mut(child) else {
                    continue;
                };
                if entry.mutable {
                    pending.push(child);
                } else {
                    entry.links = entry.links.saturating_sub(1);
                    if entry.links == 0 {
                        pending.push(child);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SaveMode;

    #[test]
    fn test_counting_follows_transitions() {
        let mut tracker = Tracker::new();
        let leaf = tracker.create_reference(Value::from(1)).unwrap();
        let holder = tracker.new_array();
        tracker.push(holder, leaf.into()).unwrap();
        let middle = tracker.create_reference(holder.into()).unwrap();

        assert_eq!(tracker.entry(leaf).unwrap().refcount(), UNREGISTERED);
        tracker.set(tracker.trailer(), "M", middle.into()).unwrap();
        assert_eq!(tracker.entry(middle).unwrap().refcount(), 1);
        assert_eq!(tracker.entry(leaf).unwrap().refcount(), 1);
    }

    #[test]
    fn test_release_cascades() {
        let mut tracker = Tracker::new();
        let leaf = tracker.create_reference(Value::from(1)).unwrap();
        let holder = tracker.new_dictionary();
        tracker.set(holder, "Leaf", leaf.into()).unwrap();
        let middle = tracker.create_reference(holder.into()).unwrap();
        tracker.set(tracker.trailer(), "M", middle.into()).unwrap();

        tracker.remove(tracker.trailer(), "M").unwrap();
        assert_eq!(tracker.reference_count(), 0);
        assert!(tracker.node(holder).is_err());
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn test_cycle_marks_dirty_and_repair_prunes() {
        let mut tracker = Tracker::new();
        let a_dict = tracker.new_dictionary();
        let a = tracker.create_reference(a_dict.into()).unwrap();
        let b_dict = tracker.new_dictionary();
        tracker.set(b_dict, "Back", a.into()).unwrap();
        let b = tracker.create_reference(b_dict.into()).unwrap();
        tracker.set(a_dict, "Next", b.into()).unwrap();

        tracker.set(tracker.trailer(), "A", a.into()).unwrap();
        assert_eq!(tracker.entry(a).unwrap().refcount(), 2);

        tracker.remove(tracker.trailer(), "A").unwrap();
        assert!(tracker.is_dirty());
        assert_eq!(tracker.reference_count(), 2);

        let report = tracker.fix_res_table(&[]);
        assert_eq!(report.pruned, 2);
        assert_eq!(report.live, 0);
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.node_count(), 1);
    }

    #[test]
    fn test_fix_res_table_is_idempotent() {
        let mut tracker = Tracker::new();
        let shared = tracker.create_reference(Value::from(5)).unwrap();
        let array = tracker.new_array();
        tracker.push(array, shared.into()).unwrap();
        tracker.push(array, shared.into()).unwrap();
        tracker.set(tracker.trailer(), "List", array.into()).unwrap();

        let first = tracker.fix_res_table(&[]);
        let second = tracker.fix_res_table(&[]);
        assert_eq!(first, second);
        assert_eq!(tracker.entry(shared).unwrap().refcount(), 2);
    }

    #[test]
    fn test_keep_list_survives_unregistered() {
        let mut tracker = Tracker::new();
        let inner = tracker.create_reference(Value::from(1)).unwrap();
        let outer_dict = tracker.new_dictionary();
        tracker.set(outer_dict, "Inner", inner.into()).unwrap();
        let outer = tracker.create_reference(outer_dict.into()).unwrap();
        let stray = tracker.create_reference(Value::Null).unwrap();

        let report = tracker.fix_res_table(&[outer]);
        assert_eq!(report.pruned, 1);
        assert!(tracker.entry(stray).is_err());
        assert_eq!(tracker.entry(outer).unwrap().refcount(), UNREGISTERED);
        assert_eq!(tracker.entry(inner).unwrap().refcount(), UNREGISTERED);
    }

    #[test]
    fn test_prune_refs_rolls_back() {
        let mut tracker = Tracker::new();
        let node = tracker.new_dictionary();
        let reference = tracker.create_reference(node.into()).unwrap();
        tracker.set_save_mode(reference, SaveMode::Indirect).unwrap();

        tracker.prune_refs(&[reference]);
        assert_eq!(tracker.reference_count(), 0);
        assert!(tracker.node(node).is_err());
    }

    #[test]
    fn test_probe_depth_zero_always_dirty_on_shared() {
        let mut tracker = Tracker::new();
        tracker.set_cycle_probe_depth(0);
        let leaf = tracker.create_reference(Value::from(1)).unwrap();
        let child = tracker.new_array();
        tracker.push(child, leaf.into()).unwrap();
        let shared = tracker.create_reference(child.into()).unwrap();
        let array = tracker.new_array();
        tracker.push(array, shared.into()).unwrap();
        tracker.push(array, shared.into()).unwrap();
        tracker.set(tracker.trailer(), "List", array.into()).unwrap();

        tracker.remove_at(array, 0).unwrap();
        assert!(tracker.is_dirty());
        assert_eq!(tracker.entry(shared).unwrap().refcount(), 1);
    }

    #[test]
    fn test_repair_counts_dangling_references() {
        let mut tracker = Tracker::new();
        let gone = tracker.create_reference(Value::from(1)).unwrap();
        let kept = tracker.create_reference(Value::from(2)).unwrap();
        let list = tracker.new_array();
        tracker.push(list, gone.into()).unwrap();
        tracker.push(list, kept.into()).unwrap();
        tracker.set(tracker.trailer(), "List", list.into()).unwrap();
        tracker.set(tracker.trailer(), "Gone", gone.into()).unwrap();

        tracker.prune_refs(&[gone]);
        let report = tracker.fix_res_table(&[]);
        assert_eq!(report.dangling, 2);
        assert_eq!(report.live, 1);
        assert_eq!(report.pruned, 0);
        assert_eq!(tracker.entry(kept).unwrap().refcount(), 1);
        assert!(!tracker.is_dirty());
    }
}
