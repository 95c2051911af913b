//! Object number remapping for one save.

use std::collections::{BTreeSet, HashMap};

use crate::{
    object::{ObjectId, MAX_OBJECT_NUMBER},
    Error::ObjectLimitExceeded,
    Result,
};

/// Maps the object ids of the tracker table onto the dense numbering of the written file.
///
/// Every id keeps its current number when that number is free and inside `1..=count`;
/// ids that collide with an earlier one (same number, other generation) or lie outside the
/// range are queued and take the lowest free numbers in order. Numbers past the indexed
/// objects are handed out with [`ObjectRemapper::reserve`] for object streams and the
/// cross-reference stream.
#[derive(Debug, Clone)]
pub struct ObjectRemapper {
    mapping: HashMap<ObjectId, u32>,
    next_number: u32,
    limit: u32,
}

impl ObjectRemapper {
    /// Builds the mapping for `ids`, visited in the given order
    ///
    /// # Errors
    /// [`crate::Error::ObjectLimitExceeded`] if there are more ids than addressable numbers.
    pub fn build(ids: &[ObjectId]) -> Result<Self> {
        Self::build_within(ids, MAX_OBJECT_NUMBER)
    }

    /// Builds the mapping with `limit` as the highest usable number
    pub(crate) fn build_within(ids: &[ObjectId], limit: u32) -> Result<Self> {
        if ids.len() > limit as usize {
            return Err(ObjectLimitExceeded(ids.len()));
        }
        let count = ids.len() as u32;

        let mut mapping = HashMap::with_capacity(ids.len());
        let mut taken = BTreeSet::new();
        let mut queued = Vec::new();

        for id in ids {
            let number = id.number();
            if number >= 1 && number <= count && taken.insert(number) {
                mapping.insert(*id, number);
            } else {
                queued.push(*id);
            }
        }

        let mut free = (1..=count).filter(|number| !taken.contains(number));
        for id in queued {
            if let Some(number) = free.next() {
                mapping.insert(id, number);
            }
        }

        Ok(ObjectRemapper {
            mapping,
            next_number: count + 1,
            limit,
        })
    }

    /// The number `id` is written under
    #[must_use]
    pub fn map(&self, id: ObjectId) -> Option<u32> {
        self.mapping.get(&id).copied()
    }

    /// Hands out the next number after the mapped ids
    ///
    /// # Errors
    /// [`crate::Error::ObjectLimitExceeded`] past the addressable range.
    pub fn reserve(&mut self) -> Result<u32> {
        if self.next_number > self.limit {
            return Err(ObjectLimitExceeded(self.next_number as usize));
        }
        let number = self.next_number;
        self.next_number += 1;
        Ok(number)
    }

    /// The `/Size` of the index: highest number plus one
    #[must_use]
    pub fn size(&self) -> u32 {
        self.next_number
    }

    /// Number of mapped ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Returns true if nothing was mapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
