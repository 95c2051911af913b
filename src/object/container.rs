//! Container shapes: arrays, dictionaries and streams.
//!
//! Containers are only ever read through these types from outside the crate. Every
//! mutation goes through [`crate::Tracker`], which keeps reference counts and ownership in
//! step with the slot contents; the mutators here are therefore `pub(crate)`.

use indexmap::IndexMap;

use crate::object::{Name, SlotKey, Value};

/// An ordered sequence of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    items: Vec<Value>,
}

impl Array {
    pub(crate) fn new() -> Self {
        Array { items: Vec::new() }
    }

    pub(crate) fn from_values(items: Vec<Value>) -> Self {
        Array { items }
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Iterates over the elements
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub(crate) fn insert(&mut self, index: usize, value: Value) {
        self.items.insert(index, value);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Value {
        self.items.remove(index)
    }

    pub(crate) fn replace(&mut self, index: usize, value: Value) -> Option<Value> {
        self.items
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value))
    }
}

/// A mapping from names to values, preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: IndexMap<Name, Value>,
}

impl Dictionary {
    pub(crate) fn new() -> Self {
        Dictionary {
            entries: IndexMap::new(),
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns true if `key` is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates over the entries in insertion order
    pub fn iter(&self) -> indexmap::map::Iter<'_, Name, Value> {
        self.entries.iter()
    }

    /// Iterates over the keys in insertion order
    pub fn keys(&self) -> indexmap::map::Keys<'_, Name, Value> {
        self.entries.keys()
    }

    /// The `/Type` entry, if it is a name
    #[must_use]
    pub fn type_name(&self) -> Option<&Name> {
        self.get("Type").and_then(Value::as_name)
    }

    pub(crate) fn insert(&mut self, key: Name, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }
}

/// A dictionary with an attached byte payload.
///
/// The payload is stored exactly as it will be written; `/Filter` in the dictionary names
/// the codecs already applied to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    dict: Dictionary,
    data: Vec<u8>,
}

impl Stream {
    pub(crate) fn new(dict: Dictionary, data: Vec<u8>) -> Self {
        Stream { dict, data }
    }

    /// The stream dictionary
    #[must_use]
    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    /// The (possibly encoded) payload
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Name of the filter applied to the payload when it is a single direct name.
    ///
    /// Filter arrays live in the arena; use [`crate::Tracker::stream_filters`] to resolve them.
    #[must_use]
    pub fn filter(&self) -> Option<&Name> {
        self.dict.get("Filter").and_then(Value::as_name)
    }

    pub(crate) fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    pub(crate) fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

/// Returns the keys of `dict` as slot keys, in order
pub(crate) fn dictionary_keys(dict: &Dictionary) -> Vec<SlotKey> {
    dict.keys().cloned().map(SlotKey::Key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_operations() {
        let mut array = Array::new();
        array.push(Value::from(1));
        array.push(Value::from(3));
        array.insert(1, Value::from(2));

        assert_eq!(array.len(), 3);
        assert_eq!(array.get(1), Some(&Value::from(2)));
        assert_eq!(array.replace(2, Value::Null), Some(Value::from(3)));
        assert_eq!(array.replace(9, Value::Null), None);
        assert_eq!(array.remove(0), Value::from(1));
        assert_eq!(array.len(), 2);
    }

    #[test]
    fn test_dictionary_preserves_order() {
        let mut dict = Dictionary::new();
        dict.insert(Name::from("Type"), Value::name("Page"));
        dict.insert(Name::from("MediaBox"), Value::Null);
        dict.insert(Name::from("Contents"), Value::Null);
        dict.remove("MediaBox");

        let keys: Vec<&str> = dict.keys().map(Name::as_str).collect();
        assert_eq!(keys, vec!["Type", "Contents"]);
        assert_eq!(dict.type_name(), Some(&Name::from("Page")));
        assert!(dict.contains_key("Contents"));
    }

    #[test]
    fn test_stream_filters() {
        let mut dict = Dictionary::new();
        dict.insert(Name::from("Filter"), Value::name("FlateDecode"));
        let stream = Stream::new(dict, vec![1, 2, 3]);

        assert_eq!(stream.filter(), Some(&Name::from("FlateDecode")));
        assert_eq!(stream.data(), &[1, 2, 3]);
    }
}
