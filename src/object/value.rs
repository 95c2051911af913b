//! Values stored in container slots.
//!
//! A [`Value`] is either a primitive carrying its data inline, a direct sub-object
//! ([`Value::Node`]) or an indirect reference ([`Value::Reference`]). Primitives have no
//! identity and can be freely cloned between documents; the two handle variants belong to
//! exactly one tracker and must be imported before another tracker accepts them.

use std::fmt;

use crate::object::{NodeId, ObjectRef, TrackerId};

/// A PDF name such as `/Type`.
///
/// Stored without the leading slash. Characters outside the regular set are escaped as
/// `#xx` by the writer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    /// Creates a name from its unescaped text
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    /// Returns the unescaped text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name(value.to_string())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name(value)
    }
}

impl From<&Name> for Name {
    fn from(value: &Name) -> Self {
        value.clone()
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// A value held by a container slot or a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The `null` object
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Integer numbers
    Integer(i64),
    /// Real numbers
    Real(f64),
    /// A name object
    Name(Name),
    /// A string object, kept as raw bytes
    String(Vec<u8>),
    /// A direct sub-object living in the tracker's arena
    Node(NodeId),
    /// An indirect reference
    Reference(ObjectRef),
}

impl Value {
    /// Creates a name value
    pub fn name(name: impl Into<Name>) -> Self {
        Value::Name(name.into())
    }

    /// Creates a string value
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Value::String(bytes.into())
    }

    /// Returns true for values carrying no handle
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Node(_) | Value::Reference(_))
    }

    /// Returns true for [`Value::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the tracker owning the handle inside this value, if any
    #[must_use]
    pub fn owner(&self) -> Option<TrackerId> {
        match self {
            Value::Node(node) => Some(node.tracker()),
            Value::Reference(reference) => Some(reference.tracker()),
            _ => None,
        }
    }

    /// Returns the node handle of a direct sub-object
    #[must_use]
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(node) => Some(*node),
            _ => None,
        }
    }

    /// Returns the reference handle
    #[must_use]
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Value::Reference(reference) => Some(*reference),
            _ => None,
        }
    }

    /// Returns the integer payload
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the name payload
    #[must_use]
    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Value::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Returns a short description of the variant, used in diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Name(_) => "name",
            Value::String(_) => "string",
            Value::Node(_) => "node",
            Value::Reference(_) => "reference",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<Name> for Value {
    fn from(value: Name) -> Self {
        Value::Name(value)
    }
}

impl From<NodeId> for Value {
    fn from(value: NodeId) -> Self {
        Value::Node(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Reference(value)
    }
}
