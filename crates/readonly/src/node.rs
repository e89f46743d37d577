//! A shared, mutable object graph.
//!
//! Mappings and arrays live behind reference-counted locks so that a
//! [`Branch`] handle can be held in several places and mutations through one
//! handle are visible through every other, including read-only views.

use indexmap::IndexMap;
use layercfg_types::{Map, Value};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// A value inside the graph: a leaf or a handle to a shared container.
#[derive(Clone)]
pub enum Node {
    /// Scalars and dates. Never an array or a mapping.
    Leaf(Value),
    Branch(Branch),
}

/// The contents of a [`Branch`].
pub(crate) enum Container {
    Object(IndexMap<String, Node>),
    Array(Vec<Node>),
}

/// A shared handle to a mapping or an array.
///
/// Cloning the handle shares the container; identity is the allocation, so
/// two handles are the same node iff [`Branch::ptr_eq`] holds.
#[derive(Clone)]
pub struct Branch(pub(crate) Arc<RwLock<Container>>);

impl Branch {
    /// Creates an empty shared mapping.
    #[must_use]
    pub fn object() -> Self {
        Self::new(Container::Object(IndexMap::new()))
    }

    /// Creates an empty shared array.
    #[must_use]
    pub fn array() -> Self {
        Self::new(Container::Array(Vec::new()))
    }

    fn new(container: Container) -> Self {
        Self(Arc::new(RwLock::new(container)))
    }

    /// Builds a graph from a tree. Returns `None` for leaves.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match Node::from(value) {
            Node::Branch(branch) => Some(branch),
            Node::Leaf(_) => None,
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(&*self.0.read(), Container::Array(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.0.read() {
            Container::Object(map) => map.len(),
            Container::Array(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of a mapping, or decimal indices of an array.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match &*self.0.read() {
            Container::Object(map) => map.keys().cloned().collect(),
            Container::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Reads a child. Arrays accept decimal indices as keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Node> {
        match &*self.0.read() {
            Container::Object(map) => map.get(key).cloned(),
            Container::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        }
    }

    /// Reads an array element; always `None` for mappings.
    #[must_use]
    pub fn index(&self, index: usize) -> Option<Node> {
        match &*self.0.read() {
            Container::Array(items) => items.get(index).cloned(),
            Container::Object(_) => None,
        }
    }

    /// Writes a child and reports whether the write landed.
    ///
    /// On arrays the key must be an existing index or the length (append).
    pub fn set(&self, key: &str, value: impl Into<Node>) -> bool {
        let value = value.into();
        match &mut *self.0.write() {
            Container::Object(map) => {
                map.insert(key.to_string(), value);
                true
            }
            Container::Array(items) => match key.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    items[i] = value;
                    true
                }
                Ok(i) if i == items.len() => {
                    items.push(value);
                    true
                }
                _ => false,
            },
        }
    }

    /// Removes a key from a mapping. Arrays are left untouched.
    pub fn remove(&self, key: &str) -> Option<Node> {
        match &mut *self.0.write() {
            Container::Object(map) => map.shift_remove(key),
            Container::Array(_) => None,
        }
    }

    /// Appends to an array; returns `false` for mappings.
    pub fn push(&self, value: impl Into<Node>) -> bool {
        match &mut *self.0.write() {
            Container::Array(items) => {
                items.push(value.into());
                true
            }
            Container::Object(_) => false,
        }
    }

    /// Copies the current contents out into an owned tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &*self.0.read() {
            Container::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect::<Map>(),
            ),
            Container::Array(items) => Value::Array(items.iter().map(Node::to_value).collect()),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared container, stable while any handle is alive.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Branch").field(&self.to_value()).finish()
    }
}

impl Node {
    /// Copies the node out into an owned tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Leaf(value) => value.clone(),
            Self::Branch(branch) => branch.to_value(),
        }
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf(value) => Some(value),
            Self::Branch(_) => None,
        }
    }

    #[must_use]
    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Self::Branch(branch) => Some(branch),
            Self::Leaf(_) => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Self::Branch(branch) => fmt::Debug::fmt(branch, f),
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Branch(Branch::new(Container::Object(
                map.iter().map(|(key, child)| (key.clone(), Self::from(child))).collect(),
            ))),
            Value::Array(items) => {
                Self::Branch(Branch::new(Container::Array(items.iter().map(Self::from).collect())))
            }
            leaf => Self::Leaf(leaf.clone()),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

impl From<Branch> for Node {
    fn from(branch: Branch) -> Self {
        Self::Branch(branch)
    }
}
