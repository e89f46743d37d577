//! Read-only views over a shared graph.

use crate::{cache::WrapperCache, node::Branch, node::Node};
use layercfg_types::{LayercfgError, Result, Value, WriteOp};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// What a read through a [`Readonly`] view yields.
#[derive(Clone)]
pub enum Entry {
    /// Scalars and dates, copied out at read time.
    Leaf(Value),
    /// Nested mappings and arrays, wrapped in turn.
    View(Arc<Readonly>),
}

impl Entry {
    #[must_use]
    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Self::Leaf(value) => Some(value),
            Self::View(_) => None,
        }
    }

    #[must_use]
    pub fn as_view(&self) -> Option<&Arc<Readonly>> {
        match self {
            Self::View(view) => Some(view),
            Self::Leaf(_) => None,
        }
    }

    /// Copies the entry out into an owned tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Leaf(value) => value.clone(),
            Self::View(view) => view.to_value(),
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Self::View(view) => fmt::Debug::fmt(view, f),
        }
    }
}

/// A deeply immutable view of a [`Branch`].
///
/// Nothing is copied up front: every read goes to the live container, so
/// changes made through the underlying branch show up on the next read.
/// Nested containers come back wrapped, and the same container always comes
/// back as the same wrapper while that wrapper is alive. Every write method
/// fails with [`LayercfgError::ImmutableWrite`] and leaves the target as is.
pub struct Readonly {
    target: Branch,
    cache: WrapperCache,
}

impl Readonly {
    pub(crate) fn new(target: Branch, cache: WrapperCache) -> Self {
        Self { target, cache }
    }

    pub(crate) fn target(&self) -> &Branch {
        &self.target
    }

    /// The cache this view resolves nested wrappers through.
    #[must_use]
    pub fn cache(&self) -> &WrapperCache {
        &self.cache
    }

    fn entry(&self, node: Node) -> Entry {
        match node {
            Node::Leaf(value) => Entry::Leaf(value),
            Node::Branch(branch) => Entry::View(self.cache.wrap(&branch)),
        }
    }

    /// Reads a child. Arrays accept decimal indices as keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.target.get(key).map(|node| self.entry(node))
    }

    /// Reads an array element.
    #[must_use]
    pub fn index(&self, index: usize) -> Option<Entry> {
        self.target.index(index).map(|node| self.entry(node))
    }

    /// Follows a dotted path such as `db.port` or `schemes.0`.
    #[must_use]
    pub fn pointer(&self, path: &str) -> Option<Entry> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Entry::View(view) => view.get(segment)?,
                Entry::Leaf(_) => return None,
            };
        }
        Some(current)
    }

    /// Reads a leaf at a dotted path; `None` for containers and missing paths.
    #[must_use]
    pub fn leaf(&self, path: &str) -> Option<Value> {
        match self.pointer(path)? {
            Entry::Leaf(value) => Some(value),
            Entry::View(_) => None,
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.target.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.target.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.target.is_array()
    }

    /// Copies the current contents out into an owned tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.target.to_value()
    }

    /// Always fails: assignment is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::ImmutableWrite`].
    pub fn set(&self, _key: &str, _value: impl Into<Value>) -> Result<()> {
        Err(reject(WriteOp::Set))
    }

    /// Always fails: adding properties is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::ImmutableWrite`].
    pub fn define(&self, _key: &str, _value: impl Into<Value>) -> Result<()> {
        Err(reject(WriteOp::Define))
    }

    /// Always fails: removing properties is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::ImmutableWrite`].
    pub fn delete(&self, _key: &str) -> Result<()> {
        Err(reject(WriteOp::Delete))
    }

    /// Always fails: the view cannot be sealed either.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::ImmutableWrite`].
    pub fn prevent_extensions(&self) -> Result<()> {
        Err(reject(WriteOp::PreventExtensions))
    }

    /// Always fails: swapping the contents wholesale is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::ImmutableWrite`].
    pub fn replace(&self, _value: impl Into<Value>) -> Result<()> {
        Err(reject(WriteOp::Replace))
    }
}

fn reject(op: WriteOp) -> LayercfgError {
    LayercfgError::ImmutableWrite { op }
}

impl fmt::Debug for Readonly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Readonly").field(&self.to_value()).finish()
    }
}

static PROCESS_CACHE: Mutex<Option<WrapperCache>> = Mutex::new(None);

/// Wraps `target` in a read-only view using the process-wide cache.
///
/// The process-wide cache is created on first use. It is replaced by `cache`
/// (or a fresh one) when none exists yet or when `replace_cache` is set; an
/// explicit `cache` is otherwise ignored. Views created earlier keep the
/// cache they were created with.
#[must_use]
pub fn readonly(target: &Branch, cache: Option<WrapperCache>, replace_cache: bool) -> Arc<Readonly> {
    let active = {
        let mut slot = PROCESS_CACHE.lock();
        if replace_cache {
            *slot = None;
        }
        slot.get_or_insert_with(|| cache.unwrap_or_default()).clone()
    };
    active.wrap(target)
}
