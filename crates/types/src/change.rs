//! Change records produced by a reload.

use crate::Value;
use serde::Serialize;

/// A leaf whose value differs from the previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    /// Dotted path of the leaf, e.g. `db.port`.
    pub path: String,
    pub new_value: Value,
    /// `None` when the path did not exist in the previous snapshot.
    pub old_value: Option<Value>,
}

impl Change {
    pub fn new(path: impl Into<String>, new_value: Value, old_value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            new_value,
            old_value,
        }
    }
}
