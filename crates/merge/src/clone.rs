//! Deep cloning with poisoned-key stripping.

use layercfg_types::Value;

/// Keys that are never carried into a merged tree.
pub const POISONED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns `true` if `key` must be dropped during merge and clone.
#[must_use]
pub fn is_poisoned_key(key: &str) -> bool {
    POISONED_KEYS.contains(&key)
}

/// Clones `value` recursively, dropping poisoned keys at every depth.
#[must_use]
pub fn deep_clone(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_poisoned_key(key))
                .map(|(key, child)| (key.clone(), deep_clone(child)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(deep_clone).collect()),
        leaf => leaf.clone(),
    }
}
