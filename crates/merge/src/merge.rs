//! Recursive merge with optional diffing against a reference snapshot.
//!
//! Merge semantics:
//! - Objects: deep-merge by key (recursive)
//! - Arrays: REPLACE (patch wins entirely, deep-cloned)
//! - Dates and scalars: override (patch wins; dates are copied)
//!
//! While merging, every leaf the traversal produces can be compared against
//! the same path inside a reference tree. Patch keys are visited first, then
//! the keys only the target carries, so changes are reported in that order.

use crate::clone::{deep_clone, is_poisoned_key};
use layercfg_types::{Change, Map, Value};

/// Receives every leaf the traversal produces.
trait Observer {
    /// When `false` the traversal skips path building and comparison.
    const ENABLED: bool;

    fn observe(&mut self, path: &str, value: &Value);
}

struct Silent;

impl Observer for Silent {
    const ENABLED: bool = false;

    #[inline]
    fn observe(&mut self, _path: &str, _value: &Value) {}
}

struct Differ<'r, F> {
    reference: &'r Value,
    on_change: F,
}

impl<F> Observer for Differ<'_, F>
where
    F: FnMut(&str, &Value, Option<&Value>),
{
    const ENABLED: bool = true;

    fn observe(&mut self, path: &str, value: &Value) {
        // The root is replaced wholesale and never reported.
        if path.is_empty() {
            return;
        }
        let old = self.reference.pointer(path);
        if old != Some(value) {
            (self.on_change)(path, value, old);
        }
    }
}

/// Merges `patch` over `target` into a new tree.
///
/// An absent `target` or `patch` counts as an empty mapping. The inputs are
/// never modified and the result shares nothing with them.
#[must_use]
pub fn merge(target: Option<&Value>, patch: Option<&Value>) -> Value {
    let empty = Value::object();
    merge_node(target, patch.unwrap_or(&empty), &mut Silent, "")
}

/// Merges like [`merge`], calling `on_change(path, new, old)` for every leaf
/// of the result that differs from the same path in `reference`.
///
/// `old` is `None` when `reference` has nothing at that path. Arrays are
/// compared as a whole and reported at the array's own path.
pub fn diff_merge<F>(target: Option<&Value>, patch: Option<&Value>, reference: &Value, on_change: F) -> Value
where
    F: FnMut(&str, &Value, Option<&Value>),
{
    let empty = Value::object();
    let mut differ = Differ {
        reference,
        on_change,
    };
    merge_node(target, patch.unwrap_or(&empty), &mut differ, "")
}

/// Runs [`diff_merge`] and collects the reported changes in emission order.
#[must_use]
pub fn diff_merge_changes(
    target: Option<&Value>,
    patch: Option<&Value>,
    reference: &Value,
) -> (Value, Vec<Change>) {
    let mut changes = Vec::new();
    let merged = diff_merge(target, patch, reference, |path, new, old| {
        changes.push(Change::new(path, new.clone(), old.cloned()));
    });
    (merged, changes)
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Turns whatever sits under `target` into an owned mapping to merge into.
fn prepare_target(target: Option<&Value>) -> Map {
    match target {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(key, _)| !is_poisoned_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), deep_clone(item)))
            .collect(),
        _ => Map::new(),
    }
}

fn merge_node<O: Observer>(target: Option<&Value>, patch: &Value, observer: &mut O, path: &str) -> Value {
    let entries = match patch {
        Value::Object(entries) => entries,
        Value::Array(_) => {
            let cloned = deep_clone(patch);
            observer.observe(path, &cloned);
            return cloned;
        }
        leaf => {
            let copied = leaf.clone();
            observer.observe(path, &copied);
            return copied;
        }
    };

    let mut out = prepare_target(target);

    for (key, value) in entries {
        if is_poisoned_key(key) {
            continue;
        }
        let child = if O::ENABLED {
            child_path(path, key)
        } else {
            String::new()
        };
        let merged = merge_node(out.get(key), value, observer, &child);
        out.insert(key.clone(), merged);
    }

    // Keys only the target carries: re-merge each against itself so it is
    // normalized and still compared with the reference.
    let leftovers: Vec<String> = out
        .keys()
        .filter(|key| !entries.contains_key(*key))
        .cloned()
        .collect();
    for key in leftovers {
        let child = if O::ENABLED {
            child_path(path, &key)
        } else {
            String::new()
        };
        if let Some(slot) = out.get_mut(&key) {
            let carried = std::mem::take(slot);
            *slot = merge_node(Some(&carried), &carried, observer, &child);
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn paths(changes: &[Change]) -> Vec<&str> {
        changes.iter().map(|c| c.path.as_str()).collect()
    }

    #[test]
    fn test_scalar_override() {
        let result = merge(Some(&v(json!({"timeout": 100}))), Some(&v(json!({"timeout": 200}))));
        assert_eq!(result, v(json!({"timeout": 200})));
    }

    #[test]
    fn test_object_deep_merge() {
        let base = v(json!({"cache": {"derived_data": "off", "spm": "off"}}));
        let overlay = v(json!({"cache": {"derived_data": "on"}}));
        let result = merge(Some(&base), Some(&overlay));
        assert_eq!(result, v(json!({"cache": {"derived_data": "on", "spm": "off"}})));
    }

    #[test]
    fn test_array_replace() {
        let base = v(json!({"schemes": ["A", "B", "C"]}));
        let overlay = v(json!({"schemes": ["X", "Y"]}));
        let result = merge(Some(&base), Some(&overlay));
        assert_eq!(result.pointer("schemes"), Some(&v(json!(["X", "Y"]))));
    }

    #[test]
    fn test_null_override() {
        let result = merge(Some(&v(json!({"value": 100}))), Some(&v(json!({"value": null}))));
        assert!(result.get("value").unwrap().is_null());
    }

    #[test]
    fn test_absent_target_returns_patch_copy() {
        let patch = v(json!({"k": "v"}));
        assert_eq!(merge(None, Some(&patch)), patch);
        assert_eq!(merge(Some(&Value::Null), Some(&patch)), patch);
    }

    #[test]
    fn test_absent_patch_clones_target() {
        let target = v(json!({"testArr": [{"k": "v", "n": null, "a": [1, 2]}, [1]], "o": {"k1": "v1"}}));
        assert_eq!(merge(Some(&target), None), target);
        assert_eq!(merge(None, None), Value::object());
    }

    #[test]
    fn test_top_level_array_is_cloned() {
        let patch = v(json!([{"k": "v"}, {"k1": "v1"}]));
        assert_eq!(merge(None, Some(&patch)), patch);
    }

    #[test]
    fn test_array_target_becomes_index_keyed_mapping() {
        let target = v(json!(["a", "b"]));
        let patch = v(json!({"extra": 1}));
        assert_eq!(
            merge(Some(&target), Some(&patch)),
            v(json!({"0": "a", "1": "b", "extra": 1}))
        );
    }

    #[test]
    fn test_dates_are_copied() {
        let at = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let patch: Value = [("at".to_string(), Value::Date(at))].into_iter().collect();
        let result = merge(None, Some(&patch));
        assert_eq!(result.get("at").and_then(Value::as_date), Some(&at));
    }

    #[test]
    fn test_poisoned_keys_are_dropped() {
        let patch = v(json!({
            "arr": [{"k": "v", "__proto__": {"injectProp": "data"}}],
            "__proto__": {"injectProp": "data"},
            "nested": {"constructor": {"injectProp": "data"}, "ok": true}
        }));
        let target = v(json!({"prototype": {"injectProp": "data"}, "keep": 1}));
        let result = merge(Some(&target), Some(&patch));
        assert_eq!(
            result,
            v(json!({"keep": 1, "arr": [{"k": "v"}], "nested": {"ok": true}}))
        );
    }

    #[test]
    fn test_root_is_never_reported() {
        let mut calls = 0;
        diff_merge(
            Some(&v(json!([1]))),
            Some(&v(json!([2]))),
            &Value::object(),
            |_, _, _| calls += 1,
        );
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_layer_scenario_reports_single_change() {
        let base = v(json!({"version": 1, "db": {"port": 5432}}));
        let env = v(json!({"db": {"port": 5433}}));
        let reference = v(json!({"version": 1, "db": {"port": 5432}}));
        let (merged, changes) = diff_merge_changes(Some(&base), Some(&env), &reference);
        assert_eq!(merged, v(json!({"version": 1, "db": {"port": 5433}})));
        assert_eq!(
            changes,
            vec![Change::new("db.port", Value::from(5433), Some(Value::from(5432)))]
        );
    }

    #[test]
    fn test_diff_against_previous_merge() {
        let old_date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let new_date = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();

        let mut old_config = v(json!({
            "version": 1,
            "server": {"port": 3000},
            "env": "test",
            "db": {"host": "127.0.0.1", "port": 5432, "username": "postgres"},
            "modules": {
                "auth": {"token": {"secret": "T0p s3cr3T", "expiresInSeconds": 86400}},
                "swagger": {"schemes": ["https"]}
            }
        }));
        old_config
            .as_object_mut()
            .unwrap()
            .insert("versionDate".into(), Value::Date(old_date));

        let mut new_base = v(json!({
            "version": 1,
            "server": {"port": 3000},
            "env": "test",
            "db": {"host": "127.0.0.1", "port": 5433, "username": "postgres_change"},
            "modules": {
                "auth": {"token": {"secret": "T0p s3cr3T", "expiresInSeconds": 86400}},
                "swagger": {"schemes": ["https"]}
            }
        }));
        new_base
            .as_object_mut()
            .unwrap()
            .insert("versionDate".into(), Value::Date(new_date));
        let new_env = v(json!({
            "modules": {
                "auth": {"token": {"expiresInSeconds": 43200}},
                "swagger": {"schemes": ["http"]}
            }
        }));

        let (merged, changes) = diff_merge_changes(Some(&new_base), Some(&new_env), &old_config);

        assert_eq!(merged.pointer("modules.auth.token.secret"), Some(&Value::from("T0p s3cr3T")));
        assert_eq!(merged.pointer("modules.auth.token.expiresInSeconds"), Some(&Value::from(43200)));
        assert_eq!(merged.pointer("versionDate"), Some(&Value::Date(new_date)));
        assert_eq!(
            paths(&changes),
            [
                "modules.auth.token.expiresInSeconds",
                "modules.swagger.schemes",
                "db.port",
                "db.username",
                "versionDate",
            ]
        );
        assert_eq!(changes[1].new_value, v(json!(["http"])));
        assert_eq!(changes[1].old_value, Some(v(json!(["https"]))));
        assert_eq!(changes[4].old_value, Some(Value::Date(old_date)));
    }

    #[test]
    fn test_missing_reference_path_reports_absent_old_value() {
        let (_, changes) = diff_merge_changes(
            None,
            Some(&v(json!({"db": {"port": 1}}))),
            &v(json!({"version": 1})),
        );
        assert_eq!(changes, vec![Change::new("db.port", Value::from(1), None)]);
    }

    #[test]
    fn test_carried_over_leaf_is_compared() {
        let target = v(json!({"a": 1, "b": 2}));
        let patch = v(json!({"a": 1}));
        let reference = v(json!({"a": 1, "b": 3}));
        let (_, changes) = diff_merge_changes(Some(&target), Some(&patch), &reference);
        assert_eq!(
            changes,
            vec![Change::new("b", Value::from(2), Some(Value::from(3)))]
        );
    }

    #[test]
    fn test_self_merge_reports_nothing() {
        let tree = v(json!({"a": {"b": [1, {"c": null}]}, "d": "x"}));
        let (merged, changes) = diff_merge_changes(Some(&tree), Some(&tree), &tree);
        assert_eq!(merged, tree);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_removed_leaf_is_not_reported() {
        // Only leaves of the new tree are visited; deletions are silent.
        let (_, changes) = diff_merge_changes(
            None,
            Some(&v(json!({"a": 1}))),
            &v(json!({"a": 1, "gone": true})),
        );
        assert!(changes.is_empty());
    }
}
