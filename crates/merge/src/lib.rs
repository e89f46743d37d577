//! Merge-and-diff engine for layered configuration trees.
//!
//! [`merge`] combines a base layer with a patch layer; [`diff_merge`] does the
//! same while reporting every leaf that differs from a previous snapshot.
//! Poisoned keys (`__proto__`, `constructor`, `prototype`) never survive
//! either operation.
//!
//! Cyclic input cannot be expressed with [`layercfg_types::Value`], so the
//! recursion depth is bounded by the depth of the trees themselves.

mod clone;
mod merge;

pub use clone::{POISONED_KEYS, deep_clone, is_poisoned_key};
pub use merge::{diff_merge, diff_merge_changes, merge};
