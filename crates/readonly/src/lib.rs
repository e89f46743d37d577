//! Deeply immutable views over shared configuration graphs.
//!
//! A [`Branch`] is a shared, mutable mapping or array. [`readonly`] wraps one
//! in a [`Readonly`] view that reads through to the live data and rejects
//! every write at every depth. Nested wrappers are resolved through a
//! [`WrapperCache`] keyed by container identity, so reading the same nested
//! node twice yields the same wrapper.

mod cache;
mod node;
mod view;

pub use cache::WrapperCache;
pub use node::{Branch, Node};
pub use view::{Entry, Readonly, readonly};
