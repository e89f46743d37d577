//! Core types for the layercfg workspace.
//!
//! This crate defines what the other layers exchange: the configuration tree
//! [`Value`], the [`Change`] records a reload produces, and the unified
//! [`LayercfgError`].

pub mod change;
pub mod error;
pub mod value;

pub use change::Change;
pub use error::{LayercfgError, Result, SchemaIssue, ValidationPhase, WriteOp};
pub use value::{Map, Value};
