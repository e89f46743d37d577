//! Layered configuration loading and hot reload.
//!
//! A configuration is assembled from a `global` layer and the layer of the
//! active environment, after a `.env` file has been applied to the runtime
//! environment. Both the `.env` map and the assembled tree are checked
//! against JSON Schemas. When watching is enabled, edits to the `.env` file
//! trigger a rebuild whose leaf-level differences are delivered to
//! listeners; failures leave the previous snapshot in place.

mod build;
pub mod env;
mod events;
pub mod layers;
mod manager;
pub mod options;
pub mod schema;
pub mod watcher;

pub use env::{EnvVars, RuntimeEnvironment};
pub use events::{ALL_CHANGES, Subscription};
pub use layers::{GLOBAL_LAYER, LayerDirectory, LayerRegistry, LayerSource};
pub use manager::{LayeredConfig, Snapshot};
pub use options::{EnvOptions, Options};
pub use watcher::FileWatcher;
