//! Change and error listeners.

use layercfg_types::{Change, LayercfgError, Value};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

/// Path under which batch listeners are registered.
pub const ALL_CHANGES: &str = "*";

type PathListener = dyn Fn(&Value, Option<&Value>) + Send + Sync;
type BatchListener = dyn Fn(&[Change]) + Send + Sync;
type ErrorListener = dyn Fn(&LayercfgError) + Send + Sync;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    paths: HashMap<String, Vec<(u64, Arc<PathListener>)>>,
    batch: Vec<(u64, Arc<BatchListener>)>,
    errors: Vec<(u64, Arc<ErrorListener>)>,
}

impl Listeners {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, slot: &Slot, id: u64) {
        match slot {
            Slot::Path(path) => {
                if let Some(list) = self.paths.get_mut(path) {
                    list.retain(|(i, _)| *i != id);
                    if list.is_empty() {
                        self.paths.remove(path);
                    }
                }
            }
            Slot::Batch => self.batch.retain(|(i, _)| *i != id),
            Slot::Error => self.errors.retain(|(i, _)| *i != id),
        }
    }
}

enum Slot {
    Path(String),
    Batch,
    Error,
}

/// Fans out reload results to registered listeners.
#[derive(Clone, Default)]
pub(crate) struct Emitter {
    listeners: Arc<Mutex<Listeners>>,
}

impl Emitter {
    pub(crate) fn on_path<F>(&self, path: &str, listener: F) -> Subscription
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners
            .paths
            .entry(path.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        self.subscription(Slot::Path(path.to_string()), id)
    }

    pub(crate) fn on_batch<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Change]) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners.batch.push((id, Arc::new(listener)));
        self.subscription(Slot::Batch, id)
    }

    pub(crate) fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LayercfgError) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners.errors.push((id, Arc::new(listener)));
        self.subscription(Slot::Error, id)
    }

    fn subscription(&self, slot: Slot, id: u64) -> Subscription {
        Subscription {
            inner: Some((Arc::downgrade(&self.listeners), slot, id)),
        }
    }

    /// Delivers one cycle's changes: the batch first, then each change to
    /// the listeners of its path, in change order.
    ///
    /// Listeners are resolved before any is called, so unsubscribing during
    /// delivery does not affect the rest of this cycle.
    pub(crate) fn emit_changes(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let (batch, per_change) = {
            let listeners = self.listeners.lock();
            let batch: Vec<_> = listeners.batch.iter().map(|(_, l)| Arc::clone(l)).collect();
            let per_change: Vec<Vec<_>> = changes
                .iter()
                .map(|change| {
                    listeners
                        .paths
                        .get(&change.path)
                        .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                        .unwrap_or_default()
                })
                .collect();
            (batch, per_change)
        };

        for listener in &batch {
            listener(changes);
        }
        for (change, listeners) in changes.iter().zip(per_change) {
            for listener in listeners {
                listener(&change.new_value, change.old_value.as_ref());
            }
        }
    }

    pub(crate) fn emit_error(&self, error: &LayercfgError) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .errors
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        if listeners.is_empty() {
            tracing::debug!(%error, "no error listeners registered");
        }
        for listener in listeners {
            listener(error);
        }
    }
}

/// Handle returned by listener registration.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    inner: Option<(Weak<Mutex<Listeners>>, Slot, u64)>,
}

impl Subscription {
    /// Removes the listener. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        if let Some((listeners, slot, id)) = &self.inner {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().remove(slot, *id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.as_ref().map(|(_, slot, id)| {
            let name = match slot {
                Slot::Path(path) => path.as_str(),
                Slot::Batch => ALL_CHANGES,
                Slot::Error => "error",
            };
            format!("{name}#{id}")
        });
        f.debug_tuple("Subscription").field(&slot).finish()
    }
}
