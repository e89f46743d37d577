use crate::{
    build::{Assembler, CycleState, Outcome},
    env::{EnvVars, RuntimeEnvironment},
    events::{Emitter, Subscription},
    layers::{LayerDirectory, LayerSource},
    options::Options,
    watcher::FileWatcher,
};
use arc_swap::ArcSwap;
use layercfg_readonly::{Branch, Readonly, readonly};
use layercfg_types::{Change, LayercfgError, Result, Value};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

/// What [`LayeredConfig::config`] hands out.
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Deeply immutable view (the default).
    Readonly(Arc<Readonly>),
    /// The live graph itself; writes are visible to later reads and are the
    /// baseline the next reload diffs against.
    Mutable(Branch),
}

impl Snapshot {
    /// Reads the leaf or subtree at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        match self {
            Self::Readonly(view) => view.pointer(path).map(|entry| entry.to_value()),
            Self::Mutable(branch) => {
                let mut segments = path.split('.');
                let mut node = branch.get(segments.next()?)?;
                for segment in segments {
                    node = node.as_branch()?.get(segment)?;
                }
                Some(node.to_value())
            }
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Readonly(view) => view.to_value(),
            Self::Mutable(branch) => branch.to_value(),
        }
    }

    #[must_use]
    pub fn as_readonly(&self) -> Option<&Arc<Readonly>> {
        match self {
            Self::Readonly(view) => Some(view),
            Self::Mutable(_) => None,
        }
    }

    #[must_use]
    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Self::Mutable(branch) => Some(branch),
            Self::Readonly(_) => None,
        }
    }
}

/// The published tree and, in read-only mode, its view.
struct Live {
    branch: Branch,
    view: Option<Arc<Readonly>>,
}

impl Live {
    fn new(tree: &Value, readonly_view: bool) -> Self {
        let branch = Branch::from_value(tree).unwrap_or_else(Branch::object);
        let view = readonly_view.then(|| readonly(&branch, None, false));
        Self { branch, view }
    }
}

struct Inner {
    assembler: Assembler,
    /// Held for a whole cycle, publication and delivery included. Reentrant
    /// so a listener may call `reload` on the delivering thread.
    cycle: ReentrantMutex<()>,
    state: Mutex<CycleState>,
    live: ArcSwap<Live>,
    emitter: Emitter,
    watching: AtomicBool,
    watcher: Mutex<Option<FileWatcher>>,
}

impl Inner {
    /// Runs one reload cycle. Cycles are serialized end to end, so listeners
    /// see batches in publication order and the snapshot they were built
    /// from. The state lock is released before delivery.
    fn reload(&self) -> Result<Vec<Change>> {
        let _cycle = self.cycle.lock();
        let changes = {
            let mut state = self.state.lock();
            let previous = self.live.load().branch.to_value();
            match self.assembler.reload(&mut state, &previous)? {
                Outcome::Unchanged => {
                    tracing::debug!("environment file applied nothing; keeping snapshot");
                    return Ok(Vec::new());
                }
                Outcome::Built { tree, changes } => {
                    self.live
                        .store(Arc::new(Live::new(&tree, self.assembler.options().readonly)));
                    changes
                }
            }
        };
        tracing::info!(changes = changes.len(), "configuration reloaded");
        self.emitter.emit_changes(&changes);
        Ok(changes)
    }

    fn on_file_event(&self, event: Result<()>) {
        let _cycle = self.cycle.lock();
        if let Err(error) = event.and_then(|()| self.reload().map(|_| ())) {
            tracing::warn!(%error, "configuration reload failed; keeping previous snapshot");
            self.emitter.emit_error(&error);
        }
    }
}

/// A layered configuration with optional hot reload.
///
/// Cloning is cheap and every clone shares the same snapshot, listeners and
/// watcher.
#[derive(Clone)]
pub struct LayeredConfig {
    inner: Arc<Inner>,
}

#[bon::bon]
impl LayeredConfig {
    /// Loads the configuration and, when `env.watch` is set, starts watching
    /// the environment file.
    ///
    /// `layers` defaults to a [`LayerDirectory`] over `options.path`;
    /// `environment` defaults to a snapshot of the process environment.
    ///
    /// # Errors
    ///
    /// Fails on invalid options or schemas, a missing environment file or
    /// layer, an invalid environment name, or a configuration that does not
    /// satisfy its schema.
    #[builder]
    pub fn new(
        options: Options,
        layers: Option<Arc<dyn LayerSource>>,
        environment: Option<Box<dyn RuntimeEnvironment>>,
    ) -> Result<Self> {
        let layers = layers.unwrap_or_else(|| Arc::new(LayerDirectory::new(&options.path)));
        let environment = environment.unwrap_or_else(|| Box::new(EnvVars::from_process()));
        let assembler = Assembler::new(options, layers)?;

        let mut state = CycleState::new(environment, assembler.options());
        let tree = assembler.initial(&mut state)?;
        let live = Live::new(&tree, assembler.options().readonly);
        tracing::info!(
            environment = state.active.as_deref().unwrap_or_default(),
            env_file = %assembler.env_file().display(),
            "configuration loaded"
        );

        let watch = assembler.options().env.watch;
        let inner = Arc::new(Inner {
            assembler,
            cycle: ReentrantMutex::new(()),
            state: Mutex::new(state),
            live: ArcSwap::from_pointee(live),
            emitter: Emitter::default(),
            watching: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });
        if watch {
            start_watching(&inner)?;
        }
        Ok(Self { inner })
    }
}

fn start_watching(inner: &Arc<Inner>) -> Result<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let watcher = FileWatcher::spawn(inner.assembler.env_file(), move |event| {
        if let Some(inner) = weak.upgrade() {
            if inner.watching.load(Ordering::Acquire) {
                inner.on_file_event(event);
            }
        }
    })?;
    *inner.watcher.lock() = Some(watcher);
    inner.watching.store(true, Ordering::Release);
    Ok(())
}

impl LayeredConfig {
    /// The current snapshot.
    #[must_use]
    pub fn config(&self) -> Snapshot {
        let live = self.inner.live.load();
        match &live.view {
            Some(view) => Snapshot::Readonly(Arc::clone(view)),
            None => Snapshot::Mutable(live.branch.clone()),
        }
    }

    /// Owned copy of the current tree.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.live.load().branch.to_value()
    }

    /// Calls `listener` with the new and previous value each time the leaf
    /// at `path` changes. The previous value is `None` when the path did not
    /// exist before.
    pub fn watch_config<F>(&self, path: &str, listener: F) -> Subscription
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        self.inner.emitter.on_path(path, listener)
    }

    /// Calls `listener` once per reload with every change, before any
    /// per-path listener.
    pub fn watch_changes<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Change]) + Send + Sync + 'static,
    {
        self.inner.emitter.on_batch(listener)
    }

    /// Calls `listener` when a watch-triggered reload fails.
    pub fn watch_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LayercfgError) + Send + Sync + 'static,
    {
        self.inner.emitter.on_error(listener)
    }

    /// Stops watching the environment file. Calling it again has no effect.
    pub fn unwatch_file(&self) {
        if self.inner.watching.swap(false, Ordering::AcqRel) {
            tracing::debug!("stopped watching environment file");
        }
        self.inner.watcher.lock().take();
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.inner.watching.load(Ordering::Acquire)
    }

    /// Re-reads the environment file and rebuilds, notifying listeners of
    /// any changes. Failures are returned, not emitted, and leave the
    /// snapshot untouched.
    ///
    /// # Errors
    ///
    /// Returns the failure of whichever step rejected the reload.
    pub fn reload(&self) -> Result<Vec<Change>> {
        self.inner.reload()
    }

    /// Reads a runtime environment variable.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<String> {
        self.inner.state.lock().env.get(key)
    }

    /// Name of the active environment.
    #[must_use]
    pub fn environment(&self) -> String {
        self.inner.state.lock().active.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        self.inner.assembler.options()
    }
}

impl std::fmt::Debug for LayeredConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredConfig")
            .field("environment", &self.environment())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}
