use layercfg_types::{LayercfgError, Result};
use std::{
    ffi::OsString,
    fs::Metadata,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Watches a single file and reports settled modifications.
///
/// The parent directory is watched so editors that replace the file on save
/// are still seen. Events are filtered by file name and debounced by
/// modification time on a dedicated thread. Dropping the watcher stops it.
pub struct FileWatcher {
    _watcher: notify::RecommendedWatcher,
    path: PathBuf,
}

impl FileWatcher {
    /// Starts watching `path`, calling `on_event` with `Ok(())` for each
    /// settled change and with an error when the watcher or stat fails.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::Watch`] if the OS watcher cannot be created or
    /// registered.
    pub fn spawn<F>(path: &Path, on_event: F) -> Result<Self>
    where
        F: Fn(Result<()>) + Send + 'static,
    {
        use notify::{RecursiveMode, Watcher as _};

        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| LayercfgError::Watch(format!("{} is not a file path", path.display())))?
            .to_os_string();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<()>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let message = match res {
                Ok(event)
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str())) =>
                {
                    Ok(())
                }
                Ok(_) => return,
                Err(e) => Err(e),
            };
            let _ = tx.send(message);
        })
        .map_err(|e| LayercfgError::Watch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| LayercfgError::Watch(e.to_string()))?;

        let file = path.to_path_buf();
        std::thread::Builder::new()
            .name("layercfg-watch".into())
            .spawn(move || {
                let mut debounce = Debounce::default();
                for message in rx {
                    match message {
                        Err(e) => on_event(Err(LayercfgError::Watch(e.to_string()))),
                        Ok(()) => match std::fs::metadata(&file) {
                            Ok(meta) => {
                                if debounce.settled(&meta) {
                                    on_event(Ok(()));
                                }
                            }
                            Err(source) => on_event(Err(LayercfgError::Io {
                                path: file.clone(),
                                source,
                            })),
                        },
                    }
                }
                tracing::debug!(path = %file.display(), "file watcher stopped");
            })
            .map_err(|source| LayercfgError::Io {
                path: dir.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), dir = %dir.display(), "watching file");
        Ok(Self {
            _watcher: watcher,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Drops repeated events for the same modification time and events seen
/// while the file is empty (mid-write).
#[derive(Debug, Default)]
struct Debounce {
    last_modified: Option<SystemTime>,
}

impl Debounce {
    fn settled(&mut self, meta: &Metadata) -> bool {
        self.observe(meta.modified().ok(), meta.len())
    }

    fn observe(&mut self, modified: Option<SystemTime>, len: u64) -> bool {
        if len == 0 {
            return false;
        }
        if let Some(modified) = modified {
            if self.last_modified == Some(modified) {
                return false;
            }
            self.last_modified = Some(modified);
        }
        true
    }
}
