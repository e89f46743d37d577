//! Runtime environment variables and the environment file.

use indexmap::IndexMap;
use layercfg_types::{LayercfgError, Result, Value};
use std::{
    collections::{HashMap, HashSet},
    ffi::OsString,
    fs::File,
    io::ErrorKind,
    path::Path,
};

/// The key/value store the environment file is applied to.
///
/// Layer builders read it to interpolate values into the configuration.
pub trait RuntimeEnvironment: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str);

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-memory variables, seeded from the process environment or by hand.
///
/// Writes stay in this store and never touch the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: HashMap<String, String>,
}

impl EnvVars {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment. Entries that are not
    /// valid Unicode are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Collects OS-level pairs, skipping those that are not valid Unicode.
    #[must_use]
    pub fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    tracing::debug!(key = ?key, "skipping non-Unicode environment variable");
                    None
                }
            })
            .collect()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl RuntimeEnvironment for EnvVars {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

/// Fails unless `path` exists and can be opened for reading.
///
/// # Errors
///
/// Returns [`LayercfgError::FileAccess`].
pub fn check_file_access(path: &Path) -> Result<()> {
    match File::open(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(LayercfgError::FileAccess {
            path: path.to_path_buf(),
            missing: e.kind() == ErrorKind::NotFound,
        }),
    }
}

/// Parses a `KEY=VALUE` file, keeping the file's key order.
///
/// # Errors
///
/// Returns [`LayercfgError::FileAccess`] when the file cannot be opened and
/// [`LayercfgError::EnvFile`] when a line cannot be parsed.
pub fn read_env_file(path: &Path) -> Result<IndexMap<String, String>> {
    check_file_access(path)?;
    let parse_error = |e: dotenvy::Error| LayercfgError::EnvFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut vars = IndexMap::new();
    for item in dotenvy::from_path_iter(path).map_err(parse_error)? {
        let (key, value) = item.map_err(parse_error)?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// The parsed file as a JSON object for schema validation.
#[must_use]
pub fn to_json(vars: &IndexMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        vars.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

/// Reads a normalized env object back into pairs. Strings are kept as is,
/// other values (such as schema defaults) are rendered as JSON.
#[must_use]
pub fn from_value(value: &Value) -> IndexMap<String, String> {
    value
        .as_object()
        .into_iter()
        .flatten()
        .map(|(key, value)| {
            let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            (key.clone(), text)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Initial,
    Reload,
}

/// Decides which parsed keys may be written to the runtime environment.
///
/// At initial load a key is written when it is unset or listed as
/// overridable; every key written then (except those excluded from reloads)
/// may be rewritten by later reloads. On reload a key is written when it is
/// unset or already in that set, and keys that were unset join the set.
#[derive(Debug, Clone, Default)]
pub struct OverridePolicy {
    overridable: HashSet<String>,
    not_on_watch: HashSet<String>,
    on_watch: HashSet<String>,
}

impl OverridePolicy {
    #[must_use]
    pub fn new(overridable: &[String], not_overridable_on_watch: &[String]) -> Self {
        Self {
            overridable: overridable.iter().cloned().collect(),
            not_on_watch: not_overridable_on_watch.iter().cloned().collect(),
            on_watch: HashSet::new(),
        }
    }

    /// Writes permitted keys whose value differs; returns whether any was written.
    pub fn apply(
        &mut self,
        parsed: &IndexMap<String, String>,
        env: &mut dyn RuntimeEnvironment,
        phase: ApplyPhase,
    ) -> bool {
        let mut changed = false;
        for (key, value) in parsed {
            let current = env.get(key);
            if current.as_deref() == Some(value.as_str()) {
                continue;
            }
            let allowed = match phase {
                ApplyPhase::Initial => current.is_none() || self.overridable.contains(key),
                ApplyPhase::Reload => current.is_none() || self.on_watch.contains(key),
            };
            if !allowed {
                tracing::trace!(key, ?phase, "environment key not overridable");
                continue;
            }
            env.set(key, value);
            changed = true;
            if phase == ApplyPhase::Reload || !self.not_on_watch.contains(key) {
                self.on_watch.insert(key.clone());
            }
        }
        changed
    }

    /// Whether reloads may rewrite `key`.
    #[must_use]
    pub fn overridable_on_watch(&self, key: &str) -> bool {
        self.on_watch.contains(key)
    }
}
