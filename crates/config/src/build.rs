//! One load or reload cycle: read the environment file, apply it, build the
//! layers, merge and validate.

use crate::{
    env::{self, ApplyPhase, OverridePolicy, RuntimeEnvironment},
    layers::{GLOBAL_LAYER, LayerSource},
    options::Options,
    schema::Validators,
};
use layercfg_merge::{diff_merge_changes, merge};
use layercfg_types::{Change, LayercfgError, Map, Result, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// State carried from one cycle to the next.
pub(crate) struct CycleState {
    pub(crate) env: Box<dyn RuntimeEnvironment>,
    pub(crate) policy: OverridePolicy,
    /// Active environment, fixed by the first successful resolution.
    pub(crate) active: Option<String>,
}

impl CycleState {
    pub(crate) fn new(env: Box<dyn RuntimeEnvironment>, options: &Options) -> Self {
        Self {
            env,
            policy: OverridePolicy::new(&options.env.overridable, &options.env.not_overridable_on_watch),
            active: None,
        }
    }
}

pub(crate) enum Outcome {
    /// Nothing was applied from the environment file; keep the snapshot.
    Unchanged,
    Built { tree: Value, changes: Vec<Change> },
}

/// Everything fixed at construction that a cycle needs.
pub(crate) struct Assembler {
    options: Options,
    env_file: PathBuf,
    validators: Validators,
    layers: Arc<dyn LayerSource>,
}

impl Assembler {
    /// Validates the options and checks every input exists.
    pub(crate) fn new(options: Options, layers: Arc<dyn LayerSource>) -> Result<Self> {
        let options = options.validated()?;
        let validators = Validators::from_options(&options)?;
        let env_file = options.env_file();
        env::check_file_access(&env_file)?;
        layers.verify(GLOBAL_LAYER)?;
        for name in &options.environments {
            layers.verify(name)?;
        }
        Ok(Self {
            options,
            env_file,
            validators,
            layers,
        })
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Builds the first tree. Always produces one.
    pub(crate) fn initial(&self, state: &mut CycleState) -> Result<Value> {
        match self.run(state, None)? {
            Outcome::Built { tree, .. } => Ok(tree),
            Outcome::Unchanged => Err(LayercfgError::validation(
                layercfg_types::ValidationPhase::ConfigValues,
                "initial load produced no configuration",
            )),
        }
    }

    /// Rebuilds against `previous`, reporting every leaf that differs.
    pub(crate) fn reload(&self, state: &mut CycleState, previous: &Value) -> Result<Outcome> {
        self.run(state, Some(previous))
    }

    fn run(&self, state: &mut CycleState, previous: Option<&Value>) -> Result<Outcome> {
        let mut parsed = Value::from(env::to_json(&env::read_env_file(&self.env_file)?));
        self.validators.env.normalize(&mut parsed);
        self.validators.env.validate(&parsed.to_json())?;
        let parsed = env::from_value(&parsed);

        let phase = if previous.is_some() {
            ApplyPhase::Reload
        } else {
            ApplyPhase::Initial
        };
        let changed = state.policy.apply(&parsed, &mut *state.env, phase);
        if !changed && previous.is_some() {
            return Ok(Outcome::Unchanged);
        }

        let active = match &state.active {
            Some(active) => active.clone(),
            None => {
                let selected = self.resolve_environment(&*state.env)?;
                state.active = Some(selected.clone());
                selected
            }
        };
        self.check_mode_variable(&*state.env)?;

        let global = self.layers.build(GLOBAL_LAYER, &*state.env)?;
        let layer = self.layers.build(&active, &*state.env)?;
        let (mut tree, changes) = match previous {
            Some(previous) => diff_merge_changes(Some(&global), Some(&layer), previous),
            None => (merge(Some(&global), Some(&layer)), Vec::new()),
        };
        self.stamp(&mut tree, &active);
        self.validators.config.normalize(&mut tree);
        self.validators.config.validate(&tree.to_json())?;

        tracing::debug!(environment = %active, changes = changes.len(), ?phase, "configuration assembled");
        Ok(Outcome::Built { tree, changes })
    }

    fn resolve_environment(&self, env: &dyn RuntimeEnvironment) -> Result<String> {
        let selector = &self.options.env.selector;
        let value = env.get(selector);
        match value {
            Some(name) if self.options.environments.contains(&name) => Ok(name),
            value => Err(LayercfgError::InvalidEnvironment {
                variable: selector.clone(),
                value,
                allowed: self.options.environments.clone(),
            }),
        }
    }

    fn check_mode_variable(&self, env: &dyn RuntimeEnvironment) -> Result<()> {
        let Some(variable) = &self.options.env.mode_variable else {
            return Ok(());
        };
        match env.get(variable) {
            Some(value) if !self.options.environments.contains(&value) => {
                Err(LayercfgError::InvalidEnvironment {
                    variable: variable.clone(),
                    value: Some(value),
                    allowed: self.options.environments.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Writes the `env` and `environments` keys over whatever the layers set.
    fn stamp(&self, tree: &mut Value, active: &str) {
        let environments: Map = self
            .options
            .environments
            .iter()
            .map(|name| (name.to_uppercase(), Value::from(name.as_str())))
            .collect();
        if let Some(root) = tree.as_object_mut() {
            root.insert("env".into(), Value::from(active));
            root.insert("environments".into(), Value::Object(environments));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{env::EnvVars, layers::LayerRegistry};
    use serde_json::json;

    fn registry() -> Arc<dyn LayerSource> {
        let mut registry = LayerRegistry::new().layer(GLOBAL_LAYER, |env| {
            Value::from(json!({
                "version": env.get("MC_VERSION").and_then(|v| v.parse::<i64>().ok()),
                "db": {"host": "127.0.0.1", "port": 5432}
            }))
        });
        for name in ["local", "development", "staging", "production"] {
            registry = registry.layer(name, |_| Value::object());
        }
        Arc::new(registry.layer("test", |env| {
            Value::from(json!({"db": {"port": env.get("DB_PORT").and_then(|v| v.parse::<i64>().ok())}}))
        }))
    }

    fn options(env_file: &Path) -> Options {
        let mut o = Options::default();
        o.env.path = Some(env_file.to_path_buf());
        o
    }

    #[test]
    fn test_initial_build_stamps_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\nMC_VERSION=1\nDB_PORT=5433\n").unwrap();
        let assembler = Assembler::new(options(&path), registry()).unwrap();
        let mut state = CycleState::new(Box::new(EnvVars::new()), assembler.options());

        let tree = assembler.initial(&mut state).unwrap();
        assert_eq!(tree.pointer("version"), Some(&Value::from(1)));
        assert_eq!(tree.pointer("db.port"), Some(&Value::from(5433)));
        assert_eq!(tree.pointer("env"), Some(&Value::from("test")));
        assert_eq!(tree.pointer("environments.PRODUCTION"), Some(&Value::from("production")));
        assert_eq!(state.active.as_deref(), Some("test"));
    }

    #[test]
    fn test_reload_without_env_changes_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\nDB_PORT=5432\n").unwrap();
        let assembler = Assembler::new(options(&path), registry()).unwrap();
        let mut state = CycleState::new(Box::new(EnvVars::new()), assembler.options());
        let tree = assembler.initial(&mut state).unwrap();
        assert!(matches!(assembler.reload(&mut state, &tree).unwrap(), Outcome::Unchanged));
    }

    #[test]
    fn test_reload_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\nDB_PORT=5432\n").unwrap();
        let assembler = Assembler::new(options(&path), registry()).unwrap();
        let mut state = CycleState::new(Box::new(EnvVars::new()), assembler.options());
        let tree = assembler.initial(&mut state).unwrap();

        std::fs::write(&path, "APP_ENV=test\nDB_PORT=5433\n").unwrap();
        match assembler.reload(&mut state, &tree).unwrap() {
            Outcome::Built { tree, changes } => {
                assert_eq!(
                    changes,
                    [Change::new("db.port", Value::from(5433), Some(Value::from(5432)))]
                );
                assert_eq!(tree.pointer("db.port"), Some(&Value::from(5433)));
            }
            Outcome::Unchanged => panic!("expected a rebuilt tree"),
        }
    }

    #[test]
    fn test_invalid_selector_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\n").unwrap();
        let assembler = Assembler::new(options(&path), registry()).unwrap();
        let env = EnvVars::new().with("APP_ENV", "invalid_env");
        let mut state = CycleState::new(Box::new(env), assembler.options());
        let err = assembler.initial(&mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid environment variable: APP_ENV, should be equal to one of the allowed values: \
             {\"allowedValues\":[\"local\",\"development\",\"staging\",\"production\",\"test\"]}"
        );
    }

    #[test]
    fn test_mode_variable_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\n").unwrap();
        let mut o = options(&path);
        o.env.mode_variable = Some("RUN_MODE".into());
        let assembler = Assembler::new(o, registry()).unwrap();
        let env = EnvVars::new().with("RUN_MODE", "qa");
        let mut state = CycleState::new(Box::new(env), assembler.options());
        assert!(matches!(
            assembler.initial(&mut state),
            Err(LayercfgError::InvalidEnvironment { ref variable, .. }) if variable == "RUN_MODE"
        ));
    }

    #[test]
    fn test_missing_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Assembler::new(options(&dir.path().join(".env")), registry())
            .err()
            .unwrap();
        assert!(matches!(err, LayercfgError::FileAccess { missing: true, .. }));
    }

    #[test]
    fn test_missing_environment_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\n").unwrap();
        let layers: Arc<dyn LayerSource> =
            Arc::new(LayerRegistry::new().layer(GLOBAL_LAYER, |_| Value::object()));
        let err = Assembler::new(options(&path), layers).err().unwrap();
        assert!(matches!(err, LayercfgError::Layer { ref name, .. } if name == "local"));
    }

    #[test]
    fn test_env_schema_defaults_reach_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\nDB_PORT=5433\nSTRAY=1\n").unwrap();
        let mut o = options(&path);
        o.env.schema = json!({
            "properties": {
                "PORT": { "type": "string", "default": "3000" },
                "DEBUG": { "type": "boolean", "default": false }
            }
        });
        o.schema = json!({
            "properties": {
                "db": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "host": { "type": "string" },
                        "port": { "type": "integer" },
                        "pool": { "type": "integer", "default": 10 }
                    }
                },
                "version": { "default": 0 }
            }
        });
        let layers: Arc<dyn LayerSource> = {
            let mut registry = LayerRegistry::new().layer(GLOBAL_LAYER, |env| {
                Value::from(json!({
                    "port": env.get("PORT"),
                    "db": {"port": 5432, "legacy": true}
                }))
            });
            for name in ["local", "development", "staging", "production", "test"] {
                registry = registry.layer(name, |_| Value::object());
            }
            Arc::new(registry)
        };
        let assembler = Assembler::new(o, layers).unwrap();
        let mut state = CycleState::new(Box::new(EnvVars::new()), assembler.options());

        let tree = assembler.initial(&mut state).unwrap();
        assert_eq!(state.env.get("PORT").as_deref(), Some("3000"));
        assert_eq!(state.env.get("DEBUG").as_deref(), Some("false"));
        assert_eq!(state.env.get("STRAY").as_deref(), Some("1"));
        assert_eq!(tree.pointer("port"), Some(&Value::from("3000")));
        assert_eq!(tree.pointer("db.pool"), Some(&Value::from(10)));
        assert_eq!(tree.pointer("db.legacy"), None);
        assert_eq!(tree.pointer("version"), Some(&Value::from(0)));
    }

    #[test]
    fn test_config_schema_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_ENV=test\nDB_PORT=5433\n").unwrap();
        let mut o = options(&path);
        o.schema = json!({"properties": {"db": {"properties": {"port": {"type": "string"}}}}});
        let assembler = Assembler::new(o, registry()).unwrap();
        let mut state = CycleState::new(Box::new(EnvVars::new()), assembler.options());
        let err = assembler.initial(&mut state).unwrap_err();
        assert_eq!(err.phase(), Some(layercfg_types::ValidationPhase::ConfigValues));
        assert!(err.to_string().contains("/db/port"));
    }
}
