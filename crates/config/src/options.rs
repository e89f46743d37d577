use crate::schema::issue;
use layercfg_types::{LayercfgError, Result, SchemaIssue, ValidationPhase};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

/// Shape of serialized [`Options`]; unknown keys are rejected by serde.
static PARAMS_SCHEMA: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let non_empty = json!({ "type": "string", "minLength": 1 });
    let names = json!({ "type": "array", "items": { "type": "string" } });
    jsonschema::validator_for(&json!({
        "type": "object",
        "properties": {
            "environments": {
                "type": "array",
                "minItems": 1,
                "items": { "type": "string", "pattern": "^[a-z0-9_:]{1,}$" }
            },
            "readonly": { "type": "boolean" },
            "schema": { "type": "object" },
            "path": { "type": "string" },
            "env": {
                "type": "object",
                "properties": {
                    "path": { "type": ["string", "null"] },
                    "watch": { "type": "boolean" },
                    "schema": { "type": "object" },
                    "overridable": names,
                    "not_overridable_on_watch": names,
                    "selector": non_empty,
                    "mode_variable": { "type": ["string", "null"], "minLength": 1 }
                }
            }
        }
    }))
    .expect("options schema is valid")
});

fn default_environments() -> Vec<String> {
    ["local", "development", "staging", "production", "test"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_schema() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_layer_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_selector() -> String {
    "APP_ENV".to_string()
}

/// How the environment file is read and applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvOptions {
    /// Environment file (defaults to `.env` in the working directory).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Reload when the environment file changes.
    #[serde(default)]
    pub watch: bool,
    /// JSON Schema for the parsed `KEY=VALUE` map.
    #[serde(default = "default_schema")]
    pub schema: serde_json::Value,
    /// Keys the file may write even when already set at initial load.
    #[serde(default)]
    pub overridable: Vec<String>,
    /// Keys that reloads never rewrite. The selector is always included.
    #[serde(default)]
    pub not_overridable_on_watch: Vec<String>,
    /// Variable naming the active environment (defaults to `APP_ENV`).
    #[serde(default = "default_selector")]
    pub selector: String,
    /// Optional runtime-mode variable checked against the same allow-list.
    #[serde(default)]
    pub mode_variable: Option<String>,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            path: None,
            watch: false,
            schema: default_schema(),
            overridable: Vec::new(),
            not_overridable_on_watch: Vec::new(),
            selector: default_selector(),
            mode_variable: None,
        }
    }
}

/// Loader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Allowed environment names.
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,
    /// Serve a read-only view from `config()` (defaults to `true`).
    #[serde(default = "default_true")]
    pub readonly: bool,
    /// JSON Schema for the assembled configuration.
    #[serde(default = "default_schema")]
    pub schema: serde_json::Value,
    /// Directory holding the layer files.
    #[serde(default = "default_layer_dir")]
    pub path: PathBuf,
    #[serde(default)]
    pub env: EnvOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            environments: default_environments(),
            readonly: true,
            schema: default_schema(),
            path: default_layer_dir(),
            env: EnvOptions::default(),
        }
    }
}

impl Options {
    /// Parses options from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::Options`] if the YAML is invalid or extraction fails.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Options::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| LayercfgError::Options(e.to_string()))
    }

    /// Loads options from a YAML or JSON file, merged with defaults and with
    /// `LAYERCFG_`-prefixed environment variables (`__` separates nesting,
    /// e.g. `LAYERCFG_ENV__WATCH=true`).
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::Options`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format as _, Json, Serialized, Yaml},
        };
        let figment = Figment::from(Serialized::defaults(Options::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };
        figment
            .merge(Env::prefixed("LAYERCFG_").split("__"))
            .extract()
            .map_err(|e| LayercfgError::Options(e.to_string()))
    }

    /// The environment file to read.
    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.env.path.clone().unwrap_or_else(|| PathBuf::from(".env"))
    }

    /// Checks the options and returns them with the selector added to the
    /// keys that reloads never rewrite.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationPhase::Params`] validation error listing every
    /// problem found.
    pub fn validated(mut self) -> Result<Self> {
        let params = serde_json::to_value(&self)?;
        let issues: Vec<SchemaIssue> = PARAMS_SCHEMA.iter_errors(&params).map(|e| issue(&e)).collect();
        if !issues.is_empty() {
            return Err(LayercfgError::Validation {
                phase: ValidationPhase::Params,
                issues,
            });
        }

        if !self.env.not_overridable_on_watch.contains(&self.env.selector) {
            self.env
                .not_overridable_on_watch
                .push(self.env.selector.clone());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let o = Options::default();
        assert_eq!(
            o.environments,
            ["local", "development", "staging", "production", "test"]
        );
        assert!(o.readonly);
        assert_eq!(o.schema, json!({}));
        assert_eq!(o.path, PathBuf::from("."));
        assert!(!o.env.watch);
        assert_eq!(o.env.selector, "APP_ENV");
        assert_eq!(o.env_file(), PathBuf::from(".env"));
    }

    #[test]
    fn test_from_yaml_overrides_and_defaults() {
        let o = Options::from_yaml(
            r"
environments: [local, test]
readonly: false
env:
  watch: true
  overridable: [MC_VERSION]
",
        )
        .unwrap();
        assert_eq!(o.environments, ["local", "test"]);
        assert!(!o.readonly);
        assert!(o.env.watch);
        assert_eq!(o.env.overridable, ["MC_VERSION"]);
        assert_eq!(o.env.selector, "APP_ENV"); // default preserved
    }

    #[test]
    fn test_from_yaml_rejects_unknown_fields() {
        let err = Options::from_yaml("unknown: 1").unwrap_err();
        assert!(matches!(err, LayercfgError::Options(_)));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layercfg.json");
        std::fs::write(&path, r#"{"path": "config", "env": {"selector": "RUN_ENV"}}"#).unwrap();
        let o = Options::from_file(&path).unwrap();
        assert_eq!(o.path, PathBuf::from("config"));
        assert_eq!(o.env.selector, "RUN_ENV");
    }

    #[test]
    fn test_validated_adds_selector_once() {
        let o = Options::default().validated().unwrap();
        assert_eq!(o.env.not_overridable_on_watch, ["APP_ENV"]);
        let again = o.validated().unwrap();
        assert_eq!(again.env.not_overridable_on_watch, ["APP_ENV"]);
    }

    #[test]
    fn test_validated_reports_every_problem() {
        let mut o = Options::default();
        o.environments = vec!["Prod".into(), "ok".into(), "has space".into()];
        o.schema = json!([]);
        o.env.selector = String::new();
        let err = o.validated().unwrap_err();
        match &err {
            LayercfgError::Validation { phase, issues } => {
                assert_eq!(*phase, ValidationPhase::Params);
                let mut paths: Vec<_> = issues.iter().map(|i| i.instance_path.as_str()).collect();
                paths.sort_unstable();
                assert_eq!(
                    paths,
                    ["/env/selector", "/environments/0", "/environments/2", "/schema"]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().starts_with("Invalid params. "));
    }

    #[test]
    fn test_validated_rejects_empty_environments() {
        let mut o = Options::default();
        o.environments.clear();
        match o.validated() {
            Err(LayercfgError::Validation { issues, .. }) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].instance_path, "/environments");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validated_rejects_empty_mode_variable() {
        let mut o = Options::default();
        o.env.mode_variable = Some(String::new());
        o.env.schema = json!("not an object");
        let err = o.validated().unwrap_err();
        match &err {
            LayercfgError::Validation { issues, .. } => {
                let mut paths: Vec<_> = issues.iter().map(|i| i.instance_path.as_str()).collect();
                paths.sort_unstable();
                assert_eq!(paths, ["/env/mode_variable", "/env/schema"]);
                assert!(issues.iter().all(|i| i.params["schemaPath"].is_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
