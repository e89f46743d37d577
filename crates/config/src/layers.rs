//! Sources of configuration layers.
//!
//! Every build reads the `global` layer plus the layer named after the active
//! environment. A layer is produced fresh on each build from the current
//! runtime environment.

use crate::env::RuntimeEnvironment;
use layercfg_types::{LayercfgError, Result, Value};
use regex::{Captures, Regex};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::LazyLock,
};

/// Name of the layer merged under every environment layer.
pub const GLOBAL_LAYER: &str = "global";

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Produces named configuration layers.
pub trait LayerSource: Send + Sync {
    /// Fails if the layer cannot be produced at all.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::Layer`].
    fn verify(&self, name: &str) -> Result<()>;

    /// Builds the layer from the current runtime environment. The result is
    /// always a mapping.
    ///
    /// # Errors
    ///
    /// Returns [`LayercfgError::Layer`].
    fn build(&self, name: &str, env: &dyn RuntimeEnvironment) -> Result<Value>;
}

type LayerFn = dyn Fn(&dyn RuntimeEnvironment) -> Value + Send + Sync;

/// Layers registered as closures.
#[derive(Default)]
pub struct LayerRegistry {
    layers: HashMap<String, Box<LayerFn>>,
}

impl LayerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn layer<F>(mut self, name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&dyn RuntimeEnvironment) -> Value + Send + Sync + 'static,
    {
        self.layers.insert(name.into(), Box::new(build));
        self
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.layers.keys().collect();
        names.sort();
        f.debug_struct("LayerRegistry").field("layers", &names).finish()
    }
}

impl LayerSource for LayerRegistry {
    fn verify(&self, name: &str) -> Result<()> {
        if self.layers.contains_key(name) {
            Ok(())
        } else {
            Err(LayercfgError::Layer {
                name: name.to_string(),
                reason: "is not registered".into(),
            })
        }
    }

    fn build(&self, name: &str, env: &dyn RuntimeEnvironment) -> Result<Value> {
        self.verify(name)?;
        let layer = self.layers.get(name).map(|build| build(env)).unwrap_or_default();
        ensure_mapping(name, layer)
    }
}

/// Layers stored as `<name>.yaml`, `<name>.yml` or `<name>.json` files.
///
/// String values of the form `${VAR}` are replaced by the variable's value,
/// typed as an integer, float or boolean when it parses as one, or `null`
/// when unset. Placeholders embedded in longer strings are substituted
/// textually, unset variables becoming empty.
#[derive(Debug, Clone)]
pub struct LayerDirectory {
    dir: PathBuf,
}

impl LayerDirectory {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
            .ok_or_else(|| LayercfgError::Layer {
                name: name.to_string(),
                reason: format!("has no file in {}", self.dir.display()),
            })
    }
}

impl LayerSource for LayerDirectory {
    fn verify(&self, name: &str) -> Result<()> {
        self.resolve(name).map(|_| ())
    }

    fn build(&self, name: &str, env: &dyn RuntimeEnvironment) -> Result<Value> {
        let path = self.resolve(name)?;
        let layer_error = |reason: String| LayercfgError::Layer {
            name: name.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| layer_error(format!("cannot read {}: {e}", path.display())))?;
        // Both parsers keep document key order.
        let raw: serde_json::Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| layer_error(e.to_string()))?,
            _ => serde_yaml::from_str(&text).map_err(|e| layer_error(e.to_string()))?,
        };
        ensure_mapping(name, interpolate(Value::from(raw), env))
    }
}

fn ensure_mapping(name: &str, layer: Value) -> Result<Value> {
    if layer.is_object() {
        Ok(layer)
    } else {
        Err(LayercfgError::Layer {
            name: name.to_string(),
            reason: "did not produce a mapping".into(),
        })
    }
}

fn interpolate(value: Value, env: &dyn RuntimeEnvironment) -> Value {
    match value {
        Value::String(s) => interpolate_str(&s, env),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| interpolate(v, env)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| (key, interpolate(v, env)))
                .collect(),
        ),
        other => other,
    }
}

fn interpolate_str(s: &str, env: &dyn RuntimeEnvironment) -> Value {
    let Some(caps) = PLACEHOLDER.captures(s) else {
        return Value::String(s.to_string());
    };
    if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len()) {
        return env.get(&caps[1]).map_or(Value::Null, |raw| typed_scalar(&raw));
    }
    Value::String(
        PLACEHOLDER
            .replace_all(s, |caps: &Captures<'_>| env.get(&caps[1]).unwrap_or_default())
            .into_owned(),
    )
}

fn typed_scalar(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvVars;
    use serde_json::json;

    #[test]
    fn test_registry_builds_from_env() {
        let registry = LayerRegistry::new().layer(GLOBAL_LAYER, |env| {
            Value::from(json!({"version": env.get("MC_VERSION")}))
        });
        let env = EnvVars::new().with("MC_VERSION", "3");
        let layer = registry.build(GLOBAL_LAYER, &env).unwrap();
        assert_eq!(layer, Value::from(json!({"version": "3"})));
    }

    #[test]
    fn test_registry_unknown_layer() {
        let registry = LayerRegistry::new();
        let err = registry.verify("staging").unwrap_err();
        assert_eq!(err.to_string(), "layer `staging` is not registered");
    }

    #[test]
    fn test_registry_rejects_non_mapping() {
        let registry = LayerRegistry::new().layer("test", |_| Value::from(1));
        assert!(matches!(
            registry.build("test", &EnvVars::new()),
            Err(LayercfgError::Layer { .. })
        ));
    }

    #[test]
    fn test_directory_yaml_with_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("global.yaml"),
            r#"
version: "${MC_VERSION}"
db:
  port: "${DB_PORT}"
  url: "postgres://${DB_HOST}:${DB_PORT}/app"
  ssl: "${DB_SSL}"
  password: "${DB_PASSWORD}"
  ratio: "${RATIO}"
"#,
        )
        .unwrap();
        let env = EnvVars::new()
            .with("MC_VERSION", "1")
            .with("DB_PORT", "5432")
            .with("DB_HOST", "localhost")
            .with("DB_SSL", "true")
            .with("RATIO", "0.5");
        let source = LayerDirectory::new(dir.path());
        source.verify(GLOBAL_LAYER).unwrap();
        let layer = source.build(GLOBAL_LAYER, &env).unwrap();
        assert_eq!(layer.pointer("version"), Some(&Value::from(1)));
        assert_eq!(layer.pointer("db.port"), Some(&Value::from(5432)));
        assert_eq!(
            layer.pointer("db.url"),
            Some(&Value::from("postgres://localhost:5432/app"))
        );
        assert_eq!(layer.pointer("db.ssl"), Some(&Value::Bool(true)));
        assert_eq!(layer.pointer("db.password"), Some(&Value::Null));
        assert_eq!(layer.pointer("db.ratio"), Some(&Value::from(0.5)));
    }

    #[test]
    fn test_directory_json_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.json"), r#"{"db": {"port": 5433}}"#).unwrap();
        let layer = LayerDirectory::new(dir.path())
            .build("test", &EnvVars::new())
            .unwrap();
        assert_eq!(layer.pointer("db.port"), Some(&Value::from(5433)));
    }

    #[test]
    fn test_directory_keeps_document_key_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("global.yaml"),
            "zeta: \"${Z}\"\nalpha: \"${A}\"\nmid:\n  y: 1\n  b: 2\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("test.json"), r#"{"zeta": 1, "alpha": 2}"#).unwrap();
        let env = EnvVars::new().with("Z", "1").with("A", "2");
        let source = LayerDirectory::new(dir.path());

        let layer = source.build(GLOBAL_LAYER, &env).unwrap();
        let root = layer.as_object().unwrap();
        let keys: Vec<_> = root.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        let nested: Vec<_> = root["mid"].as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(nested, ["y", "b"]);

        let layer = source.build("test", &env).unwrap();
        let keys: Vec<_> = layer.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[test]
    fn test_directory_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.yaml"), "db: [unclosed\n").unwrap();
        let err = LayerDirectory::new(dir.path())
            .build("test", &EnvVars::new())
            .unwrap_err();
        assert!(matches!(err, LayercfgError::Layer { ref name, .. } if name == "test"));
    }

    #[test]
    fn test_directory_missing_layer() {
        let dir = tempfile::tempdir().unwrap();
        let err = LayerDirectory::new(dir.path()).verify("production").unwrap_err();
        assert!(matches!(err, LayercfgError::Layer { ref name, .. } if name == "production"));
    }

    #[test]
    fn test_typed_scalar() {
        assert_eq!(typed_scalar("42"), Value::from(42));
        assert_eq!(typed_scalar("-1.5"), Value::from(-1.5));
        assert_eq!(typed_scalar("false"), Value::Bool(false));
        assert_eq!(typed_scalar("inf"), Value::from("inf"));
        assert_eq!(typed_scalar("abc"), Value::from("abc"));
    }
}
