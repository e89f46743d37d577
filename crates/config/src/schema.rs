//! JSON Schema checks for the environment file and the assembled tree.

use crate::options::Options;
use layercfg_merge::merge;
use layercfg_types::{LayercfgError, Result, SchemaIssue, ValidationPhase, Value};
use regex::Regex;
use serde_json::json;

/// A compiled schema whose failures are reported under one phase.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
    schema: serde_json::Value,
    phase: ValidationPhase,
}

impl SchemaValidator {
    /// Checks `schema` against its meta-schema and compiles it.
    ///
    /// # Errors
    ///
    /// Returns a validation error under `schema_phase` if the schema is invalid.
    pub fn compile(
        schema: &serde_json::Value,
        schema_phase: ValidationPhase,
        values_phase: ValidationPhase,
    ) -> Result<Self> {
        meta_check(schema, schema_phase)?;
        let validator = jsonschema::validator_for(schema).map_err(|e| LayercfgError::Validation {
            phase: schema_phase,
            issues: vec![issue(&e)],
        })?;
        Ok(Self {
            validator,
            schema: schema.clone(),
            phase: values_phase,
        })
    }

    /// Fills absent properties from their `default` and drops properties an
    /// `additionalProperties: false` object does not declare, at every level
    /// the schema describes.
    pub fn normalize(&self, value: &mut Value) {
        normalize(&self.schema, value);
    }

    /// Validates `instance`, collecting every failure.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing each failing location.
    pub fn validate(&self, instance: &serde_json::Value) -> Result<()> {
        let issues: Vec<SchemaIssue> = self.validator.iter_errors(instance).map(|e| issue(&e)).collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(LayercfgError::Validation {
                phase: self.phase,
                issues,
            })
        }
    }
}

fn meta_check(schema: &serde_json::Value, phase: ValidationPhase) -> Result<()> {
    jsonschema::meta::validate(schema).map_err(|e| LayercfgError::Validation {
        phase,
        issues: vec![issue(&e)],
    })
}

fn normalize(schema: &serde_json::Value, value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    let properties = schema.get("properties").and_then(serde_json::Value::as_object);
    if schema.get("additionalProperties") == Some(&serde_json::Value::Bool(false)) {
        let patterns: Vec<Regex> = schema
            .get("patternProperties")
            .and_then(serde_json::Value::as_object)
            .into_iter()
            .flat_map(|patterns| patterns.keys())
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        object.retain(|key, _| {
            properties.is_some_and(|p| p.contains_key(key))
                || patterns.iter().any(|pattern| pattern.is_match(key))
        });
    }
    for (key, property) in properties.into_iter().flatten() {
        if !object.contains_key(key)
            && let Some(default) = property.get("default")
        {
            object.insert(key.clone(), Value::from(default.clone()));
        }
        if let Some(child) = object.get_mut(key) {
            normalize(property, child);
        }
    }
}

pub(crate) fn issue(error: &jsonschema::ValidationError<'_>) -> SchemaIssue {
    SchemaIssue {
        instance_path: error.instance_path.to_string(),
        message: error.to_string(),
        params: json!({ "schemaPath": error.schema_path.to_string() }),
    }
}

/// Merges `extra` into the user schema; `required` lists are unioned.
fn augment(user: &serde_json::Value, extra: &serde_json::Value) -> serde_json::Value {
    let mut required: Vec<serde_json::Value> = Vec::new();
    for list in [&user["required"], &extra["required"]] {
        for name in list.as_array().into_iter().flatten() {
            if !required.contains(name) {
                required.push(name.clone());
            }
        }
    }
    let mut schema = merge(
        Some(&Value::from(user.clone())),
        Some(&Value::from(extra.clone())),
    )
    .to_json();
    if let Some(object) = schema.as_object_mut() {
        object.insert("required".into(), serde_json::Value::Array(required));
    }
    schema
}

/// The environment-file schema: the user's, plus a required selector whose
/// value must be one of the allowed environments.
#[must_use]
pub fn env_schema(options: &Options) -> serde_json::Value {
    let selector = &options.env.selector;
    augment(
        &options.env.schema,
        &json!({
            "type": "object",
            "required": [selector],
            "additionalProperties": true,
            "properties": {
                selector: { "enum": options.environments }
            }
        }),
    )
}

/// The configuration schema: the user's, plus the injected `env` and
/// `environments` properties.
#[must_use]
pub fn config_schema(options: &Options) -> serde_json::Value {
    augment(
        &options.schema,
        &json!({
            "type": "object",
            "required": ["environments", "env"],
            "properties": {
                "environments": {
                    "type": "object",
                    "propertyNames": { "type": "string" },
                    "additionalProperties": { "type": "string", "minLength": 1 }
                },
                "env": { "enum": options.environments }
            }
        }),
    )
}

/// Both compiled schemas for one loader.
pub struct Validators {
    pub env: SchemaValidator,
    pub config: SchemaValidator,
}

impl Validators {
    /// # Errors
    ///
    /// Returns a validation error if either user schema is invalid.
    pub fn from_options(options: &Options) -> Result<Self> {
        meta_check(&options.env.schema, ValidationPhase::EnvSchema)?;
        meta_check(&options.schema, ValidationPhase::ConfigSchema)?;
        Ok(Self {
            env: SchemaValidator::compile(
                &env_schema(options),
                ValidationPhase::EnvSchema,
                ValidationPhase::EnvValues,
            )?,
            config: SchemaValidator::compile(
                &config_schema(options),
                ValidationPhase::ConfigSchema,
                ValidationPhase::ConfigValues,
            )?,
        })
    }
}
