//! Unified error type for the layercfg workspace.

use serde::Serialize;
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Which validation step rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    /// The options handed to the loader.
    Params,
    /// The user-supplied schema for the environment file.
    EnvSchema,
    /// The user-supplied schema for the assembled configuration.
    ConfigSchema,
    /// The parsed environment file.
    EnvValues,
    /// The assembled configuration tree.
    ConfigValues,
}

impl ValidationPhase {
    /// Message prefix used when reporting failures of this phase.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Params => "Invalid params. ",
            Self::EnvSchema => "Invalid params.env.schema. ",
            Self::ConfigSchema => "Invalid params.schema. ",
            Self::EnvValues => "Invalid environment variable(s): ",
            Self::ConfigValues => "Invalid config. ",
        }
    }
}

/// One rejected location reported by a validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaIssue {
    /// JSON pointer into the validated document, empty for the root.
    pub instance_path: String,
    pub message: String,
    /// Extra keyword-specific detail.
    pub params: serde_json::Value,
}

impl SchemaIssue {
    /// Renders the issue the way validation errors are joined for display.
    ///
    /// Environment issues drop the leading `/` so the variable name reads
    /// on its own.
    fn render(&self, phase: ValidationPhase) -> String {
        if self.instance_path.is_empty() {
            return self.message.clone();
        }
        let location = if phase == ValidationPhase::EnvValues {
            self.instance_path.trim_start_matches('/')
        } else {
            self.instance_path.as_str()
        };
        let mut out = if phase == ValidationPhase::EnvValues {
            format!("{location}, {}", self.message)
        } else {
            format!("path: {location}, {}", self.message)
        };
        if !self.params.is_null() {
            out.push_str(": ");
            out.push_str(&self.params.to_string());
        }
        out
    }
}

fn render_issues(phase: ValidationPhase, issues: &[SchemaIssue]) -> String {
    let body = issues
        .iter()
        .map(|issue| issue.render(phase))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{body}", phase.prefix())
}

/// A mutation kind rejected by a read-only view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// Assigning to an existing or new key.
    Set,
    /// Adding a property with explicit intent to create it.
    Define,
    /// Removing a key.
    Delete,
    /// Sealing a node against new keys.
    PreventExtensions,
    /// Swapping a node's whole contents.
    Replace,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::Define => "define",
            Self::Delete => "delete",
            Self::PreventExtensions => "prevent-extensions",
            Self::Replace => "replace",
        })
    }
}

/// Enumerates all error kinds that can occur across layercfg crates.
#[derive(Debug, Error)]
pub enum LayercfgError {
    /// A schema or a document failed validation.
    #[error("{}", render_issues(*phase, issues))]
    Validation {
        phase: ValidationPhase,
        issues: Vec<SchemaIssue>,
    },

    /// The environment selector holds a name outside the allow-list.
    #[error(
        "Invalid environment variable: {variable}, should be equal to one of the allowed values: {{\"allowedValues\":{}}}",
        serde_json::to_string(allowed).unwrap_or_default()
    )]
    InvalidEnvironment {
        variable: String,
        value: Option<String>,
        allowed: Vec<String>,
    },

    /// A required file is missing or cannot be read.
    #[error("{} {}", path.display(), if *missing { "does not exist." } else { "is not readable." })]
    FileAccess { path: PathBuf, missing: bool },

    /// The environment file could not be parsed.
    #[error("failed to parse {}: {message}", path.display())]
    EnvFile { path: PathBuf, message: String },

    /// A configuration layer is missing or produced something unusable.
    #[error("layer `{name}` {reason}")]
    Layer { name: String, reason: String },

    /// A write was attempted through a read-only view.
    #[error("Assignment to read-only properties is not allowed.")]
    ImmutableWrite { op: WriteOp },

    /// The file watcher failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// Loading the loader options themselves failed.
    #[error("options error: {0}")]
    Options(String),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error outside the cases above.
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LayercfgError {
    /// Builds a validation error with a single root-level message.
    pub fn validation(phase: ValidationPhase, message: impl Into<String>) -> Self {
        Self::Validation {
            phase,
            issues: vec![SchemaIssue {
                instance_path: String::new(),
                message: message.into(),
                params: serde_json::Value::Null,
            }],
        }
    }

    /// Returns the validation phase, if this is a validation error.
    #[must_use]
    pub fn phase(&self) -> Option<ValidationPhase> {
        match self {
            Self::Validation { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LayercfgError>;
