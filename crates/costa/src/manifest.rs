//! Plugin manifests and validated plugin packages.
//!
//! A manifest is the plugin's `package.json`. It becomes a [`PluginPackage`]
//! once it has been validated and paired with its source and install
//! targets by [`validate_and_assign`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::{CostaError, CostaResult};
use crate::layout::InstallLayout;
use crate::npm::NpmPackageNameSchema;
use crate::source::PluginSource;

/// Requirement values starting with this prefix are passed to pip verbatim.
const GIT_REQUIREMENT_PREFIX: &str = "git+https://";

/// How strictly manifests are checked for plugin metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject manifests without a truthy `pipcook` field.
    #[default]
    Strict,
    /// Log a warning and accept them.
    Lenient,
}

/// Interpreter dependencies declared under `conda` in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CondaConfig {
    /// Package name to version spec (`*`, an exact version, or a git URL),
    /// in declaration order.
    #[serde(default)]
    pub dependencies: Map<String, Value>,
}

impl CondaConfig {
    /// One pip requirement line per dependency, in declaration order.
    #[must_use]
    pub fn requirements(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(|(name, spec)| match spec {
                Value::String(spec) => requirement_line(name, spec),
                other => requirement_line(name, &other.to_string()),
            })
            .collect()
    }
}

/// Derive a pip requirement line from a `conda.dependencies` entry.
#[must_use]
pub fn requirement_line(name: &str, spec: &str) -> String {
    if spec == "*" {
        name.to_string()
    } else if spec.starts_with(GIT_REQUIREMENT_PREFIX) {
        spec.to_string()
    } else {
        format!("{name}=={spec}")
    }
}

/// A plugin's `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Package version.
    #[serde(default)]
    pub version: String,
    /// Entry point relative to the package root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Module dependencies, handed to npm as-is.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Interpreter dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conda: Option<CondaConfig>,
    /// Plugin metadata; its presence marks the package as a plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipcook: Option<Value>,
    /// Every other field, preserved for consumers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginManifest {
    /// Parse a manifest from raw `package.json` bytes.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Json` if the bytes are not a manifest object.
    pub fn from_slice(bytes: &[u8], context: &str) -> CostaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CostaError::json(context, e))
    }

    /// Parse a manifest from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Json` if the value is not a manifest object.
    pub fn from_value(value: &Value, context: &str) -> CostaResult<Self> {
        Self::deserialize(value).map_err(|e| CostaError::json(context, e))
    }

    /// `name@version`, the key used for install directories.
    #[must_use]
    pub fn plugin_id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Whether the manifest carries plugin metadata.
    #[must_use]
    pub fn is_plugin(&self) -> bool {
        self.pipcook.as_ref().is_some_and(is_truthy)
    }
}

/// Where an installed plugin lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTarget {
    /// `site-packages` of the plugin's interpreter environment.
    pub python_path: PathBuf,
    /// Module directory under `node_modules`.
    pub dest_path: PathBuf,
}

/// A validated manifest with its origin and install targets.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginPackage {
    /// The fetched manifest.
    pub manifest: PluginManifest,
    /// Where it was fetched from.
    pub source: PluginSource,
    /// Where it installs to.
    pub target: PluginTarget,
}

impl PluginPackage {
    /// `name@version`.
    #[must_use]
    pub fn plugin_id(&self) -> String {
        self.manifest.plugin_id()
    }

    /// Pip requirement lines; empty when no interpreter dependencies are declared.
    #[must_use]
    pub fn requirements(&self) -> Vec<String> {
        self.manifest
            .conda
            .as_ref()
            .map(CondaConfig::requirements)
            .unwrap_or_default()
    }

    /// Render the manifest with `pipcook.source` and `pipcook.target` injected.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut doc = match serde_json::to_value(&self.manifest) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let source = json!({
            "from": self.source.protocol.as_str(),
            "name": self.source.name,
            "uri": self.source.uri,
            "url": self.source.url.as_ref().map(url::Url::as_str),
            "schema": self.source.schema,
        });
        let target = json!({
            "PYTHONPATH": self.target.python_path.display().to_string(),
            "DESTPATH": self.target.dest_path.display().to_string(),
        });

        let pipcook = doc
            .entry("pipcook")
            .or_insert_with(|| Value::Object(Map::new()));
        if !pipcook.is_object() {
            *pipcook = Value::Object(Map::new());
        }
        if let Value::Object(meta) = pipcook {
            meta.insert("source".into(), source);
            meta.insert("target".into(), target);
        }
        Value::Object(doc)
    }
}

/// Check plugin metadata and compute install targets.
///
/// # Errors
///
/// Returns `CostaError::Validation` when name or version is missing, or when
/// `pipcook` is not truthy and `mode` is [`ValidationMode::Strict`].
pub fn validate_and_assign(
    manifest: PluginManifest,
    source: PluginSource,
    layout: &InstallLayout,
    mode: ValidationMode,
) -> CostaResult<PluginPackage> {
    let package = if manifest.name.is_empty() {
        "<unknown>".to_string()
    } else {
        manifest.name.clone()
    };

    if manifest.name.is_empty() || manifest.version.is_empty() {
        return Err(CostaError::Validation {
            package,
            reason: "manifest must declare both name and version".into(),
        });
    }

    check_plugin_identity(&manifest.name, &manifest.version)?;

    if !manifest.is_plugin() {
        match mode {
            ValidationMode::Strict => {
                return Err(CostaError::Validation {
                    package,
                    reason: "missing pipcook plugin metadata".into(),
                });
            },
            ValidationMode::Lenient => {
                warn!(
                    package = %package,
                    "package has no pipcook metadata, accepting in lenient mode"
                );
            },
        }
    }

    let plugin_id = manifest.plugin_id();
    let target = PluginTarget {
        python_path: layout.python_path(&plugin_id),
        dest_path: layout.module_dir(&plugin_id),
    };
    Ok(PluginPackage {
        manifest,
        source,
        target,
    })
}

/// Reject names and versions that cannot safely become a `name@version`
/// directory under the install root.
///
/// # Errors
///
/// Returns `CostaError::Validation` if the name breaks npm naming rules or
/// the version is empty or contains a path separator or `..`.
pub(crate) fn check_plugin_identity(name: &str, version: &str) -> CostaResult<()> {
    let invalid = |reason: String| CostaError::Validation {
        package: name.to_string(),
        reason,
    };

    let schema = NpmPackageNameSchema::parse(name)
        .map_err(|e| invalid(format!("invalid package name: {e}")))?;
    if schema.version.is_some() || schema.package_name() != name {
        return Err(invalid(format!("invalid package name '{name}'")));
    }

    if version.is_empty()
        || version.contains(['/', '\\'])
        || version.contains("..")
        || version.chars().any(char::is_control)
    {
        return Err(invalid(format!("invalid version '{version}'")));
    }
    Ok(())
}

/// JavaScript truthiness of a JSON value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
