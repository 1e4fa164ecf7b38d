//! Serde types for npm registry JSON responses and version selection.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{CostaError, CostaResult};

/// Dist-tag that must exist when explicitly requested.
pub const BETA_TAG: &str = "beta";

/// Dist-tag used when no version is requested.
pub const LATEST_TAG: &str = "latest";

/// Top-level npm registry response for a package.
#[derive(Debug, Clone, Deserialize)]
pub struct NpmPackageMetadata {
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Mapping of dist-tags to version strings (e.g. `{"latest": "1.0.0"}`).
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    /// Per-version manifests, keyed by version string.
    #[serde(default)]
    pub versions: HashMap<String, serde_json::Value>,
}

impl NpmPackageMetadata {
    /// Parse registry metadata from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Json` if the value does not have the registry shape.
    pub fn from_value(value: &serde_json::Value) -> CostaResult<Self> {
        Self::deserialize(value).map_err(|e| CostaError::json("registry metadata", e))
    }

    /// Pick the manifest for `requested` (a version or dist-tag).
    ///
    /// Rules, in order: a missing `beta` tag is an error; `beta` and `latest`
    /// go through dist-tags; any other string is an exact version; no request
    /// means `latest`. Version ranges are not interpreted.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::SourceResolution` when the tag or version does not exist.
    pub fn select(&self, requested: Option<&str>) -> CostaResult<&serde_json::Value> {
        if requested == Some(BETA_TAG) && !self.dist_tags.contains_key(BETA_TAG) {
            return Err(CostaError::resolution(
                &self.name,
                format!("no {BETA_TAG} version of {} is published", self.name),
            ));
        }

        let version = match requested {
            Some(tag @ (BETA_TAG | LATEST_TAG)) => self.tagged(tag)?,
            Some(version) => version,
            None => self.tagged(LATEST_TAG)?,
        };

        self.versions.get(version).ok_or_else(|| {
            CostaError::resolution(
                &self.name,
                format!("version {version} of {} not found in registry", self.name),
            )
        })
    }

    fn tagged(&self, tag: &str) -> CostaResult<&str> {
        self.dist_tags.get(tag).map(String::as_str).ok_or_else(|| {
            CostaError::resolution(&self.name, format!("dist-tag {tag} not found"))
        })
    }
}
