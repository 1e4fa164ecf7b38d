//! Runtime configuration.
//!
//! Options come from three layers, later ones winning: built-in defaults
//! rooted at `~/.pipcook`, an optional TOML file, and `COSTA_*` environment
//! variables.
//!
//! ```toml
//! install_dir = "/srv/pipcook/plugins"
//! npm_registry_prefix = "https://registry.npmmirror.com"
//! validation = "lenient"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CostaError, CostaResult};
use crate::http::DEFAULT_CACHE_CAPACITY;
use crate::manifest::ValidationMode;
use crate::npm::DEFAULT_REGISTRY;

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Name of the default home directory.
const HOME_DIR_NAME: &str = ".pipcook";

/// Overrides [`RuntimeOptions::install_dir`].
pub const ENV_INSTALL_DIR: &str = "COSTA_INSTALL_DIR";
/// Overrides [`RuntimeOptions::dataset_dir`].
pub const ENV_DATASET_DIR: &str = "COSTA_DATASET_DIR";
/// Overrides [`RuntimeOptions::component_dir`].
pub const ENV_COMPONENT_DIR: &str = "COSTA_COMPONENT_DIR";
/// Overrides [`RuntimeOptions::npm_registry_prefix`].
pub const ENV_NPM_REGISTRY: &str = "COSTA_NPM_REGISTRY";
/// Overrides [`RuntimeOptions::toolchain_root`].
pub const ENV_TOOLCHAIN_ROOT: &str = "COSTA_TOOLCHAIN_ROOT";

/// Settings for a [`crate::CostaRuntime`]. Immutable once the runtime is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Root of installed plugins (`node_modules`, `conda_envs`, ...).
    pub install_dir: PathBuf,
    /// Dataset storage.
    pub dataset_dir: PathBuf,
    /// Pipeline component storage.
    pub component_dir: PathBuf,
    /// npm registry URL prefix.
    pub npm_registry_prefix: String,
    /// Number of registry responses kept for revalidation.
    pub http_cache_capacity: usize,
    /// Manifest validation strictness.
    pub validation: ValidationMode,
    /// Explicit interpreter toolchain root, checked before any search.
    pub toolchain_root: Option<PathBuf>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let home = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
        Self::with_root(home.join(HOME_DIR_NAME))
    }
}

impl RuntimeOptions {
    /// Defaults with all three directories under `root`.
    #[must_use]
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            install_dir: root.join("plugins"),
            dataset_dir: root.join("datasets"),
            component_dir: root.join("components"),
            npm_registry_prefix: DEFAULT_REGISTRY.to_string(),
            http_cache_capacity: DEFAULT_CACHE_CAPACITY,
            validation: ValidationMode::default(),
            toolchain_root: None,
        }
    }

    /// Set the npm registry prefix.
    #[must_use]
    pub fn with_registry(mut self, prefix: impl Into<String>) -> Self {
        self.npm_registry_prefix = prefix.into();
        self
    }

    /// Set the validation mode.
    #[must_use]
    pub fn with_validation(mut self, mode: ValidationMode) -> Self {
        self.validation = mode;
        self
    }

    /// Set an explicit toolchain root.
    #[must_use]
    pub fn with_toolchain_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.toolchain_root = Some(root.into());
        self
    }

    /// Set the registry cache capacity.
    #[must_use]
    pub fn with_http_cache_capacity(mut self, capacity: usize) -> Self {
        self.http_cache_capacity = capacity;
        self
    }

    /// Load options from a TOML file, then apply environment overrides.
    /// Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Config` if the file cannot be read, is too large,
    /// or does not parse.
    pub fn load(path: &Path) -> CostaResult<Self> {
        let config_err = |message: String| CostaError::Config {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("failed to read config: {e}")))?;
        if u64::try_from(content.len()).unwrap_or(u64::MAX) > MAX_CONFIG_FILE_SIZE {
            return Err(config_err(format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            )));
        }

        let options: Self =
            toml::from_str(&content).map_err(|e| config_err(format!("invalid config: {e}")))?;
        debug!(path = %path.display(), "loaded runtime config");
        Ok(options.apply_env_overrides())
    }

    /// Apply `COSTA_*` variables from the process environment.
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Empty values are ignored.
    #[must_use]
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_INSTALL_DIR) {
            self.install_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_DATASET_DIR) {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_COMPONENT_DIR) {
            self.component_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_NPM_REGISTRY) {
            self.npm_registry_prefix = v;
        }
        if let Some(v) = get(ENV_TOOLCHAIN_ROOT) {
            self.toolchain_root = Some(PathBuf::from(v));
        }
        self
    }

    /// Create the install, dataset and component directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> CostaResult<()> {
        for dir in [&self.install_dir, &self.dataset_dir, &self.component_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_under_root() {
        let options = RuntimeOptions::with_root("/home/u/.pipcook");
        assert_eq!(options.install_dir, PathBuf::from("/home/u/.pipcook/plugins"));
        assert_eq!(options.dataset_dir, PathBuf::from("/home/u/.pipcook/datasets"));
        assert_eq!(options.component_dir, PathBuf::from("/home/u/.pipcook/components"));
        assert_eq!(options.npm_registry_prefix, DEFAULT_REGISTRY);
        assert_eq!(options.http_cache_capacity, 100);
        assert_eq!(options.validation, ValidationMode::Strict);
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("costa.toml");
        std::fs::write(
            &path,
            "install_dir = \"/srv/plugins\"\nvalidation = \"lenient\"\nhttp_cache_capacity = 8\n",
        )
        .unwrap();

        let options = RuntimeOptions::load(&path).unwrap();
        assert_eq!(options.install_dir, PathBuf::from("/srv/plugins"));
        assert_eq!(options.validation, ValidationMode::Lenient);
        assert_eq!(options.http_cache_capacity, 8);
        assert!(options.dataset_dir.ends_with(".pipcook/datasets"));
    }

    #[test]
    fn invalid_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("costa.toml");
        std::fs::write(&path, "validation = \"sometimes\"").unwrap();
        let err = RuntimeOptions::load(&path).unwrap_err();
        assert!(matches!(err, CostaError::Config { .. }));

        let missing = RuntimeOptions::load(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, CostaError::Config { .. }));
    }

    #[test]
    fn overrides_replace_fields_and_skip_empty() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_INSTALL_DIR, "/opt/plugins"),
            (ENV_NPM_REGISTRY, "https://registry.npmmirror.com"),
            (ENV_TOOLCHAIN_ROOT, "/opt/conda"),
            (ENV_DATASET_DIR, "  "),
        ]);
        let options = RuntimeOptions::with_root("/r")
            .apply_overrides_from(|k| env.get(k).map(ToString::to_string));

        assert_eq!(options.install_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(options.dataset_dir, PathBuf::from("/r/datasets"));
        assert_eq!(options.npm_registry_prefix, "https://registry.npmmirror.com");
        assert_eq!(options.toolchain_root, Some(PathBuf::from("/opt/conda")));
    }

    #[test]
    fn ensure_dirs_creates_all_three() {
        let tmp = tempfile::tempdir().unwrap();
        let options = RuntimeOptions::with_root(tmp.path().join("home"));
        options.ensure_dirs().unwrap();
        assert!(options.install_dir.is_dir());
        assert!(options.dataset_dir.is_dir());
        assert!(options.component_dir.is_dir());
    }
}
