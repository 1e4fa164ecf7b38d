//! On-disk layout of the plugin install root.
//!
//! # Layout
//!
//! ```text
//! <install_dir>/
//! ├── package.json                      (root manifest, one dependency per plugin)
//! ├── node_modules/
//! │   └── <name>@<version>/             (module tree of a plugin)
//! ├── conda_envs/
//! │   └── <name>@<version>/             (interpreter environment)
//! │       ├── requirements.txt
//! │       └── lib/python3.7/site-packages/
//! └── .pip/                             (shared pip download cache)
//! ```

use std::path::{Path, PathBuf};

/// Interpreter version whose `site-packages` path is exposed to plugins.
pub const PYTHON_VERSION: &str = "3.7";

/// Paths derived from the install root. Every path is a pure function of the
/// root and the plugin id, so two runtimes on the same root agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Install root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root `package.json`.
    #[must_use]
    pub fn root_manifest(&self) -> PathBuf {
        self.root.join("package.json")
    }

    /// `node_modules/`, appended to the module search path.
    #[must_use]
    pub fn node_modules(&self) -> PathBuf {
        self.root.join("node_modules")
    }

    /// Module directory of `plugin_id` (`name@version`).
    #[must_use]
    pub fn module_dir(&self, plugin_id: &str) -> PathBuf {
        self.node_modules().join(plugin_id)
    }

    /// Interpreter environment directory of `plugin_id`.
    #[must_use]
    pub fn env_dir(&self, plugin_id: &str) -> PathBuf {
        self.root.join("conda_envs").join(plugin_id)
    }

    /// `requirements.txt` inside the environment directory.
    #[must_use]
    pub fn requirements_file(&self, plugin_id: &str) -> PathBuf {
        self.env_dir(plugin_id).join("requirements.txt")
    }

    /// `site-packages` of the plugin's environment.
    #[must_use]
    pub fn python_path(&self, plugin_id: &str) -> PathBuf {
        self.env_dir(plugin_id)
            .join("lib")
            .join(format!("python{PYTHON_VERSION}"))
            .join("site-packages")
    }

    /// Shared pip cache.
    #[must_use]
    pub fn pip_cache(&self) -> PathBuf {
        self.root.join(".pip")
    }
}
