//! Locating the interpreter toolchain used to create plugin environments.
//!
//! The toolchain is a self-contained interpreter distribution shipped inside
//! the `@pipcook/boa` module. Location is explicit: every candidate is listed
//! up front and a miss reports all of them.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CostaError, CostaResult};

/// Module expected to carry the toolchain.
pub const TOOLCHAIN_PACKAGE: &str = "@pipcook/boa";

/// Toolchain directory inside [`TOOLCHAIN_PACKAGE`].
const TOOLCHAIN_DIR: &str = ".miniconda";

/// Finds the toolchain root (the directory containing `bin/python3`).
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    explicit: Option<PathBuf>,
    install_dir: PathBuf,
    search_from: Option<PathBuf>,
}

impl ToolchainLocator {
    /// Locator for an install root, with an optional explicit override.
    #[must_use]
    pub fn new(install_dir: impl Into<PathBuf>, explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            install_dir: install_dir.into(),
            search_from: None,
        }
    }

    /// Start the upward search at `dir` instead of the current directory.
    #[must_use]
    pub fn search_from(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_from = Some(dir.into());
        self
    }

    /// Every candidate, in search order: the explicit root, the sibling module
    /// under the install root, then each ancestor's `node_modules`.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(explicit) = &self.explicit {
            candidates.push(explicit.clone());
        }
        candidates.push(toolchain_under(&self.install_dir.join("node_modules")));

        let start = self
            .search_from
            .clone()
            .or_else(|| std::env::current_dir().ok());
        if let Some(start) = start {
            for dir in start.ancestors() {
                let candidate = toolchain_under(&dir.join("node_modules"));
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Return the first candidate that exists.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::ToolchainMissing` listing every searched path.
    pub fn locate(&self) -> CostaResult<PathBuf> {
        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|c| c.is_dir()) {
            debug!(path = %found.display(), "located interpreter toolchain");
            return Ok(found.clone());
        }
        Err(CostaError::ToolchainMissing {
            toolchain: TOOLCHAIN_PACKAGE.to_string(),
            searched: candidates,
        })
    }
}

fn toolchain_under(node_modules: &Path) -> PathBuf {
    node_modules.join(TOOLCHAIN_PACKAGE).join(TOOLCHAIN_DIR)
}
