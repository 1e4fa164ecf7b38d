//! The install root's `package.json`.
//!
//! npm records every installed plugin in this file's `dependencies` under
//! the `name@version` alias. Uninstall removes those keys again; all other
//! fields are carried through untouched.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CostaError, CostaResult};

/// In-memory copy of the root manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct RootManifest {
    doc: Map<String, Value>,
}

impl Default for RootManifest {
    fn default() -> Self {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::from("pipcook-plugins"));
        doc.insert("version".into(), Value::from("1.0.0"));
        doc.insert("private".into(), Value::Bool(true));
        doc.insert("dependencies".into(), Value::Object(Map::new()));
        Self { doc }
    }
}

impl RootManifest {
    /// Read the manifest at `path`; a missing file yields the default document.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Io` on read failures and `CostaError::Json` if the
    /// file is not a JSON object.
    pub fn load(path: &Path) -> CostaResult<Self> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let doc: Map<String, Value> = serde_json::from_slice(&content)
            .map_err(|e| CostaError::json(path.display().to_string(), e))?;
        Ok(Self { doc })
    }

    /// Write the default document to `path` unless a file already exists.
    ///
    /// Returns `true` if a file was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn ensure(path: &Path) -> CostaResult<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        debug!(path = %path.display(), "initialized root manifest");
        Ok(true)
    }

    /// The `dependencies` object, if present.
    #[must_use]
    pub fn dependencies(&self) -> Option<&Map<String, Value>> {
        self.doc.get("dependencies").and_then(Value::as_object)
    }

    /// Remove `key` from `dependencies`. Returns `true` if it was present.
    pub fn remove_dependency(&mut self, key: &str) -> bool {
        self.doc
            .get_mut("dependencies")
            .and_then(Value::as_object_mut)
            .is_some_and(|deps| deps.shift_remove(key).is_some())
    }

    /// Save atomically: write a sibling temp file, sync, then rename over `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, path: &Path) -> CostaResult<()> {
        let parent = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&parent)?;

        let mut body = serde_json::to_vec_pretty(&self.doc)
            .map_err(|e| CostaError::json(path.display().to_string(), e))?;
        body.push(b'\n');

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CostaError::Io(e.error))?;

        debug!(path = %path.display(), "saved root manifest");
        Ok(())
    }
}
