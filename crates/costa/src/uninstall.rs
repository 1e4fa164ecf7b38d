//! Removal of installed plugins.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::CostaResult;
use crate::layout::InstallLayout;
use crate::manifest::{PluginPackage, check_plugin_identity};
use crate::root_manifest::RootManifest;

/// Identifies an installed plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginRef {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
}

impl PluginRef {
    /// Reference `name@version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name@version`.
    #[must_use]
    pub fn plugin_id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl From<&PluginPackage> for PluginRef {
    fn from(pkg: &PluginPackage) -> Self {
        Self::new(&pkg.manifest.name, &pkg.manifest.version)
    }
}

/// Whether the plugin's module directory exists.
///
/// # Errors
///
/// Returns an I/O error if existence cannot be determined.
pub async fn is_installed(layout: &InstallLayout, plugin_id: &str) -> CostaResult<bool> {
    Ok(tokio::fs::try_exists(layout.module_dir(plugin_id)).await?)
}

/// Remove every listed plugin that is installed.
///
/// Plugins that are not installed are skipped. For each installed plugin the
/// module and environment directories are removed concurrently and its entry
/// is dropped from the root manifest. The root manifest is only rewritten
/// when something was removed, including when a later removal fails.
///
/// Returns `true` if at least one plugin was removed.
///
/// # Errors
///
/// Returns `CostaError::Validation` before touching the disk if a reference
/// does not name a valid plugin. Otherwise returns the first removal error
/// (after saving the entries already removed) or a root manifest error.
pub async fn uninstall(layout: &InstallLayout, plugins: &[PluginRef]) -> CostaResult<bool> {
    for plugin in plugins {
        check_plugin_identity(&plugin.name, &plugin.version)?;
    }

    let manifest_path = layout.root_manifest();
    let mut root: Option<RootManifest> = None;
    let mut removed_any = false;
    let mut failure = None;

    for plugin in plugins {
        let id = plugin.plugin_id();
        if !is_installed(layout, &id).await? {
            debug!(plugin = %id, "not installed, skipping");
            continue;
        }
        if root.is_none() {
            root = Some(RootManifest::load(&manifest_path)?);
        }

        let module_dir = layout.module_dir(&id);
        let env_dir = layout.env_dir(&id);
        let (module_removed, env_removed) =
            tokio::join!(remove_dir(&module_dir), remove_dir(&env_dir));
        if let Err(e) = module_removed.and(env_removed) {
            warn!(plugin = %id, error = %e, "failed to remove plugin");
            failure = Some(e);
            break;
        }

        if let Some(root) = root.as_mut() {
            root.remove_dependency(&id);
        }
        removed_any = true;
        info!(plugin = %id, "uninstalled plugin");
    }

    if removed_any && let Some(root) = &root {
        root.save(&manifest_path)?;
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(removed_any),
    }
}

/// Remove a directory tree (or a link to one); a missing path is not an error.
async fn remove_dir(path: &Path) -> CostaResult<()> {
    let is_link = tokio::fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_symlink());
    let result = match is_link {
        Ok(true) => tokio::fs::remove_file(path).await,
        Ok(false) => tokio::fs::remove_dir_all(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(layout: &InstallLayout, id: &str, with_env: bool) {
        std::fs::create_dir_all(layout.module_dir(id).join("dist")).unwrap();
        if with_env {
            std::fs::create_dir_all(layout.python_path(id)).unwrap();
        }
    }

    fn write_root(layout: &InstallLayout, deps: serde_json::Value) {
        std::fs::create_dir_all(layout.root()).unwrap();
        std::fs::write(
            layout.root_manifest(),
            serde_json::to_vec(&serde_json::json!({ "dependencies": deps })).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn nothing_installed_returns_false_and_leaves_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path());
        write_root(&layout, serde_json::json!({ "keep@1.0.0": "npm:keep@1.0.0" }));
        let before = std::fs::read(layout.root_manifest()).unwrap();

        let removed = uninstall(&layout, &[PluginRef::new("ghost", "0.1.0")])
            .await
            .unwrap();

        assert!(!removed);
        assert_eq!(std::fs::read(layout.root_manifest()).unwrap(), before);
    }

    #[tokio::test]
    async fn removes_module_env_and_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path());
        seed(&layout, "a@1.0.0", true);
        write_root(
            &layout,
            serde_json::json!({ "a@1.0.0": "npm:a@1.0.0", "b@1.0.0": "npm:b@1.0.0" }),
        );

        assert!(uninstall(&layout, &[PluginRef::new("a", "1.0.0")]).await.unwrap());

        assert!(!layout.module_dir("a@1.0.0").exists());
        assert!(!layout.env_dir("a@1.0.0").exists());
        let root = RootManifest::load(&layout.root_manifest()).unwrap();
        let deps = root.dependencies().unwrap();
        assert!(!deps.contains_key("a@1.0.0"));
        assert!(deps.contains_key("b@1.0.0"));
    }

    #[tokio::test]
    async fn escaping_reference_is_rejected_before_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path().join("install"));
        seed(&layout, "a@1.0.0", false);
        let outside = tmp.path().join("victim");
        std::fs::create_dir_all(&outside).unwrap();

        let err = uninstall(
            &layout,
            &[
                PluginRef::new("a", "1.0.0"),
                PluginRef::new("a", "1/../../../victim"),
            ],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, crate::error::CostaError::Validation { .. }));
        assert!(outside.exists());
        assert!(layout.module_dir("a@1.0.0").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_removal_still_records_earlier_removals() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path());
        seed(&layout, "a@1.0.0", false);
        seed(&layout, "b@1.0.0", false);
        write_root(
            &layout,
            serde_json::json!({ "a@1.0.0": "npm:a@1.0.0", "b@1.0.0": "npm:b@1.0.0" }),
        );

        let locked = layout.module_dir("b@1.0.0").join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("file"), "x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();
        let privileged = std::fs::write(locked.join("write-check"), "x").is_ok();

        let result = uninstall(
            &layout,
            &[PluginRef::new("a", "1.0.0"), PluginRef::new("b", "1.0.0")],
        )
        .await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        if privileged {
            // Permission bits do not bind this user; nothing to observe.
            return;
        }

        assert!(result.is_err());
        assert!(!layout.module_dir("a@1.0.0").exists());
        let root = RootManifest::load(&layout.root_manifest()).unwrap();
        let deps = root.dependencies().unwrap();
        assert!(!deps.contains_key("a@1.0.0"));
        assert!(deps.contains_key("b@1.0.0"));
    }

    #[tokio::test]
    async fn missing_env_dir_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path());
        seed(&layout, "noenv@2.0.0", false);

        assert!(uninstall(&layout, &[PluginRef::new("noenv", "2.0.0")]).await.unwrap());
        assert!(!layout.module_dir("noenv@2.0.0").exists());
        assert!(layout.root_manifest().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn linked_module_is_unlinked_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(tmp.path().join("install"));
        let target = tmp.path().join("local-plugin");
        std::fs::create_dir_all(target.join("src")).unwrap();
        std::fs::create_dir_all(layout.node_modules()).unwrap();
        std::os::unix::fs::symlink(&target, layout.module_dir("local@1.0.0")).unwrap();

        assert!(uninstall(&layout, &[PluginRef::new("local", "1.0.0")]).await.unwrap());
        assert!(!layout.module_dir("local@1.0.0").exists());
        assert!(target.join("src").exists());
    }
}
