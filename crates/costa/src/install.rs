//! Provisioning of a plugin's two dependency stacks.
//!
//! The module stack is installed with npm into the install root. The
//! interpreter stack is a virtual environment per plugin, populated with pip
//! from the `conda.dependencies` of the manifest. Both pipelines run
//! concurrently and neither cancels the other.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CostaError, CostaResult};
use crate::exec::{CommandRunner, CommandSpec, OutputSink, StreamTag, TracingSink};
use crate::layout::InstallLayout;
use crate::manifest::{PluginPackage, check_plugin_identity};
use crate::npm::DEFAULT_REGISTRY;
use crate::root_manifest::RootManifest;
use crate::source::SourceProtocol;
use crate::toolchain::ToolchainLocator;
use crate::uninstall::{self, PluginRef};

/// pip network timeout, in seconds.
const PIP_DEFAULT_TIMEOUT: &str = "1000";

/// Per-call install settings.
#[derive(Clone)]
pub struct InstallOptions {
    /// Alternative package index for pip (`-i`).
    pub py_index: Option<String>,
    /// Reinstall even when the plugin is already present.
    pub force: bool,
    /// Receives subprocess stdout.
    pub stdout: Arc<dyn OutputSink>,
    /// Receives subprocess stderr.
    pub stderr: Arc<dyn OutputSink>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            py_index: None,
            force: false,
            stdout: Arc::new(TracingSink::stdout()),
            stderr: Arc::new(TracingSink::stderr()),
        }
    }
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("py_index", &self.py_index)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl InstallOptions {
    /// Use `index` as the pip package index.
    #[must_use]
    pub fn with_py_index(mut self, index: impl Into<String>) -> Self {
        self.py_index = Some(index.into());
        self
    }

    /// Set whether an existing install is replaced.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Route subprocess output to the given sinks.
    #[must_use]
    pub fn with_sinks(mut self, stdout: Arc<dyn OutputSink>, stderr: Arc<dyn OutputSink>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }
}

/// Runs both install pipelines for a package.
#[derive(Clone)]
pub struct InstallOrchestrator {
    layout: InstallLayout,
    registry_prefix: String,
    module_search_path: String,
    toolchain: ToolchainLocator,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for InstallOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOrchestrator")
            .field("layout", &self.layout)
            .field("registry_prefix", &self.registry_prefix)
            .field("module_search_path", &self.module_search_path)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl InstallOrchestrator {
    /// Create an orchestrator.
    ///
    /// `module_search_path` is handed to npm as `NODE_PATH`.
    #[must_use]
    pub fn new(
        layout: InstallLayout,
        registry_prefix: impl Into<String>,
        module_search_path: impl Into<String>,
        toolchain: ToolchainLocator,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            layout,
            registry_prefix: registry_prefix.into(),
            module_search_path: module_search_path.into(),
            toolchain,
            runner,
        }
    }

    /// Install `pkg`. Returns `true` once the plugin is installed, including
    /// when it already was and `force` is off.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Validation` if the package name or version would
    /// escape the install root, and `CostaError::ToolchainMissing` when no
    /// toolchain is found. Otherwise returns the first pipeline error (usually
    /// `CostaError::CommandFailed`) after both pipelines have finished.
    /// Nothing is rolled back.
    pub async fn install(
        &self,
        pkg: &PluginPackage,
        options: &InstallOptions,
    ) -> CostaResult<bool> {
        check_plugin_identity(&pkg.manifest.name, &pkg.manifest.version)?;
        let id = pkg.plugin_id();

        if options.force {
            uninstall::uninstall(&self.layout, &[PluginRef::from(pkg)]).await?;
        } else if uninstall::is_installed(&self.layout, &id).await? {
            debug!(plugin = %id, "already installed");
            return Ok(true);
        }

        let toolchain = self.toolchain.locate()?;
        info!(plugin = %id, source = %pkg.source.protocol, "installing plugin");

        let (modules, interpreter) = tokio::join!(
            self.install_modules(pkg, options),
            self.install_interpreter_env(pkg, &toolchain, options),
        );
        modules?;
        interpreter?;

        info!(plugin = %id, "plugin installed");
        Ok(true)
    }

    async fn install_modules(
        &self,
        pkg: &PluginPackage,
        options: &InstallOptions,
    ) -> CostaResult<()> {
        RootManifest::ensure(&self.layout.root_manifest())?;
        let cmd = self.npm_install_command(pkg);
        self.runner
            .run(&cmd, options.stdout.as_ref(), options.stderr.as_ref())
            .await
    }

    /// `npm install` invocation for `pkg`. npm sources are installed under a
    /// `name@version` alias so several versions can coexist.
    #[must_use]
    pub fn npm_install_command(&self, pkg: &PluginPackage) -> CommandSpec {
        let spec = match pkg.source.protocol {
            SourceProtocol::Npm => {
                let id = pkg.plugin_id();
                format!("{id}@npm:{id}")
            },
            SourceProtocol::Git | SourceProtocol::Fs | SourceProtocol::Tarball => {
                pkg.source.uri.clone()
            },
        };
        let root = self.layout.root().display().to_string();

        let mut cmd = CommandSpec::new("npm", StreamTag::Node)
            .arg("install")
            .arg(spec)
            .args(["--prefix", root.as_str(), "--save", "--save-exact"])
            .current_dir(self.layout.root())
            .env("NODE_PATH", &self.module_search_path);
        let registry = self.registry_prefix.trim_end_matches('/');
        if registry != DEFAULT_REGISTRY {
            cmd = cmd.args(["--registry", registry]);
        }
        cmd
    }

    async fn install_interpreter_env(
        &self,
        pkg: &PluginPackage,
        toolchain: &Path,
        options: &InstallOptions,
    ) -> CostaResult<()> {
        let requirements = pkg.requirements();
        if requirements.is_empty() {
            return Ok(());
        }
        let id = pkg.plugin_id();

        let env_dir = self.prepare_env_dir(&id).await?;
        self.write_requirements(&id, &requirements).await?;
        let pip = self.create_venv(toolchain, &env_dir, options).await?;
        self.install_requirements(&pip, &requirements, options).await
    }

    /// Wipe and recreate the environment directory.
    async fn prepare_env_dir(&self, plugin_id: &str) -> CostaResult<PathBuf> {
        let env_dir = self.layout.env_dir(plugin_id);
        let install_err = |e: std::io::Error| CostaError::Install {
            package: plugin_id.to_string(),
            message: format!("cannot prepare {}: {e}", env_dir.display()),
        };
        match tokio::fs::remove_dir_all(&env_dir).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(install_err(e)),
        }
        tokio::fs::create_dir_all(&env_dir).await.map_err(install_err)?;
        Ok(env_dir)
    }

    async fn write_requirements(
        &self,
        plugin_id: &str,
        requirements: &[String],
    ) -> CostaResult<PathBuf> {
        let path = self.layout.requirements_file(plugin_id);
        let mut body = requirements.join("\n");
        body.push('\n');
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| CostaError::Install {
                package: plugin_id.to_string(),
                message: format!("cannot write {}: {e}", path.display()),
            })?;
        Ok(path)
    }

    /// Create the venv and return the path of its pip.
    async fn create_venv(
        &self,
        toolchain: &Path,
        env_dir: &Path,
        options: &InstallOptions,
    ) -> CostaResult<PathBuf> {
        let python = toolchain.join("bin").join("python3");
        let cmd = CommandSpec::new(python, StreamTag::Python)
            .args(["-m", "venv"])
            .arg(env_dir.display().to_string());
        self.runner
            .run(&cmd, options.stdout.as_ref(), options.stderr.as_ref())
            .await?;
        Ok(env_dir.join("bin").join("pip"))
    }

    /// Install requirements one at a time, in order.
    async fn install_requirements(
        &self,
        pip: &Path,
        requirements: &[String],
        options: &InstallOptions,
    ) -> CostaResult<()> {
        for cmd in self.pip_install_commands(pip, requirements, options.py_index.as_deref()) {
            self.runner
                .run(&cmd, options.stdout.as_ref(), options.stderr.as_ref())
                .await?;
        }
        Ok(())
    }

    fn pip_install_commands(
        &self,
        pip: &Path,
        requirements: &[String],
        py_index: Option<&str>,
    ) -> Vec<CommandSpec> {
        let cache_dir = self.layout.pip_cache().display().to_string();
        requirements
            .iter()
            .map(|requirement| {
                let mut cmd = CommandSpec::new(pip, StreamTag::Python)
                    .args(["install", requirement.as_str()])
                    .arg(format!("--default-timeout={PIP_DEFAULT_TIMEOUT}"));
                if let Some(index) = py_index {
                    cmd = cmd.args(["-i", index]);
                }
                cmd.args(["--cache-dir", cache_dir.as_str()])
            })
            .collect()
    }
}
