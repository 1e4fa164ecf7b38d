//! The runtime facade tying resolution, fetching and provisioning together.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::config::RuntimeOptions;
use crate::error::CostaResult;
use crate::exec::{CommandRunner, OutputSink, ProcessRunner};
use crate::fetcher::ManifestFetcher;
use crate::http::ConditionalHttpFetcher;
use crate::install::{InstallOptions, InstallOrchestrator};
use crate::layout::InstallLayout;
use crate::manifest::PluginPackage;
use crate::source::SourceResolver;
use crate::toolchain::ToolchainLocator;
use crate::uninstall::{self, PluginRef};

/// Module search path variable handed to npm and to runnables.
pub const NODE_PATH: &str = "NODE_PATH";

/// Caller-controlled settings for [`CostaRuntime::create_runnable`].
///
/// The runnable's environment is set by the runtime, not by the caller.
#[derive(Clone, Default)]
pub struct RunnableOptions {
    /// Identifier for the runnable.
    pub id: Option<String>,
    /// Destination for the runnable's log output.
    pub logger: Option<Arc<dyn OutputSink>>,
}

impl fmt::Debug for RunnableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableOptions")
            .field("id", &self.id)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Configuration handed to a [`RunnableFactory`].
#[derive(Clone)]
pub struct BootstrapArgs {
    /// Environment overrides for the runnable.
    pub custom_env: BTreeMap<String, String>,
    /// Destination for the runnable's log output.
    pub logger: Option<Arc<dyn OutputSink>>,
    /// Identifier for the runnable.
    pub id: Option<String>,
}

impl fmt::Debug for BootstrapArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapArgs")
            .field("custom_env", &self.custom_env)
            .field("logger", &self.logger.is_some())
            .field("id", &self.id)
            .finish()
    }
}

/// Starts isolated executions of installed plugin code.
#[async_trait]
pub trait RunnableFactory: Send + Sync {
    /// Handle to a started runnable.
    type Handle: Send;

    /// Start a runnable.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    async fn create(&self, args: BootstrapArgs) -> CostaResult<Self::Handle>;
}

/// Plugin package manager bound to one install root.
pub struct CostaRuntime {
    options: RuntimeOptions,
    layout: InstallLayout,
    resolver: SourceResolver,
    fetcher: ManifestFetcher,
    installer: InstallOrchestrator,
    module_search_path: String,
}

impl fmt::Debug for CostaRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CostaRuntime")
            .field("options", &self.options)
            .field("module_search_path", &self.module_search_path)
            .finish_non_exhaustive()
    }
}

impl CostaRuntime {
    /// Create a runtime that spawns real subprocesses.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured directories cannot be created or
    /// the HTTP clients cannot be built.
    pub fn new(options: RuntimeOptions) -> CostaResult<Self> {
        Self::with_command_runner(options, Arc::new(ProcessRunner))
    }

    /// Create a runtime that executes provisioning commands through `runner`.
    ///
    /// # Errors
    ///
    /// Same as [`CostaRuntime::new`].
    pub fn with_command_runner(
        options: RuntimeOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> CostaResult<Self> {
        options.ensure_dirs()?;

        let layout = InstallLayout::new(&options.install_dir);
        let module_search_path =
            compose_module_search_path(std::env::var_os(NODE_PATH), &layout.node_modules());

        let resolver = SourceResolver::new(&options.npm_registry_prefix);
        let fetcher = ManifestFetcher::new(
            ConditionalHttpFetcher::new(options.http_cache_capacity)?,
            layout.clone(),
            options.validation,
            std::env::temp_dir().join("costa"),
        )?;
        let installer = InstallOrchestrator::new(
            layout.clone(),
            &options.npm_registry_prefix,
            &module_search_path,
            ToolchainLocator::new(&options.install_dir, options.toolchain_root.clone()),
            runner,
        );

        info!(install_dir = %options.install_dir.display(), "costa runtime ready");
        Ok(Self {
            options,
            layout,
            resolver,
            fetcher,
            installer,
            module_search_path,
        })
    }

    /// The options the runtime was built with.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Paths under the install root.
    #[must_use]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// `NODE_PATH` value given to npm and runnables.
    #[must_use]
    pub fn module_search_path(&self) -> &str {
        &self.module_search_path
    }

    /// Number of registry responses currently cached.
    pub async fn cached_registry_responses(&self) -> usize {
        self.fetcher.registry().cached_len().await
    }

    /// Resolve `identifier` and fetch its validated package.
    ///
    /// # Errors
    ///
    /// Returns resolution, fetch or validation errors.
    pub async fn fetch(&self, identifier: &str, cwd: Option<&Path>) -> CostaResult<PluginPackage> {
        let source = self.resolver.resolve(identifier, cwd)?;
        self.fetcher.fetch(source).await
    }

    /// Fetch a package from an uploaded gzip tarball.
    ///
    /// # Errors
    ///
    /// Returns extraction or validation errors.
    pub async fn fetch_by_stream<R>(&self, reader: R) -> CostaResult<PluginPackage>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.fetcher.fetch_by_stream(reader).await
    }

    /// Install both dependency stacks of `pkg`.
    ///
    /// # Errors
    ///
    /// See [`InstallOrchestrator::install`].
    pub async fn install(
        &self,
        pkg: &PluginPackage,
        options: &InstallOptions,
    ) -> CostaResult<bool> {
        self.installer.install(pkg, options).await
    }

    /// Remove installed plugins. Returns `true` if any were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if removal or the root manifest rewrite fails.
    pub async fn uninstall(&self, plugins: &[PluginRef]) -> CostaResult<bool> {
        uninstall::uninstall(&self.layout, plugins).await
    }

    /// Whether `plugin` is installed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if existence cannot be determined.
    pub async fn is_installed(&self, plugin: &PluginRef) -> CostaResult<bool> {
        uninstall::is_installed(&self.layout, &plugin.plugin_id()).await
    }

    /// Start a runnable through `factory` with the runtime's module search path.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error.
    pub async fn create_runnable<F>(
        &self,
        factory: &F,
        options: RunnableOptions,
    ) -> CostaResult<F::Handle>
    where
        F: RunnableFactory,
    {
        let mut custom_env = BTreeMap::new();
        custom_env.insert(NODE_PATH.to_string(), self.module_search_path.clone());
        debug!(id = ?options.id, "creating runnable");
        factory
            .create(BootstrapArgs {
                custom_env,
                logger: options.logger,
                id: options.id,
            })
            .await
    }
}

/// Append `node_modules` to an inherited search path unless already listed.
fn compose_module_search_path(inherited: Option<OsString>, node_modules: &Path) -> String {
    let mut entries: Vec<_> = inherited
        .as_deref()
        .map(|v| std::env::split_paths(v).filter(|p| !p.as_os_str().is_empty()).collect())
        .unwrap_or_default();
    if !entries.iter().any(|p| p == node_modules) {
        entries.push(node_modules.to_path_buf());
    }
    std::env::join_paths(&entries).map_or_else(
        |_| node_modules.display().to_string(),
        |joined| joined.to_string_lossy().into_owned(),
    )
}
