//! Plugin package manager for pipeline components.
//!
//! A plugin is an npm package whose manifest carries `pipcook` metadata and,
//! optionally, interpreter dependencies under `conda.dependencies`. This
//! crate resolves plugin identifiers, fetches and validates manifests, and
//! provisions both dependency stacks of a plugin:
//!
//! - [`SourceResolver`]: identifier to [`PluginSource`] (npm, git, fs, tarball)
//! - [`ManifestFetcher`]: manifest retrieval per protocol, with ETag revalidation
//!   of registry responses through [`ConditionalHttpFetcher`] and [`BoundedCache`]
//! - [`InstallOrchestrator`]: concurrent npm install and virtual environment setup
//! - [`uninstall()`]: removal of module trees, environments and root manifest entries
//! - [`CostaRuntime`]: the facade owning configuration and composing the above
//!
//! # Install layout
//!
//! Every plugin `name@version` gets `node_modules/name@version` and
//! `conda_envs/name@version` under the install root. See [`InstallLayout`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod extract;
pub mod fetcher;
pub mod git;
pub mod http;
pub mod install;
pub mod layout;
pub mod manifest;
pub mod npm;
pub mod root_manifest;
pub mod runtime;
pub mod source;
pub mod toolchain;
pub mod uninstall;

pub use cache::BoundedCache;
pub use config::RuntimeOptions;
pub use error::{CostaError, CostaResult};
pub use exec::{CommandRunner, CommandSpec, OutputSink, ProcessRunner, StreamTag, TracingSink};
pub use fetcher::ManifestFetcher;
pub use http::{ConditionalHttpFetcher, HttpCacheEntry};
pub use install::{InstallOptions, InstallOrchestrator};
pub use layout::InstallLayout;
pub use manifest::{
    CondaConfig, PluginManifest, PluginPackage, PluginTarget, ValidationMode, requirement_line,
    validate_and_assign,
};
pub use npm::{NpmPackageMetadata, NpmPackageNameSchema};
pub use root_manifest::RootManifest;
pub use runtime::{BootstrapArgs, CostaRuntime, RunnableFactory, RunnableOptions};
pub use source::{PluginSource, SourceProtocol, SourceResolver};
pub use toolchain::ToolchainLocator;
pub use uninstall::{PluginRef, uninstall};
