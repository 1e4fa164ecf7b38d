//! Costa error types.

use std::path::PathBuf;

/// Errors from plugin resolution, fetching, and provisioning.
#[derive(Debug, thiserror::Error)]
pub enum CostaError {
    /// The plugin identifier could not be turned into a source, or the
    /// requested version/tag does not exist in the registry metadata.
    #[error("cannot resolve '{identifier}': {reason}")]
    SourceResolution {
        /// The identifier (or package name) being resolved.
        identifier: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Invalid npm package name.
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackageName {
        /// The invalid name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// Registry, archive or local manifest retrieval failed.
    #[error("fetch failed for {uri}: {message}")]
    Fetch {
        /// The URI, remote or path that was being fetched.
        uri: String,
        /// Description of the failure (HTTP status message, git stderr, ...).
        message: String,
    },

    /// The manifest is missing required plugin metadata.
    #[error("invalid plugin package {package}: {reason}")]
    Validation {
        /// Package name (or `<unknown>` when the manifest has none).
        package: String,
        /// What is wrong with the manifest.
        reason: String,
    },

    /// Provisioning failed for a reason other than a subprocess exit.
    #[error("install failed for {package}: {message}")]
    Install {
        /// The `name@version` being installed.
        package: String,
        /// Failure description.
        message: String,
    },

    /// The interpreter toolchain needed for environment creation is absent.
    #[error("interpreter toolchain {toolchain} not found (searched: {})", format_paths(searched))]
    ToolchainMissing {
        /// Name of the dependency expected to carry the toolchain.
        toolchain: String,
        /// Every candidate location that was searched.
        searched: Vec<PathBuf>,
    },

    /// A provisioning subprocess exited unsuccessfully.
    #[error("command `{command}` failed with {}", format_exit(*code))]
    CommandFailed {
        /// The full command line that was invoked.
        command: String,
        /// Exit code, or `None` when the process was killed by a signal.
        code: Option<i32>,
    },

    /// Archive extraction failure.
    #[error("extraction error: {message}")]
    Extraction {
        /// Description of the extraction failure.
        message: String,
    },

    /// Unsafe entry type in archive (e.g. symlink, hardlink, device node).
    #[error("unsafe archive entry type '{entry_type}' at {path}")]
    UnsafeEntryType {
        /// The entry type that was rejected.
        entry_type: String,
        /// The path of the entry.
        path: String,
    },

    /// Path traversal detected in archive entry.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// Download or archive entry exceeds the allowed size.
    #[error("package too large: {size} bytes (limit: {limit} bytes)")]
    PackageTooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// Runtime configuration could not be loaded.
    #[error("configuration error in {path}: {message}")]
    Config {
        /// The configuration file (or `<env>` for environment overrides).
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// JSON (manifest, registry metadata) could not be parsed or written.
    #[error("invalid JSON in {context}: {source}")]
    Json {
        /// What was being parsed.
        context: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CostaError {
    pub(crate) fn fetch(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub(crate) fn resolution(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceResolution {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

/// Result type for costa operations.
pub type CostaResult<T> = Result<T, CostaError>;
