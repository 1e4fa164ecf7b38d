//! Plugin source resolution.
//!
//! Turns a user-supplied identifier into a [`PluginSource`]. Detection order
//! is filesystem, git, tarball URL, and finally npm registry name.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::error::{CostaError, CostaResult};
use crate::npm::NpmPackageNameSchema;

/// URL schemes that denote a git remote.
const GIT_SCHEMES: &[&str] = &["git", "git+ssh", "git+https", "ssh"];

/// Where a plugin comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceProtocol {
    /// npm registry package.
    Npm,
    /// Git remote read via `git archive`.
    Git,
    /// Local directory holding a `package.json`.
    Fs,
    /// Gzip tarball behind an HTTP(S) URL.
    Tarball,
}

impl SourceProtocol {
    /// Lowercase protocol name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Git => "git",
            Self::Fs => "fs",
            Self::Tarball => "tarball",
        }
    }
}

impl fmt::Display for SourceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical descriptor of a plugin's origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    /// Protocol used to fetch the manifest.
    pub protocol: SourceProtocol,
    /// The identifier as given, or the package name for npm sources.
    pub name: String,
    /// Resolved location: registry URL, local path, git locator, or the
    /// local file a tarball is downloaded into.
    pub uri: String,
    /// Parsed URL for git and tarball sources.
    pub url: Option<Url>,
    /// Parsed package name; present iff `protocol` is [`SourceProtocol::Npm`].
    pub schema: Option<NpmPackageNameSchema>,
}

/// Resolves identifiers against a registry prefix and a scratch directory.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    registry_prefix: String,
    temp_root: PathBuf,
}

impl SourceResolver {
    /// Create a resolver using the system temp directory for downloads.
    #[must_use]
    pub fn new(registry_prefix: impl Into<String>) -> Self {
        Self::with_temp_root(registry_prefix, std::env::temp_dir())
    }

    /// Create a resolver placing tarball downloads under `temp_root`.
    #[must_use]
    pub fn with_temp_root(
        registry_prefix: impl Into<String>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry_prefix: registry_prefix.into(),
            temp_root: temp_root.into(),
        }
    }

    /// Registry prefix with trailing slashes removed.
    #[must_use]
    pub fn registry_prefix(&self) -> &str {
        self.registry_prefix.trim_end_matches('/')
    }

    /// Resolve `identifier` into a source. Relative filesystem paths are
    /// joined onto `cwd` when one is given.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::SourceResolution` for malformed identifiers and
    /// `CostaError::InvalidPackageName` for npm names that break naming rules.
    pub fn resolve(&self, identifier: &str, cwd: Option<&Path>) -> CostaResult<PluginSource> {
        let identifier = identifier.trim();
        let source = if is_fs_identifier(identifier) {
            PluginSource {
                protocol: SourceProtocol::Fs,
                name: identifier.to_string(),
                uri: resolve_fs_path(identifier, cwd).display().to_string(),
                url: None,
                schema: None,
            }
        } else if let Some(url) = parse_git_url(identifier) {
            PluginSource {
                protocol: SourceProtocol::Git,
                name: identifier.to_string(),
                uri: identifier.to_string(),
                url: Some(url),
                schema: None,
            }
        } else if let Some(url) = parse_tarball_url(identifier) {
            let uri = self
                .temp_root
                .join(uuid::Uuid::new_v4().to_string())
                .join(tarball_basename(&url));
            PluginSource {
                protocol: SourceProtocol::Tarball,
                name: identifier.to_string(),
                uri: uri.display().to_string(),
                url: Some(url),
                schema: None,
            }
        } else {
            let schema = NpmPackageNameSchema::parse(identifier)?;
            let name = schema.package_name();
            PluginSource {
                protocol: SourceProtocol::Npm,
                uri: format!("{}/{name}", self.registry_prefix()),
                name,
                url: None,
                schema: Some(schema),
            }
        };

        debug!(
            identifier,
            protocol = %source.protocol,
            uri = %source.uri,
            "resolved plugin source"
        );
        Ok(source)
    }
}

fn is_fs_identifier(identifier: &str) -> bool {
    Path::new(identifier).is_absolute()
        || identifier.starts_with("./")
        || identifier.starts_with("../")
        || identifier.starts_with('~')
        || identifier.starts_with("file:")
}

fn resolve_fs_path(identifier: &str, cwd: Option<&Path>) -> PathBuf {
    let path = if let Some(rest) = identifier.strip_prefix("file:") {
        Url::parse(identifier)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .unwrap_or_else(|| PathBuf::from(rest))
    } else if let Some(rest) = identifier.strip_prefix('~') {
        match directories::BaseDirs::new() {
            Some(base) => base.home_dir().join(rest.trim_start_matches('/')),
            None => PathBuf::from(identifier),
        }
    } else {
        PathBuf::from(identifier)
    };

    match cwd {
        Some(cwd) if path.is_relative() => cwd.join(path),
        _ => path,
    }
}

/// Git URL schemes plus SCP-like `user@host:path` locators. SCP forms are
/// normalized to `ssh://user@host/path` so callers deal with one shape.
fn parse_git_url(identifier: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(identifier) {
        return GIT_SCHEMES.contains(&url.scheme()).then_some(url);
    }

    if identifier.starts_with('@') {
        return None;
    }
    let (user, rest) = identifier.split_once('@')?;
    let (host, path) = rest.split_once(':')?;
    if user.is_empty()
        || host.is_empty()
        || path.is_empty()
        || user.contains('/')
        || host.contains('/')
    {
        return None;
    }
    Url::parse(&format!("ssh://{user}@{host}/{}", path.trim_start_matches('/'))).ok()
}

fn parse_tarball_url(identifier: &str) -> Option<Url> {
    Url::parse(identifier)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

fn tarball_basename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map_or_else(|| "package.tgz".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SourceResolver {
        SourceResolver::with_temp_root("https://registry.example.com/", "/tmp/costa-test")
    }

    #[test]
    fn npm_scoped_name_resolves_to_registry_uri() {
        let source = resolver().resolve("@pipcook/bayes@1.0.0", None).unwrap();
        assert_eq!(source.protocol, SourceProtocol::Npm);
        assert_eq!(source.name, "@pipcook/bayes");
        assert_eq!(source.uri, "https://registry.example.com/@pipcook/bayes");
        let schema = source.schema.unwrap();
        assert_eq!(schema.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn malformed_scope_fails() {
        let err = resolver().resolve("@pipcook", None).unwrap_err();
        assert!(matches!(err, CostaError::SourceResolution { .. }));
    }

    #[test]
    fn relative_path_is_fs_and_joined_with_cwd() {
        let source = resolver()
            .resolve("./plugins/demo", Some(Path::new("/work")))
            .unwrap();
        assert_eq!(source.protocol, SourceProtocol::Fs);
        assert_eq!(source.name, "./plugins/demo");
        assert_eq!(PathBuf::from(&source.uri), Path::new("/work/./plugins/demo"));
        assert!(source.schema.is_none());
    }

    #[test]
    fn absolute_and_file_scheme_paths_are_fs() {
        let abs = resolver().resolve("/opt/plugin", Some(Path::new("/work"))).unwrap();
        assert_eq!(abs.protocol, SourceProtocol::Fs);
        assert_eq!(abs.uri, "/opt/plugin");

        let file = resolver().resolve("file:///opt/plugin", None).unwrap();
        assert_eq!(file.protocol, SourceProtocol::Fs);
        assert_eq!(file.uri, "/opt/plugin");
    }

    #[test]
    fn git_schemes_and_scp_form_are_git() {
        for id in [
            "git+https://github.com/org/repo.git",
            "git+ssh://git@github.com/org/repo.git",
            "ssh://git@github.com/org/repo.git",
            "git://github.com/org/repo.git",
        ] {
            let source = resolver().resolve(id, None).unwrap();
            assert_eq!(source.protocol, SourceProtocol::Git, "{id}");
            assert_eq!(source.uri, id);
        }

        let scp = resolver().resolve("git@github.com:org/repo.git#abc123", None).unwrap();
        assert_eq!(scp.protocol, SourceProtocol::Git);
        let url = scp.url.unwrap();
        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(url.username(), "git");
        assert_eq!(url.path(), "/org/repo.git");
        assert_eq!(url.fragment(), Some("abc123"));
    }

    #[test]
    fn http_url_is_tarball_with_temp_destination() {
        let source = resolver()
            .resolve("https://example.com/files/plugin-1.0.0.tgz", None)
            .unwrap();
        assert_eq!(source.protocol, SourceProtocol::Tarball);
        assert_eq!(source.name, "https://example.com/files/plugin-1.0.0.tgz");
        let uri = PathBuf::from(&source.uri);
        assert!(uri.starts_with("/tmp/costa-test"));
        assert_eq!(uri.file_name().unwrap(), "plugin-1.0.0.tgz");
    }

    #[test]
    fn tarball_destinations_are_unique() {
        let a = resolver().resolve("https://example.com/p.tgz", None).unwrap();
        let b = resolver().resolve("https://example.com/p.tgz", None).unwrap();
        assert_ne!(a.uri, b.uri);
    }

    #[test]
    fn unscoped_name_with_tag_is_npm() {
        let source = resolver().resolve("bayes-classifier@beta", None).unwrap();
        assert_eq!(source.protocol, SourceProtocol::Npm);
        assert_eq!(source.uri, "https://registry.example.com/bayes-classifier");
    }
}
