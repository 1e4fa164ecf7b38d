//! Manifest retrieval for every source protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::error::{CostaError, CostaResult};
use crate::extract::{PACKAGE_MANIFEST_ENTRY, extract_from_tgz};
use crate::git;
use crate::http::ConditionalHttpFetcher;
use crate::layout::InstallLayout;
use crate::manifest::{PluginManifest, PluginPackage, ValidationMode, validate_and_assign};
use crate::npm::NpmPackageMetadata;
use crate::source::{PluginSource, SourceProtocol};

/// Maximum tarball size accepted from a URL or stream (100 MB).
const MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Timeout for tarball downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Fetches a plugin manifest and turns it into a validated [`PluginPackage`].
#[derive(Debug)]
pub struct ManifestFetcher {
    registry: ConditionalHttpFetcher,
    client: reqwest::Client,
    layout: InstallLayout,
    validation: ValidationMode,
    temp_root: PathBuf,
}

impl ManifestFetcher {
    /// Create a fetcher.
    ///
    /// `temp_root` receives uploaded streams; tarball URLs are downloaded to
    /// the location their [`PluginSource::uri`] names.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::Fetch` if the download client cannot be built.
    pub fn new(
        registry: ConditionalHttpFetcher,
        layout: InstallLayout,
        validation: ValidationMode,
        temp_root: impl Into<PathBuf>,
    ) -> CostaResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("costa/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| {
                CostaError::fetch("<client>", format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            registry,
            client,
            layout,
            validation,
            temp_root: temp_root.into(),
        })
    }

    /// The registry fetcher, shared with callers that want cache statistics.
    #[must_use]
    pub fn registry(&self) -> &ConditionalHttpFetcher {
        &self.registry
    }

    /// Fetch the manifest for `source` and validate it.
    ///
    /// # Errors
    ///
    /// Returns resolution errors for unknown versions, fetch/extraction
    /// errors from the transport, and `CostaError::Validation` for manifests
    /// that are not plugins.
    pub async fn fetch(&self, source: PluginSource) -> CostaResult<PluginPackage> {
        let manifest = match source.protocol {
            SourceProtocol::Npm => self.fetch_npm(&source).await?,
            SourceProtocol::Git => fetch_git(&source).await?,
            SourceProtocol::Fs => fetch_fs(&source).await?,
            SourceProtocol::Tarball => self.fetch_tarball(&source).await?,
        };
        debug!(
            plugin = %manifest.plugin_id(),
            protocol = %source.protocol,
            "fetched plugin manifest"
        );
        let downloaded = (source.protocol == SourceProtocol::Tarball)
            .then(|| PathBuf::from(&source.uri));
        let validated = validate_and_assign(manifest, source, &self.layout, self.validation);
        if validated.is_err()
            && let Some(path) = downloaded
        {
            discard(&path).await;
        }
        validated
    }

    /// Read a gzip tarball from `reader` and synthesize a tarball source for it.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::PackageTooLarge` for oversized streams, extraction
    /// errors for malformed archives, and `CostaError::Validation` for
    /// manifests that are not plugins.
    pub async fn fetch_by_stream<R>(&self, reader: R) -> CostaResult<PluginPackage>
    where
        R: AsyncRead + Unpin + Send,
    {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let path = self
            .temp_root
            .join(format!("{}.tgz", uuid::Uuid::new_v4()));

        let received = self.receive_stream(reader, &path).await;
        if received.is_err() {
            discard(&path).await;
        }
        received
    }

    async fn receive_stream<R>(&self, reader: R, path: &Path) -> CostaResult<PluginPackage>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut file = tokio::fs::File::create(path).await?;
        let mut limited = reader.take(MAX_DOWNLOAD_SIZE.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;
        if written > MAX_DOWNLOAD_SIZE {
            return Err(CostaError::PackageTooLarge {
                size: written,
                limit: MAX_DOWNLOAD_SIZE,
            });
        }

        let manifest = read_tarball_manifest(path).await?;
        let source = PluginSource {
            protocol: SourceProtocol::Tarball,
            name: manifest.plugin_id(),
            uri: path.display().to_string(),
            url: None,
            schema: None,
        };
        info!(plugin = %source.name, path = %path.display(), "received plugin tarball");
        validate_and_assign(manifest, source, &self.layout, self.validation)
    }

    async fn fetch_npm(&self, source: &PluginSource) -> CostaResult<PluginManifest> {
        let body = self.registry.fetch(&source.uri).await?;
        let metadata = NpmPackageMetadata::from_value(&body)?;
        let requested = source.schema.as_ref().and_then(|s| s.version.as_deref());
        let selected = metadata.select(requested)?;
        PluginManifest::from_value(selected, &source.name)
    }

    async fn fetch_tarball(&self, source: &PluginSource) -> CostaResult<PluginManifest> {
        let url = match &source.url {
            Some(url) => url.clone(),
            None => Url::parse(&source.name)
                .map_err(|e| CostaError::resolution(&source.name, e.to_string()))?,
        };
        let dest = PathBuf::from(&source.uri);
        let manifest = match self.download(&url, &dest).await {
            Ok(()) => read_tarball_manifest(&dest).await,
            Err(e) => Err(e),
        };
        if manifest.is_err() {
            discard(&dest).await;
        }
        manifest
    }

    /// Stream `url` into `dest`, enforcing [`MAX_DOWNLOAD_SIZE`].
    async fn download(&self, url: &Url, dest: &Path) -> CostaResult<()> {
        debug!(url = %url, dest = %dest.display(), "downloading plugin tarball");
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| CostaError::fetch(url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CostaError::fetch(
                url.as_str(),
                status
                    .canonical_reason()
                    .map_or_else(|| status.to_string(), ToString::to_string),
            ));
        }
        if let Some(len) = response.content_length()
            && len > MAX_DOWNLOAD_SIZE
        {
            return Err(CostaError::PackageTooLarge {
                size: len,
                limit: MAX_DOWNLOAD_SIZE,
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| CostaError::fetch(url.as_str(), format!("download error: {e}")))?;
            written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if written > MAX_DOWNLOAD_SIZE {
                return Err(CostaError::PackageTooLarge {
                    size: written,
                    limit: MAX_DOWNLOAD_SIZE,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

async fn fetch_git(source: &PluginSource) -> CostaResult<PluginManifest> {
    let url = source
        .url
        .as_ref()
        .ok_or_else(|| CostaError::resolution(&source.name, "git source has no URL"))?;
    let bytes = git::fetch_manifest(url).await?;
    PluginManifest::from_slice(&bytes, &source.name)
}

async fn fetch_fs(source: &PluginSource) -> CostaResult<PluginManifest> {
    let path = Path::new(&source.uri).join("package.json");
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CostaError::fetch(path.display().to_string(), e.to_string()))?;
    PluginManifest::from_slice(&bytes, &path.display().to_string())
}

/// Best-effort removal of a downloaded or received archive.
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %e, "failed to remove archive");
    }
}

/// Extract and parse `package/package.json` from a local gzip tarball.
async fn read_tarball_manifest(path: &Path) -> CostaResult<PluginManifest> {
    let owned = path.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || -> CostaResult<Vec<u8>> {
        let file = std::fs::File::open(&owned)?;
        extract_from_tgz(std::io::BufReader::new(file), PACKAGE_MANIFEST_ENTRY)
    })
    .await
    .map_err(|e| CostaError::Extraction {
        message: format!("extraction task failed: {e}"),
    })??;
    PluginManifest::from_slice(&bytes, &path.display().to_string())
}
