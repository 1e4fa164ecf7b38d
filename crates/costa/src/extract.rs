//! Manifest extraction from tar archives.
//!
//! Registry tarballs and uploaded streams are gzip-compressed tars with a
//! leading `package/` directory; `git archive` produces a plain tar with the
//! requested file at the root. Only the single manifest entry is read, the
//! rest of the archive is scanned and skipped. Scanning still enforces:
//! - Path traversal (`../` components, absolute paths)
//! - Unsafe entry types (links, devices, FIFOs)
//! - Excessive entry counts and oversized manifests

use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{CostaError, CostaResult};

/// Manifest entry inside npm-style tarballs.
pub const PACKAGE_MANIFEST_ENTRY: &str = "package/package.json";

/// Manifest entry inside `git archive` output.
pub const ROOT_MANIFEST_ENTRY: &str = "package.json";

/// Maximum number of entries scanned before giving up.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum manifest size (10 MB).
const MAX_MANIFEST_SIZE: u64 = 10 * 1024 * 1024;

/// Read `entry_name` from a gzip-compressed tar.
///
/// # Errors
///
/// See [`extract_from_tar`].
pub fn extract_from_tgz<R: Read>(reader: R, entry_name: &str) -> CostaResult<Vec<u8>> {
    extract_from_tar(GzDecoder::new(reader), entry_name)
}

/// Read `entry_name` from an uncompressed tar.
///
/// # Errors
///
/// Returns `CostaError::Extraction` when the archive is corrupt, too large,
/// or does not contain the entry; `CostaError::PathTraversal` and
/// `CostaError::UnsafeEntryType` for hostile entries encountered on the way.
pub fn extract_from_tar<R: Read>(reader: R, entry_name: &str) -> CostaResult<Vec<u8>> {
    let mut archive = Archive::new(reader);
    let wanted = Path::new(entry_name);
    let mut entry_count = 0usize;

    let entries = archive
        .entries()
        .map_err(|e| extraction(format!("failed to read archive entries: {e}")))?;

    for entry_result in entries {
        let entry =
            entry_result.map_err(|e| extraction(format!("failed to read archive entry: {e}")))?;

        entry_count = entry_count.saturating_add(1);
        if entry_count > MAX_ENTRY_COUNT {
            return Err(extraction(format!(
                "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
            )));
        }

        let entry_type = entry.header().entry_type();
        if !is_safe_entry_type(entry_type) {
            let entry_path = entry
                .path()
                .map_or_else(|_| "<unknown>".to_string(), |p| p.display().to_string());
            return Err(CostaError::UnsafeEntryType {
                entry_type: format!("{entry_type:?}"),
                path: entry_path,
            });
        }

        let entry_path = entry
            .path()
            .map_err(|e| extraction(format!("failed to read entry path: {e}")))?
            .into_owned();
        validate_entry_path(&entry_path)?;

        if entry_type != tar::EntryType::Regular || entry_path != wanted {
            continue;
        }

        let size = entry
            .header()
            .size()
            .map_err(|e| extraction(format!("failed to read entry size: {e}")))?;
        if size > MAX_MANIFEST_SIZE {
            return Err(CostaError::PackageTooLarge {
                size,
                limit: MAX_MANIFEST_SIZE,
            });
        }

        let mut bytes = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        entry
            .take(MAX_MANIFEST_SIZE)
            .read_to_end(&mut bytes)
            .map_err(|e| extraction(format!("failed to read {entry_name}: {e}")))?;
        return Ok(bytes);
    }

    if entry_count == 0 {
        return Err(extraction("archive is empty"));
    }
    Err(extraction(format!("{entry_name} not found in archive")))
}

fn extraction(message: impl Into<String>) -> CostaError {
    CostaError::Extraction {
        message: message.into(),
    }
}

/// Regular files, directories and metadata headers only.
fn is_safe_entry_type(entry_type: tar::EntryType) -> bool {
    matches!(
        entry_type,
        tar::EntryType::Regular
            | tar::EntryType::Directory
            | tar::EntryType::GNULongName
            | tar::EntryType::XHeader
            | tar::EntryType::XGlobalHeader
    )
}

fn validate_entry_path(path: &Path) -> CostaResult<()> {
    if path.is_absolute()
        || path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
    {
        return Err(CostaError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
