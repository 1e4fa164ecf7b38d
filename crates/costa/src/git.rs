//! Manifest retrieval from git remotes via `git archive`.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::error::{CostaError, CostaResult};
use crate::extract::{ROOT_MANIFEST_ENTRY, extract_from_tar};

/// Timeout for `git archive` (5 minutes).
const GIT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Build the `--remote` argument: `{user|git}@{host}:{path}[#ref]`.
///
/// # Errors
///
/// Returns `CostaError::SourceResolution` if the URL has no host.
pub fn archive_remote(url: &Url) -> CostaResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| CostaError::resolution(url.as_str(), "git URL has no host"))?;
    let user = if url.username().is_empty() {
        "git"
    } else {
        url.username()
    };
    let path = url.path().trim_start_matches('/');
    let hash = url.fragment().map(|f| format!("#{f}")).unwrap_or_default();
    Ok(format!("{user}@{host}:{path}{hash}"))
}

/// Fetch the raw `package.json` bytes at `HEAD` of the remote.
///
/// # Errors
///
/// Returns `CostaError::Fetch` if git cannot be spawned, exits non-zero or
/// times out, and extraction errors if the archive lacks a manifest.
pub async fn fetch_manifest(url: &Url) -> CostaResult<Vec<u8>> {
    let remote = archive_remote(url)?;
    debug!(remote = %remote, "fetching manifest with git archive");

    // Dropping the timed-out future kills the child.
    let output = tokio::time::timeout(GIT_ARCHIVE_TIMEOUT, archive_command(&remote).output())
        .await
        .map_err(|_| {
            CostaError::fetch(
                &remote,
                format!("git archive timed out after {}s", GIT_ARCHIVE_TIMEOUT.as_secs()),
            )
        })?
        .map_err(|e| CostaError::fetch(&remote, format!("failed to run git archive: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CostaError::fetch(
            &remote,
            format!("git archive failed: {}", stderr.trim()),
        ));
    }

    extract_from_tar(output.stdout.as_slice(), ROOT_MANIFEST_ENTRY)
}

fn archive_command(remote: &str) -> Command {
    let mut cmd = Command::new("git");

    // Only PATH and HOME survive; GIT_* overrides from the parent could run
    // arbitrary commands.
    cmd.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    if let Ok(home) = std::env::var("HOME") {
        cmd.env("HOME", home);
    }
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    cmd.arg("archive")
        .arg(format!("--remote={remote}"))
        .args(["HEAD", ROOT_MANIFEST_ENTRY]);
    cmd
}
