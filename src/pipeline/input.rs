//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! The locator reads a file path. A downloaded filing lives in a `TempDir`
//! owned by [`ResolvedInput`] and is removed when it is dropped, which
//! happens as soon as the tables have been located.
//!
//! EDGAR refuses requests without a descriptive `User-Agent`, so the client
//! sends the configured one when present.

use crate::error::TablexError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; filing downloaded to a temporary directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the filing regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local HTML file path.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    user_agent: Option<&str>,
) -> Result<ResolvedInput, TablexError> {
    if input.trim().is_empty() {
        return Err(TablexError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs, user_agent).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and read permission.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, TablexError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(TablexError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(TablexError::InvalidInput {
            input: path_str.to_string(),
        });
    }

    // Check read permission by attempting to open
    if let Err(e) = std::fs::File::open(&path) {
        return Err(TablexError::from_io(path, e));
    }

    debug!("Resolved local filing: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(
    url: &str,
    timeout_secs: u64,
    user_agent: Option<&str>,
) -> Result<ResolvedInput, TablexError> {
    info!("Downloading filing from: {}", url);

    let download_err = |reason: String| TablexError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let mut builder =
        reqwest::Client::builder().timeout(std::time::Duration::from_secs(timeout_secs));
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    let client = builder.build().map_err(|e| download_err(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TablexError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            download_err(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(download_err(format!("HTTP {}", response.status())));
    }

    let filename = extract_filename(url);

    let temp_dir = TempDir::new().map_err(|e| TablexError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_err(e.to_string()))?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| TablexError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "filing.htm".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://www.sec.gov/Archives/nvda-20240128.htm"));
        assert!(is_url("http://example.com/filing.htm"));
        assert!(!is_url("/tmp/filing.htm"));
        assert!(!is_url("filing.htm"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(
            extract_filename("https://www.sec.gov/Archives/edgar/data/1045810/nvda-20240128.htm"),
            "nvda-20240128.htm"
        );
        assert_eq!(extract_filename("https://example.com/"), "filing.htm");
        assert_eq!(extract_filename("https://example.com/latest"), "filing.htm");
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve_input("/nonexistent/filing.htm", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TablexError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn directory_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path().to_str().unwrap(), 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TablexError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn local_file_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.htm");
        std::fs::write(&path, "<table></table>").unwrap();
        let resolved = resolve_input(path.to_str().unwrap(), 5, None).await.unwrap();
        assert_eq!(resolved.path(), path.as_path());
    }
}
