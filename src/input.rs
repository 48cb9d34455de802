//! Input resolution for the one-shot `convert` command: a local path or a
//! URL becomes a local file whose extension is in the allow-list.
//!
//! URLs are downloaded into a `TempDir` held by [`ResolvedInput`], so the
//! file disappears when the conversion is done.

use crate::error::DocServeError;
use crate::upload::{file_extension, sanitize_file_name, validate_extension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// A local file ready for conversion.
#[derive(Debug)]
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` keeps the download alive until this value is dropped.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Extension of the resolved file, already checked against the allow-list.
    pub fn file_type(&self) -> String {
        file_extension(&self.path().to_string_lossy())
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local file, downloading URLs.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DocServeError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, DocServeError> {
    let path = PathBuf::from(path_str);
    if !path.is_file() {
        return Err(DocServeError::FileNotFound { path });
    }
    validate_extension(path_str)?;
    debug!("Resolved local input: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Last path segment of `url` when it looks like a filename.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DocServeError> {
    let file_name = filename_from_url(url).unwrap_or_else(|| "downloaded.pdf".to_string());
    validate_extension(&file_name)?;
    info!("Downloading {}", url);

    let failed = |reason: String| DocServeError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocServeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(failed("empty response body".into()));
    }

    let temp_dir = tempfile::Builder::new()
        .prefix("docserve-dl-")
        .tempdir()
        .map_err(|e| DocServeError::fs(std::env::temp_dir(), e))?;
    let path = temp_dir.path().join(sanitize_file_name(&file_name));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| DocServeError::fs(&path, e))?;

    info!("Downloaded {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_urls() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_filenames() {
        assert_eq!(
            filename_from_url("https://host.org/files/report.docx?x=1").as_deref(),
            Some("report.docx")
        );
        assert_eq!(filename_from_url("https://host.org/download/"), None);
        assert_eq!(filename_from_url("https://host.org/raw"), None);
    }

    #[tokio::test]
    async fn local_inputs_are_checked() {
        let missing = resolve_input("/nonexistent/a.pdf", 5).await.unwrap_err();
        assert!(matches!(missing, DocServeError::FileNotFound { .. }));

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tool.exe");
        std::fs::write(&exe, b"MZ").unwrap();
        let err = resolve_input(exe.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, DocServeError::UnsupportedFormat { .. }));

        let pdf = dir.path().join("ok.PDF");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();
        let resolved = resolve_input(pdf.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), pdf.as_path());
        assert_eq!(resolved.file_type(), "pdf");
    }

    #[tokio::test]
    async fn unsupported_url_is_rejected_before_download() {
        let err = resolve_input("https://unreachable.invalid/setup.exe", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DocServeError::UnsupportedFormat { .. }));
    }
}
