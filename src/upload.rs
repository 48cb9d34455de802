//! Upload handling: validate the file type and put the bytes on disk.
//!
//! Converters need a file-system path, so every upload is written out before
//! conversion. Two persistence strategies exist, picked by the route:
//!
//! * [`ScopedUpload`] (multipart routes) — a private `TempDir` per request.
//!   The directory is removed when the upload is closed or dropped, which
//!   covers the success path, early `?` returns and panics alike.
//! * [`FixedUpload`] (binary routes) — the shared upload directory from
//!   [`crate::config::ServiceConfig::upload_dir`]. Files stay there after
//!   the response. Each request gets a unique stored name so concurrent
//!   uploads of `report.pdf` never overwrite each other, and the client's
//!   filename is sanitised before it touches a path.

use crate::error::DocServeError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extensions accepted by every conversion route (lowercase, no dot).
pub const SUPPORTED_FORMATS: &[&str] = &[
    "pdf", "docx", "doc", "pptx", "ppt", "jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif",
    "epub", "xlsx", "xls", "html", "htm",
];

/// Final path component of a client-supplied name, for either separator.
fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

/// Lowercase extension without the dot, or `""` when there is none.
///
/// A leading dot does not start an extension: `.pdf` has none.
pub fn file_extension(file_name: &str) -> String {
    Path::new(base_name(file_name))
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Check the extension against [`SUPPORTED_FORMATS`] and return it.
pub fn validate_extension(file_name: &str) -> Result<String, DocServeError> {
    let extension = file_extension(file_name);
    if SUPPORTED_FORMATS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(DocServeError::UnsupportedFormat {
            extension,
            supported: SUPPORTED_FORMATS.join(", "),
        })
    }
}

/// Reduce a client filename to a single safe path component.
///
/// Directory parts are dropped, anything other than ASCII alphanumerics, `.`, `-`
/// and `_` becomes `_`, and leading dots are removed from the stem so the
/// result is never hidden, `.` or `..`. The extension survives (lowercased),
/// so `..pdf` is stored as `upload.pdf`, not `pdf`.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = base_name(file_name);
    let (stem, extension) = match Path::new(base).extension().and_then(|e| e.to_str()) {
        Some(raw) => (&base[..base.len() - raw.len() - 1], raw.to_lowercase()),
        None => (base, String::new()),
    };

    let cleaned = safe_chars(stem);
    let stem = match cleaned.trim_start_matches('.') {
        "" => "upload",
        stem => stem,
    };
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{}", safe_chars(&extension))
    }
}

fn safe_chars(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Scoped persistence ───────────────────────────────────────────────────

/// An uploaded file inside a private temporary directory.
#[derive(Debug)]
pub struct ScopedUpload {
    dir: TempDir,
    path: PathBuf,
}

impl ScopedUpload {
    /// Create a fresh temp directory and write `bytes` into it.
    pub async fn persist(bytes: &[u8], file_name: &str) -> Result<Self, DocServeError> {
        let dir = tempfile::Builder::new()
            .prefix("docserve-")
            .tempdir()
            .map_err(|e| DocServeError::fs(std::env::temp_dir(), e))?;
        let path = dir.path().join(sanitize_file_name(file_name));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DocServeError::fs(&path, e))?;

        debug!("Stored upload ({} bytes) at {}", bytes.len(), path.display());
        Ok(Self { dir, path })
    }

    /// Path of the stored file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The private directory holding the file.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging (not returning) any failure.
    pub fn close(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove temp dir {}: {}", dir.display(), e);
        }
    }
}

// ── Fixed-directory persistence ──────────────────────────────────────────

/// An uploaded file in the shared upload directory. Never deleted.
#[derive(Debug, Clone)]
pub struct FixedUpload {
    path: PathBuf,
    original_name: String,
}

impl FixedUpload {
    /// Write `bytes` into `dir` under a unique name derived from `file_name`.
    ///
    /// Empty bodies are rejected before anything is created on disk.
    pub async fn persist(dir: &Path, bytes: &[u8], file_name: &str) -> Result<Self, DocServeError> {
        if bytes.is_empty() {
            return Err(DocServeError::EmptyBody);
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DocServeError::fs(dir, e))?;

        let stored = format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(file_name));
        let path = dir.join(stored);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DocServeError::fs(&path, e))?;

        debug!("Stored binary upload ({} bytes) at {}", bytes.len(), path.display());
        Ok(Self {
            path,
            original_name: base_name(file_name).to_string(),
        })
    }

    /// Path of the stored file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the markdown byproduct of this upload is written.
    pub fn markdown_path(&self) -> PathBuf {
        self.path.with_extension("md")
    }

    /// Filename offered to the client for the markdown download.
    pub fn download_name(&self) -> String {
        let stem = Path::new(&self.original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        format!("{stem}.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.GZ"), "gz");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension(".pdf"), "");
        assert_eq!(file_extension("dir.d/file"), "");
        assert_eq!(validate_extension("Slides.PPTX").unwrap(), "pptx");
    }

    #[test]
    fn unsupported_extension_enumerates_allow_list() {
        let err = validate_extension("virus.exe").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exe"));
        for ext in SUPPORTED_FORMATS {
            assert!(msg.contains(ext), "{ext} missing from: {msg}");
        }
    }

    #[test]
    fn sanitize_strips_paths_and_specials() {
        assert_eq!(sanitize_file_name("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\my file.docx"), "my_file.docx");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("דוח.pdf"), "___.pdf");
        assert_eq!(sanitize_file_name("a;rm -rf.pdf"), "a_rm_-rf.pdf");
        assert_eq!(sanitize_file_name("..pdf"), "upload.pdf");
        assert_eq!(sanitize_file_name("...PDF"), "upload.pdf");
        assert_eq!(sanitize_file_name("Report.DOCX"), "Report.docx");
    }

    #[tokio::test]
    async fn scoped_upload_is_removed_on_close_and_drop() {
        let upload = ScopedUpload::persist(b"%PDF-1.7", "a.pdf").await.unwrap();
        let dir = upload.dir().to_path_buf();
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"%PDF-1.7");
        upload.close();
        assert!(!dir.exists());

        let dropped = ScopedUpload::persist(b"x", "b.png").await.unwrap();
        let dir = dropped.dir().to_path_buf();
        drop(dropped);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn fixed_upload_uses_unique_names() {
        let root = tempfile::tempdir().unwrap();
        let a = FixedUpload::persist(root.path(), b"one", "same.pdf").await.unwrap();
        let b = FixedUpload::persist(root.path(), b"two", "same.pdf").await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path()).unwrap(), b"one");
        assert_eq!(std::fs::read(b.path()).unwrap(), b"two");
        assert!(a.path().starts_with(root.path()));
        assert_eq!(a.download_name(), "same.md");
        assert_eq!(a.markdown_path().extension().unwrap(), "md");
    }

    #[tokio::test]
    async fn fixed_upload_rejects_empty_body_without_writing() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("uploads");
        let err = FixedUpload::persist(&target, b"", "a.pdf").await.unwrap_err();
        assert!(matches!(err, DocServeError::EmptyBody));
        assert!(!target.exists());
    }

    proptest! {
        #[test]
        fn every_unsupported_extension_is_rejected(ext in "[a-z0-9]{1,6}") {
            prop_assume!(!SUPPORTED_FORMATS.contains(&ext.as_str()));
            let err = validate_extension(&format!("file.{ext}")).unwrap_err();
            prop_assert!(err.is_client_error());
            prop_assert!(err.to_string().contains("pdf, docx, doc"));
        }

        #[test]
        fn sanitized_names_are_single_components(name in "\\PC{0,40}") {
            let s = sanitize_file_name(&name);
            prop_assert!(!s.is_empty());
            prop_assert!(!s.contains('/') && !s.contains('\\'));
            prop_assert!(!s.starts_with('.'));
        }
    }
}
