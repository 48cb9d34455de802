//! Error types for the edgequake-docserve library.
//!
//! A single fatal error enum, [`DocServeError`], covers every way a request
//! can fail. Variants are grouped by where the failure originates:
//!
//! * **Validation** — the caller sent something we refuse to convert
//!   (unsupported extension, empty body, missing credentials). Always a
//!   client error and always raised *before* any conversion is attempted.
//! * **Conversion** — the converter ran (or tried to) and did not produce
//!   usable text.
//! * **I/O and setup** — working files, the pdfium library, URL inputs.
//!
//! [`DocServeError::status_code`] is the only place that knows how an error
//! maps onto HTTP; the server module turns it into a response body.

use axum::http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-docserve library.
#[derive(Debug, Error)]
pub enum DocServeError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// File extension is not in the supported-format allow-list.
    #[error("Unsupported file format: {extension}. Supported formats: {supported}")]
    UnsupportedFormat {
        extension: String,
        supported: String,
    },

    /// `output_format` is not one of markdown / json / html.
    #[error("Output format must be markdown, json, or html (got '{value}')")]
    InvalidOutputFormat { value: String },

    /// A required request field was absent or empty.
    #[error("Missing required field '{field}': {hint}")]
    MissingField { field: &'static str, hint: String },

    /// Binary upload with an empty request body.
    #[error("Request body is empty; the file content is missing")]
    EmptyBody,

    /// PDF-only endpoint received a file that is not a PDF.
    #[error("File must be a PDF (got '{file_name}')")]
    NotAPdf { file_name: String },

    /// Request body exceeded the configured upload limit.
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    /// Malformed request that does not fit a more specific variant.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The converter finished but produced no text.
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// The converter itself raised an error.
    #[error("Error processing file with {backend}: {detail}")]
    Converter { backend: String, detail: String },

    /// The configured backend cannot honour the requested mode or format.
    #[error("The {backend} backend does not support {feature}")]
    UnsupportedByBackend {
        backend: &'static str,
        feature: String,
    },

    /// Conversion exceeded the configured timeout.
    #[error("Conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    /// The LLM provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Creating, writing or checking a working file failed.
    #[error("File system error at '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local input file does not exist (CLI input).
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// URL input could not be downloaded (CLI input).
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// URL download exceeded its timeout (CLI input).
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set DOCSERVE_PDFIUM_LIB to the directory containing libpdfium, \
or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocServeError {
    /// Build an [`DocServeError::FileSystem`] for `path`.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::InvalidOutputFormat { .. }
            | Self::MissingField { .. }
            | Self::EmptyBody
            | Self::NotAPdf { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedByBackend { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::ConversionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ConversionFailed { .. }
            | Self::Converter { .. }
            | Self::ProviderNotConfigured { .. }
            | Self::FileSystem { .. }
            | Self::FileNotFound { .. }
            | Self::DownloadFailed { .. }
            | Self::DownloadTimeout { .. }
            | Self::InvalidConfig(_)
            | Self::PdfiumBindingFailed(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the caller, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
