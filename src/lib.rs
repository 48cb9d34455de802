//! # edgequake-docserve
//!
//! HTTP service that converts uploaded documents (PDF, Office files,
//! images, EPUB, HTML) into markdown, JSON or HTML.
//!
//! The crate does not parse documents itself. It owns the route layer,
//! upload handling and a small conversion facade; the conversion proper is
//! done by a [`DocumentConverter`] backend, optionally assisted by an LLM.
//!
//! ## Request flow
//!
//! ```text
//! HTTP request
//!  │
//!  ├─ 1. Validate  extension allow-list, output format, flags, credentials
//!  ├─ 2. Persist   private temp dir (form routes) or shared dir (binary routes)
//!  ├─ 3. Convert   ConversionConfig → DocumentConverter::render → text
//!  ├─ 4. Respond   JSON, or a markdown download on binary routes
//!  └─ 5. Cleanup   temp dir removed; shared-dir files are kept
//! ```
//!
//! ## Backends
//!
//! | Backend | Formats | Modes |
//! |---------|---------|-------|
//! | `marker` (default) | all supported | standard, ocr, llm |
//! | `pdfium` | pdf | standard, llm |
//!
//! ## Library use
//!
//! ```rust,no_run
//! use edgequake_docserve::{convert_standard, MarkerConverter, OutputFormat};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = MarkerConverter::new("marker_single");
//!     let text = convert_standard(&converter, Path::new("report.pdf"), OutputFormat::Markdown, None).await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docserve` binary (clap + anyhow + tracing-subscriber + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod converter;
pub mod error;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod response;
pub mod server;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BackendKind, ConversionConfig, ConversionConfigBuilder, ConversionMode, OutputFormat,
    PageSeparator, PdfiumSettings, ProviderCredentials, ServiceConfig, DEFAULT_MODEL,
};
pub use convert::{convert, convert_document, convert_ocr_only, convert_standard, convert_with_assist};
pub use converter::marker::MarkerConverter;
pub use converter::pdfium::PdfiumConverter;
pub use converter::{build_converter, text_from_rendered, DocumentConverter, RenderedDocument};
pub use error::DocServeError;
pub use output::ConversionResult;
pub use server::{router, serve, AppState};
pub use upload::SUPPORTED_FORMATS;
