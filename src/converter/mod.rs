//! The document-converter seam.
//!
//! Everything that actually understands documents (layout analysis, OCR,
//! LLM refinement) sits behind [`DocumentConverter`]. The facade in
//! [`crate::convert`] only builds a [`ConversionConfig`], calls
//! [`DocumentConverter::render`], and reduces the result with
//! [`text_from_rendered`].
//!
//! Two implementations ship with the crate:
//!
//! | Backend | Formats | Modes |
//! |---------|---------|-------|
//! | [`marker::MarkerConverter`] | every supported format | standard, ocr, llm |
//! | [`pdfium::PdfiumConverter`] | pdf | standard, llm |
//!
//! Tests substitute their own implementation; the trait is object-safe and
//! the server holds an `Arc<dyn DocumentConverter>`.

pub mod marker;
pub mod pdfium;

use crate::config::{BackendKind, ConversionConfig, ServiceConfig};
use crate::error::DocServeError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// A converter's structured output before text extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedDocument {
    Markdown(String),
    Html(String),
    Json(serde_json::Value),
}

/// Reduce a rendered document to the plain text returned to callers.
///
/// JSON documents are pretty-printed; a serialisation failure yields an
/// empty string, which the facade reports as a failed conversion.
pub fn text_from_rendered(rendered: &RenderedDocument) -> String {
    match rendered {
        RenderedDocument::Markdown(md) => md.clone(),
        RenderedDocument::Html(html) => html.clone(),
        RenderedDocument::Json(value) => serde_json::to_string_pretty(value).unwrap_or_default(),
    }
}

/// Turns a file on disk into a [`RenderedDocument`].
///
/// Implementations may block or spawn processes, but must not do blocking
/// work on the async executor: use `spawn_blocking` or `tokio::process`.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Convert the file at `path` according to `config`.
    async fn render(
        &self,
        path: &Path,
        config: &ConversionConfig,
    ) -> Result<RenderedDocument, DocServeError>;
}

/// Instantiate the backend selected in `settings`.
pub fn build_converter(settings: &ServiceConfig) -> Arc<dyn DocumentConverter> {
    match settings.backend {
        BackendKind::Marker => Arc::new(marker::MarkerConverter::new(&settings.marker_bin)),
        BackendKind::Pdfium => {
            Arc::new(
                pdfium::PdfiumConverter::new(settings.pdfium_lib_dir.clone())
                    .with_settings(settings.pdfium.clone()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_from_markdown_and_html_is_verbatim() {
        let md = RenderedDocument::Markdown("# Title\n".into());
        assert_eq!(text_from_rendered(&md), "# Title\n");

        let html = RenderedDocument::Html("<h1>Title</h1>".into());
        assert_eq!(text_from_rendered(&html), "<h1>Title</h1>");
    }

    #[test]
    fn text_from_json_is_pretty_printed() {
        let doc = RenderedDocument::Json(serde_json::json!({"pages": [{"page": 1}]}));
        let text = text_from_rendered(&doc);
        assert!(text.contains("\"pages\""));
        assert!(text.contains('\n'));
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back["pages"][0]["page"], 1);
    }

    #[test]
    fn build_converter_honours_backend() {
        let mut settings = ServiceConfig::default();
        assert_eq!(build_converter(&settings).name(), "marker");
        settings.backend = BackendKind::Pdfium;
        assert_eq!(build_converter(&settings).name(), "pdfium");
    }
}
