//! In-process PDF backend built on pdfium.
//!
//! * **standard** — the text layer of each page, cleaned up.
//! * **llm** — each page is rasterised and sent, together with its text
//!   layer, to a vision LLM that returns structured markdown. Pages whose
//!   refinement fails keep their text layer.
//! * **ocr** — not available: forcing OCR needs an OCR engine, which this
//!   backend does not have. Returns [`DocServeError::UnsupportedByBackend`].
//!
//! Only PDF input is accepted.

use super::{DocumentConverter, RenderedDocument};
use crate::config::{ConversionConfig, OutputFormat, PageSeparator, PdfiumSettings};
use crate::error::DocServeError;
use crate::pipeline::postprocess::{clean_markdown, CleanOptions};
use crate::pipeline::render::{load_pages, RenderedPage};
use crate::pipeline::{encode, llm};
use async_trait::async_trait;
use edgequake_llm::LLMProvider;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const BACKEND: &str = "pdfium";

/// Converter backed by pdfium, with an optional LLM refinement pass.
#[derive(Clone, Default)]
pub struct PdfiumConverter {
    lib_dir: Option<PathBuf>,
    settings: PdfiumSettings,
    provider: Option<Arc<dyn LLMProvider>>,
}

impl fmt::Debug for PdfiumConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfiumConverter")
            .field("lib_dir", &self.lib_dir)
            .field("settings", &self.settings)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

impl PdfiumConverter {
    /// Bind pdfium from `lib_dir`, or the system library when `None`.
    pub fn new(lib_dir: Option<PathBuf>) -> Self {
        Self {
            lib_dir,
            settings: PdfiumSettings::default(),
            provider: None,
        }
    }

    /// Replace the rendering and refinement tuning.
    pub fn with_settings(mut self, settings: PdfiumSettings) -> Self {
        self.settings = settings.normalized();
        self
    }

    /// Use `provider` for every assisted conversion instead of building one
    /// from the request credentials.
    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn settings(&self) -> &PdfiumSettings {
        &self.settings
    }

    fn provider_for(&self, config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, DocServeError> {
        if let Some(ref provider) = self.provider {
            return Ok(Arc::clone(provider));
        }
        config
            .credentials
            .as_ref()
            .map(llm::provider_from_credentials)
            .ok_or_else(|| DocServeError::ProviderNotConfigured {
                provider: "openai".into(),
                hint: "assisted conversion needs an API key in the request".into(),
            })
    }

    /// Refine every page through the LLM; failed pages keep their text layer.
    async fn refine_pages(
        &self,
        pages: Vec<RenderedPage>,
        config: &ConversionConfig,
    ) -> Result<Vec<(usize, String)>, DocServeError> {
        let provider = self.provider_for(config)?;
        let describe_images = config.disable_image_extraction;
        let clean = CleanOptions {
            drop_images: describe_images,
        };

        let mut jobs = Vec::with_capacity(pages.len());
        for page in pages {
            let image = page.image.as_ref().ok_or_else(|| {
                DocServeError::Internal(format!("page {} was not rasterised", page.index + 1))
            })?;
            let data = encode::encode_page(image).map_err(|e| DocServeError::Converter {
                backend: BACKEND.into(),
                detail: format!("image encoding failed on page {}: {e}", page.index + 1),
            })?;
            jobs.push((page.index + 1, data, page.text));
        }

        let total = jobs.len();
        let settings = &self.settings;
        let mut outcomes: Vec<(usize, Result<String, String>, String)> =
            stream::iter(jobs.into_iter().map(|(page_num, data, text)| {
                let provider = Arc::clone(&provider);
                async move {
                    let result =
                        llm::refine_page(&provider, page_num, data, &text, settings, describe_images)
                            .await;
                    (page_num, result, text)
                }
            }))
            .buffer_unordered(settings.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(page_num, _, _)| *page_num);

        let failed = outcomes.iter().filter(|(_, r, _)| r.is_err()).count();
        if total > 0 && failed == total {
            let first = outcomes
                .iter()
                .find_map(|(_, r, _)| r.as_ref().err().cloned())
                .unwrap_or_default();
            return Err(DocServeError::Converter {
                backend: BACKEND.into(),
                detail: format!("LLM refinement failed on all {total} pages: {first}"),
            });
        }
        if failed > 0 {
            warn!("{failed}/{total} pages kept their text layer after LLM failures");
        }

        Ok(outcomes
            .into_iter()
            .map(|(page_num, result, text)| {
                let markdown = match result {
                    Ok(md) => clean_markdown(&md, clean),
                    Err(_) => clean_markdown(&text, clean),
                };
                (page_num, markdown)
            })
            .collect())
    }
}

#[async_trait]
impl DocumentConverter for PdfiumConverter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn render(
        &self,
        path: &Path,
        config: &ConversionConfig,
    ) -> Result<RenderedDocument, DocServeError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if extension != "pdf" {
            return Err(DocServeError::UnsupportedByBackend {
                backend: BACKEND,
                feature: format!("'.{extension}' input (PDF only)"),
            });
        }
        if config.force_ocr {
            return Err(DocServeError::UnsupportedByBackend {
                backend: BACKEND,
                feature: "forced OCR".into(),
            });
        }

        let raster = config
            .use_llm
            .then_some((self.settings.dpi, self.settings.max_rendered_pixels));
        let pages = load_pages(path, self.lib_dir.clone(), raster).await?;
        info!(
            "pdfium: {} pages from {} (use_llm={})",
            pages.len(),
            path.display(),
            config.use_llm
        );

        let markdown_pages = if config.use_llm {
            self.refine_pages(pages, config).await?
        } else {
            let clean = CleanOptions::default();
            pages
                .into_iter()
                .map(|p| (p.index + 1, clean_markdown(&p.text, clean)))
                .collect()
        };

        Ok(render_output(
            &markdown_pages,
            config.output_format,
            self.settings.page_separator,
        ))
    }
}

/// Join non-empty pages with the configured separator.
fn assemble_markdown(pages: &[(usize, String)], separator: PageSeparator) -> String {
    let mut out = String::new();
    for (page_num, markdown) in pages.iter().filter(|(_, md)| !md.trim().is_empty()) {
        if !out.is_empty() {
            out.truncate(out.trim_end().len());
            out.push_str(&separator.render(*page_num));
        }
        out.push_str(markdown);
    }
    out
}

/// Shape per-page markdown into the requested output format.
fn render_output(
    pages: &[(usize, String)],
    format: OutputFormat,
    separator: PageSeparator,
) -> RenderedDocument {
    match format {
        OutputFormat::Markdown => RenderedDocument::Markdown(assemble_markdown(pages, separator)),
        OutputFormat::Html => {
            let markdown = assemble_markdown(pages, separator);
            let options = pulldown_cmark::Options::ENABLE_TABLES
                | pulldown_cmark::Options::ENABLE_STRIKETHROUGH;
            let parser = pulldown_cmark::Parser::new_ext(&markdown, options);
            let mut html = String::new();
            pulldown_cmark::html::push_html(&mut html, parser);
            RenderedDocument::Html(html)
        }
        OutputFormat::Json => RenderedDocument::Json(json!({
            "page_count": pages.len(),
            "pages": pages
                .iter()
                .map(|(page, markdown)| json!({ "page": page, "markdown": markdown }))
                .collect::<Vec<_>>(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionMode, ProviderCredentials};
    use crate::converter::text_from_rendered;
    use edgequake_llm::{
        ChatMessage, CompletionOptions, LLMResponse, LlmError, MockProvider,
    };
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every page with a fixed reply, except pages whose text layer
    /// contains `UNREADABLE`, which always fail.
    struct ScriptedProvider {
        reply: String,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        fn max_context_length(&self) -> usize {
            4096
        }

        async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            Ok(LLMResponse::new(self.reply.clone(), "scripted-model"))
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.complete(prompt).await
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if messages.iter().any(|m| m.content.contains("UNREADABLE")) {
                return Err(LlmError::ApiError("503 upstream overloaded".into()));
            }
            self.complete("").await
        }
    }

    fn scanned(texts: &[&str]) -> Vec<RenderedPage> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| RenderedPage {
                index,
                text: text.to_string(),
                image: Some(DynamicImage::new_rgb8(8, 8)),
            })
            .collect()
    }

    fn assisted() -> ConversionConfig {
        ConversionConfig::for_mode(
            ConversionMode::Llm,
            OutputFormat::Markdown,
            Some(ProviderCredentials::new("sk-unused", None)),
        )
        .unwrap()
    }

    fn quick_retries() -> PdfiumSettings {
        PdfiumSettings {
            max_retries: 1,
            retry_backoff_ms: 0,
            ..PdfiumSettings::default()
        }
    }

    fn pages() -> Vec<(usize, String)> {
        vec![
            (1, "# Intro\n\nHello.\n".to_string()),
            (2, "\n".to_string()),
            (3, "| a | b |\n| --- | --- |\n| 1 | 2 |\n".to_string()),
        ]
    }

    #[test]
    fn markdown_skips_blank_pages() {
        let md = text_from_rendered(&render_output(&pages(), OutputFormat::Markdown, PageSeparator::None));
        assert_eq!(md, "# Intro\n\nHello.\n\n| a | b |\n| --- | --- |\n| 1 | 2 |\n");
    }

    #[test]
    fn markdown_uses_separator() {
        let md = text_from_rendered(&render_output(&pages(), OutputFormat::Markdown, PageSeparator::Comment));
        assert!(md.contains("Hello.\n\n<!-- page 3 -->\n\n| a | b |"), "got: {md}");
    }

    #[test]
    fn html_renders_tables_and_headings() {
        let html = text_from_rendered(&render_output(&pages(), OutputFormat::Html, PageSeparator::None));
        assert!(html.contains("<h1>Intro</h1>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn json_lists_pages() {
        match render_output(&pages(), OutputFormat::Json, PageSeparator::None) {
            RenderedDocument::Json(v) => {
                assert_eq!(v["page_count"], 3);
                assert_eq!(v["pages"][2]["page"], 3);
            }
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_non_pdf_and_forced_ocr_before_binding() {
        let converter = PdfiumConverter::new(None);
        let err = converter
            .render(Path::new("/tmp/slides.pptx"), &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocServeError::UnsupportedByBackend { .. }));

        let ocr = ConversionConfig::for_mode(ConversionMode::Ocr, OutputFormat::Markdown, None).unwrap();
        let err = converter.render(Path::new("/tmp/a.pdf"), &ocr).await.unwrap_err();
        assert!(err.to_string().contains("forced OCR"));
    }

    #[test]
    fn provider_requires_credentials_without_override() {
        let converter = PdfiumConverter::new(None);
        let err = converter.provider_for(&ConversionConfig::default()).err().unwrap();
        assert!(matches!(err, DocServeError::ProviderNotConfigured { .. }));

        let config = ConversionConfig::for_mode(
            ConversionMode::Llm,
            OutputFormat::Markdown,
            Some(ProviderCredentials::new("sk-x", None)),
        )
        .unwrap();
        assert!(converter.provider_for(&config).is_ok());
    }

    #[tokio::test]
    async fn refined_pages_are_cleaned_and_images_described() {
        let mock = MockProvider::new();
        mock.add_response("```markdown\n# Results\r\n\n![Bar chart](fig1.png)\n```")
            .await;
        let converter = PdfiumConverter::new(None).with_provider(Arc::new(mock));

        let pages = converter
            .refine_pages(scanned(&["Results  fig 1"]), &assisted())
            .await
            .unwrap();
        assert_eq!(pages, vec![(1, "# Results\n\n*Bar chart*\n".to_string())]);
    }

    #[tokio::test]
    async fn failed_pages_keep_their_text_layer() {
        let provider = ScriptedProvider::new("# Refined\n");
        let converter = PdfiumConverter::new(None)
            .with_settings(quick_retries())
            .with_provider(provider.clone());

        let pages = converter
            .refine_pages(
                scanned(&["first", "UNREADABLE scan\r\n\u{00AD}", "third"]),
                &assisted(),
            )
            .await
            .unwrap();
        assert_eq!(
            pages,
            vec![
                (1, "# Refined\n".to_string()),
                (2, "UNREADABLE scan\n".to_string()),
                (3, "# Refined\n".to_string()),
            ]
        );
        // Two good pages once each, the bad page once plus one retry.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn every_page_failing_is_a_converter_error() {
        let provider = ScriptedProvider::new("unused");
        let converter = PdfiumConverter::new(None)
            .with_settings(quick_retries())
            .with_provider(provider.clone());

        let err = converter
            .refine_pages(scanned(&["UNREADABLE a", "UNREADABLE b"]), &assisted())
            .await
            .unwrap_err();
        assert!(matches!(err, DocServeError::Converter { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("all 2 pages"), "got: {err}");
        assert!(err.to_string().contains("503 upstream overloaded"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn settings_are_normalised_on_install() {
        let converter = PdfiumConverter::new(None).with_settings(PdfiumSettings {
            dpi: 10,
            concurrency: 0,
            ..PdfiumSettings::default()
        });
        assert_eq!(converter.settings().dpi, 72);
        assert_eq!(converter.settings().concurrency, 1);
    }
}
