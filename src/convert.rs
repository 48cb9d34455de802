//! Conversion entry points.
//!
//! Every conversion, whatever its mode, goes through [`convert`]: build a
//! [`ConversionConfig`], hand it to the backend, reduce the rendered document
//! to text, and refuse an empty result. The three mode functions are thin
//! presets over it, and [`convert_document`] adds what the HTTP layer needs
//! to describe the result.

use crate::config::{ConversionConfig, ConversionMode, OutputFormat, ProviderCredentials};
use crate::converter::{text_from_rendered, DocumentConverter};
use crate::error::DocServeError;
use crate::output::ConversionResult;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Run `converter` on `path` and return the extracted text.
///
/// # Errors
/// - [`DocServeError::ConversionTimeout`] when `timeout` elapses first
/// - [`DocServeError::ConversionFailed`] when the text is empty or whitespace
/// - whatever the converter itself returned
pub async fn convert(
    converter: &dyn DocumentConverter,
    path: &Path,
    config: &ConversionConfig,
    timeout: Option<Duration>,
) -> Result<String, DocServeError> {
    let start = Instant::now();
    info!(
        "Converting {} with {} (mode={}, format={})",
        path.display(),
        converter.name(),
        config.mode().label(),
        config.output_format
    );
    debug!("{config:?}");

    let rendered = match timeout {
        Some(limit) => tokio::time::timeout(limit, converter.render(path, config))
            .await
            .map_err(|_| DocServeError::ConversionTimeout {
                secs: limit.as_secs(),
            })??,
        None => converter.render(path, config).await?,
    };

    let text = text_from_rendered(&rendered);
    if text.trim().is_empty() {
        return Err(DocServeError::ConversionFailed {
            detail: format!("{} produced no text", converter.name()),
        });
    }

    info!(
        "Converted {} → {} chars in {}ms",
        path.display(),
        text.len(),
        start.elapsed().as_millis()
    );
    Ok(text)
}

/// Layout-aware conversion with default settings.
pub async fn convert_standard(
    converter: &dyn DocumentConverter,
    path: &Path,
    output_format: OutputFormat,
    timeout: Option<Duration>,
) -> Result<String, DocServeError> {
    let config = ConversionConfig::for_mode(ConversionMode::Standard, output_format, None)?;
    convert(converter, path, &config, timeout).await
}

/// Conversion with OCR forced on every page and no LLM.
pub async fn convert_ocr_only(
    converter: &dyn DocumentConverter,
    path: &Path,
    output_format: OutputFormat,
    timeout: Option<Duration>,
) -> Result<String, DocServeError> {
    let config = ConversionConfig::for_mode(ConversionMode::Ocr, output_format, None)?;
    convert(converter, path, &config, timeout).await
}

/// LLM-assisted conversion. `credentials` are scoped to this call.
pub async fn convert_with_assist(
    converter: &dyn DocumentConverter,
    path: &Path,
    credentials: ProviderCredentials,
    output_format: OutputFormat,
    timeout: Option<Duration>,
) -> Result<String, DocServeError> {
    let config = ConversionConfig::for_mode(ConversionMode::Llm, output_format, Some(credentials))?;
    convert(converter, path, &config, timeout).await
}

/// Convert in `mode` and package the text as a [`ConversionResult`].
///
/// `file_type` is the validated upload extension reported back to the
/// client. `credentials` is only read for [`ConversionMode::Llm`], where it
/// is required.
pub async fn convert_document(
    converter: &dyn DocumentConverter,
    path: &Path,
    file_type: &str,
    mode: ConversionMode,
    output_format: OutputFormat,
    credentials: Option<ProviderCredentials>,
    timeout: Option<Duration>,
) -> Result<ConversionResult, DocServeError> {
    let (text, model) = match mode {
        ConversionMode::Standard => (
            convert_standard(converter, path, output_format, timeout).await?,
            None,
        ),
        ConversionMode::Ocr => (
            convert_ocr_only(converter, path, output_format, timeout).await?,
            None,
        ),
        ConversionMode::Llm => {
            let credentials = credentials.ok_or_else(|| DocServeError::MissingField {
                field: "api_key",
                hint: "an API key is required for LLM-assisted conversion".into(),
            })?;
            let model = credentials.model.clone();
            let text =
                convert_with_assist(converter, path, credentials, output_format, timeout).await?;
            (text, Some(model))
        }
    };

    Ok(ConversionResult {
        text,
        file_type: file_type.to_string(),
        mode,
        output_format,
        model,
    })
}
