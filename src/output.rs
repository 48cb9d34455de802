//! Output types produced by the conversion facade.

use crate::config::{ConversionMode, OutputFormat};
use serde::Serialize;

/// Text extracted from one document, plus what is needed to describe it.
///
/// Lives only for the duration of a request; the response formatter turns
/// it into JSON or a markdown download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    /// Extracted text in `output_format`. Never empty.
    pub text: String,
    /// Lowercase extension of the uploaded file.
    pub file_type: String,
    /// Preset used for the conversion.
    pub mode: ConversionMode,
    /// Representation of `text`.
    pub output_format: OutputFormat,
    /// Model used by the assisted mode.
    pub model: Option<String>,
}
