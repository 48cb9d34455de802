//! Configuration types for document conversion and for the HTTP service.
//!
//! Two structs carry every knob:
//!
//! * [`ConversionConfig`] — one value object per conversion. The three
//!   conversion modes (standard, OCR-forced, LLM-assisted) are not three
//!   code paths but three presets of this one struct, built by
//!   [`ConversionConfig::for_mode`]. Converters read named fields instead of
//!   an untyped configuration map.
//! * [`ServiceConfig`] — process-wide settings for the server (bind address,
//!   fixed upload directory, backend, limits), including the pdfium
//!   backend's [`PdfiumSettings`].
//!
//! Credentials for the LLM provider live inside [`ConversionConfig`] and
//! travel with the request. Nothing here reads or writes process
//! environment variables.

use crate::error::DocServeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Model used by the assisted mode when the caller does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

// ── Enums ────────────────────────────────────────────────────────────────

/// Text representation the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Html,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
        }
    }

    /// File extension of a rendered document in this format.
    pub fn file_extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DocServeError;

    /// Exact, lowercase match, as the HTTP contract requires.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            other => Err(DocServeError::InvalidOutputFormat {
                value: other.to_string(),
            }),
        }
    }
}

/// Which of the three conversion presets a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    #[default]
    Standard,
    Ocr,
    Llm,
}

impl ConversionMode {
    /// Label reported as `conversion_type` in responses.
    pub fn label(self) -> &'static str {
        match self {
            ConversionMode::Standard => "standard",
            ConversionMode::Ocr => "ocr",
            ConversionMode::Llm => "gpt",
        }
    }
}

impl FromStr for ConversionMode {
    type Err = DocServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(ConversionMode::Standard),
            "ocr" => Ok(ConversionMode::Ocr),
            "llm" | "gpt" => Ok(ConversionMode::Llm),
            other => Err(DocServeError::InvalidConfig(format!(
                "unknown conversion mode '{other}' (expected standard, ocr or llm)"
            ))),
        }
    }
}

/// Which converter implementation the service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External `marker_single` converter, all formats and modes.
    #[default]
    Marker,
    /// In-process pdfium text layer plus optional vision-LLM pass; PDF only.
    Pdfium,
}

impl FromStr for BackendKind {
    type Err = DocServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "marker" => Ok(BackendKind::Marker),
            "pdfium" => Ok(BackendKind::Pdfium),
            other => Err(DocServeError::InvalidConfig(format!(
                "unknown backend '{other}' (expected marker or pdfium)"
            ))),
        }
    }
}

/// How to separate pages when a backend assembles per-page markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
        }
    }
}

impl FromStr for PageSeparator {
    type Err = DocServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PageSeparator::None),
            "hr" | "rule" => Ok(PageSeparator::HorizontalRule),
            "comment" => Ok(PageSeparator::Comment),
            other => Err(DocServeError::InvalidConfig(format!(
                "unknown page separator '{other}' (expected none, hr or comment)"
            ))),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// API key and model for the LLM provider, scoped to one conversion.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub model: String,
}

impl ProviderCredentials {
    /// Credentials with `model` defaulting to [`DEFAULT_MODEL`] when empty.
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            api_key: api_key.into(),
            model,
        }
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

// ── ConversionConfig ─────────────────────────────────────────────────────

/// Configuration for a single document conversion.
///
/// Built via [`ConversionConfig::for_mode`], [`ConversionConfig::builder()`]
/// or [`ConversionConfig::default()`] (standard mode, markdown output).
///
/// # Example
/// ```rust
/// use edgequake_docserve::{ConversionConfig, ConversionMode, OutputFormat, ProviderCredentials};
///
/// let config = ConversionConfig::for_mode(
///     ConversionMode::Llm,
///     OutputFormat::Html,
///     Some(ProviderCredentials::new("sk-test", None)),
/// )
/// .unwrap();
/// assert!(config.use_llm);
/// assert!(config.disable_image_extraction);
/// ```
#[derive(Clone, Default)]
pub struct ConversionConfig {
    /// Representation the converter should render. Default: markdown.
    pub output_format: OutputFormat,

    /// OCR every page even when a text layer exists. Default: false.
    pub force_ocr: bool,

    /// Let the converter call the LLM provider to refine content. Default: false.
    pub use_llm: bool,

    /// Do not extract embedded images into the output. Default: false.
    ///
    /// The assisted preset turns this on: the LLM describes figures in text
    /// instead, and a JSON response has nowhere to put image files anyway.
    pub disable_image_extraction: bool,

    /// Provider credentials; required when `use_llm` is set.
    pub credentials: Option<ProviderCredentials>,
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("output_format", &self.output_format)
            .field("force_ocr", &self.force_ocr)
            .field("use_llm", &self.use_llm)
            .field("disable_image_extraction", &self.disable_image_extraction)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Preset for one of the three conversion modes.
    ///
    /// | Mode | force_ocr | use_llm | disable_image_extraction |
    /// |------|-----------|---------|--------------------------|
    /// | Standard | false | false | false |
    /// | Ocr | true | false | false |
    /// | Llm | false | true | true |
    pub fn for_mode(
        mode: ConversionMode,
        output_format: OutputFormat,
        credentials: Option<ProviderCredentials>,
    ) -> Result<Self, DocServeError> {
        let builder = Self::builder().output_format(output_format);
        let builder = match mode {
            ConversionMode::Standard => builder,
            ConversionMode::Ocr => builder.force_ocr(true).use_llm(false),
            ConversionMode::Llm => {
                let builder = builder.use_llm(true).disable_image_extraction(true);
                match credentials {
                    Some(c) => builder.credentials(c),
                    None => builder,
                }
            }
        };
        builder.build()
    }

    /// The mode this configuration corresponds to.
    pub fn mode(&self) -> ConversionMode {
        if self.use_llm {
            ConversionMode::Llm
        } else if self.force_ocr {
            ConversionMode::Ocr
        } else {
            ConversionMode::Standard
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn force_ocr(mut self, v: bool) -> Self {
        self.config.force_ocr = v;
        self
    }

    pub fn use_llm(mut self, v: bool) -> Self {
        self.config.use_llm = v;
        self
    }

    pub fn disable_image_extraction(mut self, v: bool) -> Self {
        self.config.disable_image_extraction = v;
        self
    }

    pub fn credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, DocServeError> {
        let c = &self.config;
        if c.use_llm {
            let has_key = c
                .credentials
                .as_ref()
                .is_some_and(|cred| !cred.api_key.trim().is_empty());
            if !has_key {
                return Err(DocServeError::MissingField {
                    field: "api_key",
                    hint: "an OpenAI API key is required when the LLM is enabled".into(),
                });
            }
        }
        Ok(self.config)
    }
}

// ── PdfiumSettings ───────────────────────────────────────────────────────

/// Rendering and refinement tuning for the pdfium backend.
///
/// These belong to the deployment, not to a request: the server sets them
/// once from `docserve serve` flags and every conversion shares them.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfiumSettings {
    /// Rendering DPI used when rasterising pages for the LLM. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent LLM calls per document. Default: 4.
    pub concurrency: usize,

    /// Sampling temperature for the refinement pass. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on a transient LLM failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Page separator used when per-page text is assembled. Default: none.
    pub page_separator: PageSeparator,
}

impl Default for PdfiumSettings {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 4,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            page_separator: PageSeparator::default(),
        }
    }
}

impl PdfiumSettings {
    /// Clamp every knob into its supported range.
    pub fn normalized(mut self) -> Self {
        self.dpi = self.dpi.clamp(72, 400);
        self.max_rendered_pixels = self.max_rendered_pixels.max(100);
        self.concurrency = self.concurrency.max(1);
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.max_tokens = self.max_tokens.max(1);
        self
    }
}

// ── ServiceConfig ────────────────────────────────────────────────────────

/// Settings for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the server listens on. Default: `0.0.0.0:8000`.
    pub bind: SocketAddr,

    /// Shared directory for the binary-upload routes. Default: `/pd`.
    ///
    /// Files written here are kept after the request; an external process
    /// may collect them.
    pub upload_dir: PathBuf,

    /// Converter implementation. Default: marker.
    pub backend: BackendKind,

    /// Executable of the external marker converter. Default: `marker_single`.
    pub marker_bin: PathBuf,

    /// Directory holding the pdfium shared library; `None` binds the system library.
    pub pdfium_lib_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes. Default: 100 MiB.
    pub max_upload_bytes: usize,

    /// Per-conversion timeout in seconds; 0 disables it. Default: 0.
    pub conversion_timeout_secs: u64,

    /// Conversions allowed to run at the same time. Default: 2.
    pub max_concurrent_conversions: usize,

    /// Model used by assisted requests that do not name one. Default: `gpt-4o`.
    pub default_model: String,

    /// Tuning for the pdfium backend; ignored by marker.
    pub pdfium: PdfiumSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            upload_dir: PathBuf::from("/pd"),
            backend: BackendKind::default(),
            marker_bin: PathBuf::from("marker_single"),
            pdfium_lib_dir: None,
            max_upload_bytes: 100 * 1024 * 1024,
            conversion_timeout_secs: 0,
            max_concurrent_conversions: 2,
            default_model: DEFAULT_MODEL.to_string(),
            pdfium: PdfiumSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Timeout as a `Duration`, `None` when disabled.
    pub fn conversion_timeout(&self) -> Option<std::time::Duration> {
        (self.conversion_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.conversion_timeout_secs))
    }
}
