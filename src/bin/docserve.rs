//! CLI binary for edgequake-docserve.
//!
//! `docserve serve` runs the HTTP service; `docserve convert` runs one
//! conversion through the same facade and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_docserve::input::resolve_input;
use edgequake_docserve::{
    build_converter, convert_document, serve, BackendKind, ConversionMode, OutputFormat,
    PageSeparator, PdfiumSettings, ProviderCredentials, ServiceConfig, DEFAULT_MODEL,
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  docserve serve --upload-dir /pd
  docserve serve --backend pdfium --pdfium-lib /opt/pdfium/lib --dpi 200 --separator hr
  docserve convert report.docx --format html
  docserve convert https://arxiv.org/pdf/1706.03762 --mode llm --api-key sk-... -o paper.md

ROUTES (serve):
  GET  /documents/health
  POST /documents/{standard,ocr,gpt}           multipart: file, output_format, api_key, model_name
  POST /documents/{parse,parse-pdf}            multipart: file, use_llm, force_ocr, openai_api_key
  POST /documents/{standard,ocr,gpt}/binary    raw body; ?file_name=&output_format=&api_key=

ENVIRONMENT:
  Every flag has a DOCSERVE_* fallback (see --help). A .env file in the
  working directory is loaded first. RUST_LOG overrides -v / -q.
"#;

/// Document conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "docserve",
    version,
    about = "Convert PDF, Office and image documents to Markdown, JSON or HTML over HTTP",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSERVE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSERVE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Convert one file or URL and print the result.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Converter backend: marker or pdfium.
    #[arg(long, env = "DOCSERVE_BACKEND", default_value = "marker")]
    backend: BackendKind,

    /// marker_single executable.
    #[arg(long, env = "DOCSERVE_MARKER_BIN", default_value = "marker_single")]
    marker_bin: PathBuf,

    /// Directory containing libpdfium (pdfium backend). System library when unset.
    #[arg(long, env = "DOCSERVE_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Per-conversion timeout in seconds (0 = none).
    #[arg(long, env = "DOCSERVE_TIMEOUT", default_value_t = 0)]
    timeout: u64,

    #[command(flatten)]
    pdfium: PdfiumArgs,
}

/// Tuning for the pdfium backend; marker ignores these.
#[derive(Args, Debug)]
struct PdfiumArgs {
    /// Rendering DPI for pages sent to the LLM (72–400).
    #[arg(long, env = "DOCSERVE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest edge of a rendered page in pixels.
    #[arg(long, env = "DOCSERVE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Concurrent LLM calls per document.
    #[arg(long, env = "DOCSERVE_LLM_CONCURRENCY", default_value_t = 4)]
    llm_concurrency: usize,

    /// Page separator: none, hr or comment.
    #[arg(long, env = "DOCSERVE_SEPARATOR", default_value = "none")]
    separator: PageSeparator,

    /// Max LLM output tokens per page.
    #[arg(long, env = "DOCSERVE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCSERVE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page on LLM failure.
    #[arg(long, env = "DOCSERVE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds, doubled on each retry.
    #[arg(long, env = "DOCSERVE_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,
}

impl From<PdfiumArgs> for PdfiumSettings {
    fn from(args: PdfiumArgs) -> Self {
        PdfiumSettings {
            dpi: args.dpi,
            max_rendered_pixels: args.max_pixels,
            concurrency: args.llm_concurrency,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            max_retries: args.max_retries,
            retry_backoff_ms: args.retry_backoff_ms,
            page_separator: args.separator,
        }
        .normalized()
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "DOCSERVE_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Shared directory for the binary-upload routes.
    #[arg(long, env = "DOCSERVE_UPLOAD_DIR", default_value = "/pd")]
    upload_dir: PathBuf,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "DOCSERVE_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,

    /// Conversions allowed to run at the same time.
    #[arg(short, long, env = "DOCSERVE_WORKERS", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    workers: u64,

    /// Model for assisted requests that do not name one.
    #[arg(long, env = "DOCSERVE_DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    default_model: String,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local file path or HTTP/HTTPS URL.
    input: String,

    /// Conversion mode: standard, ocr or llm.
    #[arg(long, default_value = "standard")]
    mode: ConversionMode,

    /// Output format: markdown, json or html.
    #[arg(long, default_value = "markdown")]
    format: OutputFormat,

    /// OpenAI API key (llm mode).
    #[arg(long, env = "DOCSERVE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model for llm mode.
    #[arg(long, env = "DOCSERVE_MODEL")]
    model: Option<String>,

    /// Write the result to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "DOCSERVE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[command(flatten)]
    backend: BackendArgs,
}

impl BackendArgs {
    fn apply(self, settings: &mut ServiceConfig) {
        settings.backend = self.backend;
        settings.marker_bin = self.marker_bin;
        settings.pdfium_lib_dir = self.pdfium_lib;
        settings.conversion_timeout_secs = self.timeout;
        settings.pdfium = self.pdfium.into();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Convert(args) => run_convert(args, cli.quiet).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut settings = ServiceConfig {
        bind: args.bind,
        upload_dir: args.upload_dir,
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        max_concurrent_conversions: args.workers as usize,
        default_model: args.default_model,
        ..ServiceConfig::default()
    };
    args.backend.apply(&mut settings);

    serve(settings).await.context("docserve server stopped with an error")
}

async fn run_convert(args: ConvertArgs, quiet: bool) -> Result<()> {
    let start = Instant::now();
    let mut settings = ServiceConfig::default();
    args.backend.apply(&mut settings);

    let credentials = match args.mode {
        ConversionMode::Llm => {
            let key = args
                .api_key
                .context("--api-key (or DOCSERVE_API_KEY) is required for --mode llm")?;
            Some(ProviderCredentials::new(key, args.model))
        }
        _ => None,
    };

    let resolved = resolve_input(&args.input, args.download_timeout)
        .await
        .with_context(|| format!("Cannot read input '{}'", args.input))?;

    let converter = build_converter(&settings);
    let result = convert_document(
        converter.as_ref(),
        resolved.path(),
        &resolved.file_type(),
        args.mode,
        args.format,
        credentials,
        settings.conversion_timeout(),
    )
    .await
    .with_context(|| format!("Conversion of '{}' failed", args.input))?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &result.text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(result.text.as_bytes())?;
            out.flush()?;
        }
    }

    if !quiet {
        eprintln!(
            "✔ {} ({}, {}) → {} chars in {:.1}s{}",
            args.input,
            result.mode.label(),
            result.output_format,
            result.text.len(),
            start.elapsed().as_secs_f64(),
            args.output
                .map(|p| format!(" → {}", p.display()))
                .unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Serve(args) => args,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn pdfium_flags_reach_service_settings() {
        let args = serve_args(&[
            "docserve",
            "serve",
            "--backend",
            "pdfium",
            "--dpi",
            "200",
            "--separator",
            "comment",
            "--max-retries",
            "5",
            "--llm-concurrency",
            "0",
        ]);
        let mut settings = ServiceConfig::default();
        args.backend.apply(&mut settings);

        assert_eq!(settings.backend, BackendKind::Pdfium);
        assert_eq!(settings.pdfium.dpi, 200);
        assert_eq!(settings.pdfium.page_separator, PageSeparator::Comment);
        assert_eq!(settings.pdfium.max_retries, 5);
        assert_eq!(settings.pdfium.concurrency, 1);
    }

    #[test]
    fn out_of_range_dpi_is_rejected() {
        assert!(Cli::try_parse_from(["docserve", "serve", "--dpi", "20"]).is_err());
        assert!(Cli::try_parse_from(["docserve", "serve", "--separator", "dashes"]).is_err());
    }
}
