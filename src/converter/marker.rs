//! Backend that drives the external `marker` document converter.
//!
//! marker handles PDFs, Office documents, images, EPUB and HTML, with
//! optional forced OCR and LLM refinement. We run its single-file CLI as a
//! child process:
//!
//! ```text
//! marker_single <input> --output_dir <scratch>/out --output_format <fmt>
//!               --config_json <scratch>/config.json
//! ```
//!
//! The configuration map (mode flags and, for the assisted mode, the LLM
//! service and credentials) goes into `config.json` inside a private scratch
//! directory. Credentials therefore never appear on the command line or in
//! this process's environment. marker writes `<out>/<stem>/<stem>.<ext>`,
//! which becomes the [`RenderedDocument`].
//!
//! The child is spawned with `kill_on_drop`, so a caller-side timeout that
//! drops the future also stops the conversion.

use super::{DocumentConverter, RenderedDocument};
use crate::config::{ConversionConfig, OutputFormat};
use crate::error::DocServeError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Python class marker loads for OpenAI-backed refinement.
pub const OPENAI_LLM_SERVICE: &str = "marker.services.openai.OpenAIService";

/// How much of the child's stderr ends up in an error message.
const STDERR_TAIL_BYTES: usize = 2000;

/// Converter backed by the `marker_single` executable.
#[derive(Debug, Clone)]
pub struct MarkerConverter {
    program: PathBuf,
    prefix_args: Vec<String>,
}

impl MarkerConverter {
    /// Use `program` (looked up on `PATH` when relative) as the converter.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Arguments placed before the input path, e.g. `-m marker.scripts.convert_single`
    /// when `program` is a Python interpreter.
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The configuration map handed to marker for `config`.
    pub fn config_map(config: &ConversionConfig) -> Value {
        let mut map = json!({
            "output_format": config.output_format.as_str(),
            "force_ocr": config.force_ocr,
            "use_llm": config.use_llm,
            "disable_image_extraction": config.disable_image_extraction,
        });
        if config.use_llm {
            if let Some(ref cred) = config.credentials {
                map["llm_service"] = json!(OPENAI_LLM_SERVICE);
                map["openai_api_key"] = json!(cred.api_key);
                map["openai_model"] = json!(cred.model);
            }
        }
        map
    }

    fn command(&self, input: &Path, out_dir: &Path, config_path: &Path, format: OutputFormat) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .arg(input)
            .arg("--output_dir")
            .arg(out_dir)
            .args(["--output_format", format.as_str()])
            .arg("--config_json")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn error(&self, detail: impl Into<String>) -> DocServeError {
        DocServeError::Converter {
            backend: self.name().to_string(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for MarkerConverter {
    fn name(&self) -> &'static str {
        "marker"
    }

    async fn render(
        &self,
        path: &Path,
        config: &ConversionConfig,
    ) -> Result<RenderedDocument, DocServeError> {
        let scratch = tempfile::Builder::new()
            .prefix("docserve-marker-")
            .tempdir()
            .map_err(|e| DocServeError::fs(std::env::temp_dir(), e))?;
        let out_dir = scratch.path().join("out");
        let config_path = scratch.path().join("config.json");

        let config_json = serde_json::to_vec_pretty(&Self::config_map(config))
            .map_err(|e| DocServeError::Internal(format!("config serialisation: {e}")))?;
        tokio::fs::write(&config_path, config_json)
            .await
            .map_err(|e| DocServeError::fs(&config_path, e))?;

        info!(
            "marker: converting {} (format={}, force_ocr={}, use_llm={})",
            path.display(),
            config.output_format,
            config.force_ocr,
            config.use_llm
        );

        let output = self
            .command(path, &out_dir, &config_path, config.output_format)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    self.error(format!(
                        "'{}' not found. Install marker (pip install marker-pdf) \
                         or set DOCSERVE_MARKER_BIN.",
                        self.program.display()
                    ))
                } else {
                    self.error(format!("failed to start '{}': {e}", self.program.display()))
                }
            })?;

        debug!(
            "marker: exit={} stdout={}B stderr={}B",
            output.status,
            output.stdout.len(),
            output.stderr.len()
        );

        if !output.status.success() {
            return Err(self.error(format!(
                "{} ({})",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = config.output_format.file_extension();
        let rendered_path = locate_output(out_dir, stem, extension)
            .await?
            .ok_or_else(|| DocServeError::ConversionFailed {
                detail: format!("marker produced no .{extension} output"),
            })?;

        let contents = tokio::fs::read_to_string(&rendered_path)
            .await
            .map_err(|e| DocServeError::fs(&rendered_path, e))?;

        // `scratch` (config with credentials, marker output) is removed here.
        match config.output_format {
            OutputFormat::Markdown => Ok(RenderedDocument::Markdown(contents)),
            OutputFormat::Html => Ok(RenderedDocument::Html(contents)),
            OutputFormat::Json => serde_json::from_str(&contents)
                .map(RenderedDocument::Json)
                .map_err(|e| self.error(format!("invalid JSON output: {e}"))),
        }
    }
}

/// Find marker's output: `<out>/<stem>/<stem>.<ext>`, else the first
/// `*.<ext>` file at most one directory below `out`.
async fn locate_output(
    out_dir: PathBuf,
    stem: String,
    extension: &'static str,
) -> Result<Option<PathBuf>, DocServeError> {
    let expected = out_dir.join(&stem).join(format!("{stem}.{extension}"));
    if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
        return Ok(Some(expected));
    }

    tokio::task::spawn_blocking(move || scan_for_extension(&out_dir, extension))
        .await
        .map_err(|e| DocServeError::Internal(format!("output scan task panicked: {e}")))
}

fn scan_for_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let has_ext = |p: &Path| p.extension().is_some_and(|e| e == extension);
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    if let Some(found) = entries.iter().find(|p| p.is_file() && has_ext(p)) {
        return Some(found.clone());
    }
    entries.iter().filter(|p| p.is_dir()).find_map(|sub| {
        let mut files: Vec<PathBuf> = std::fs::read_dir(sub)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_ext(p))
            .collect();
        files.sort();
        files.into_iter().next()
    })
}

/// Last few lines of the child's stderr, for error messages.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionMode, ProviderCredentials};

    fn cfg(mode: ConversionMode, format: OutputFormat) -> ConversionConfig {
        let cred = (mode == ConversionMode::Llm)
            .then(|| ProviderCredentials::new("sk-marker", Some("gpt-4o-mini".into())));
        ConversionConfig::for_mode(mode, format, cred).unwrap()
    }

    #[test]
    fn config_map_per_mode() {
        let standard = MarkerConverter::config_map(&cfg(ConversionMode::Standard, OutputFormat::Markdown));
        assert_eq!(standard["output_format"], "markdown");
        assert_eq!(standard["force_ocr"], false);
        assert_eq!(standard["use_llm"], false);
        assert!(standard.get("openai_api_key").is_none());

        let ocr = MarkerConverter::config_map(&cfg(ConversionMode::Ocr, OutputFormat::Html));
        assert_eq!(ocr["force_ocr"], true);
        assert_eq!(ocr["use_llm"], false);

        let llm = MarkerConverter::config_map(&cfg(ConversionMode::Llm, OutputFormat::Json));
        assert_eq!(llm["use_llm"], true);
        assert_eq!(llm["disable_image_extraction"], true);
        assert_eq!(llm["llm_service"], OPENAI_LLM_SERVICE);
        assert_eq!(llm["openai_api_key"], "sk-marker");
        assert_eq!(llm["openai_model"], "gpt-4o-mini");
    }

    #[test]
    fn stderr_tail_truncates_long_output() {
        let long = "x".repeat(STDERR_TAIL_BYTES * 2);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with('…'));
        assert!(tail.len() <= STDERR_TAIL_BYTES + '…'.len_utf8());
        assert_eq!(stderr_tail(b"  short\n"), "short");
    }

    #[tokio::test]
    async fn locate_output_prefers_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_path_buf();
        std::fs::create_dir_all(out.join("doc")).unwrap();
        std::fs::write(out.join("doc/doc.md"), "a").unwrap();
        std::fs::write(out.join("other.md"), "b").unwrap();

        let found = locate_output(out.clone(), "doc".into(), "md").await.unwrap();
        assert_eq!(found, Some(out.join("doc/doc.md")));

        let fallback = locate_output(out.clone(), "missing".into(), "md").await.unwrap();
        assert_eq!(fallback, Some(out.join("other.md")));

        let none = locate_output(out, "doc".into(), "json").await.unwrap();
        assert_eq!(none, None);
    }

    /// Shell stand-in for marker_single: echoes the config map as the output.
    #[cfg(unix)]
    const FAKE_MARKER: &str = r#"
in="$1"; shift
while [ $# -gt 0 ]; do
  case "$1" in
    --output_dir) out="$2"; shift 2 ;;
    --output_format) fmt="$2"; shift 2 ;;
    --config_json) cfg="$2"; shift 2 ;;
    *) shift ;;
  esac
done
stem=$(basename "$in"); stem="${stem%.*}"
mkdir -p "$out/$stem"
case "$fmt" in
  json) cp "$cfg" "$out/$stem/$stem.json" ;;
  html) echo "<p>converted</p>" > "$out/$stem/$stem.html" ;;
  *) cat "$cfg" > "$out/$stem/$stem.md" ;;
esac
"#;

    #[cfg(unix)]
    fn fake_marker(dir: &Path) -> MarkerConverter {
        let script = dir.join("fake_marker.sh");
        std::fs::write(&script, FAKE_MARKER).unwrap();
        MarkerConverter::new("sh").with_prefix_args([script.to_string_lossy().into_owned()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn render_runs_subprocess_and_reads_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();
        let marker = fake_marker(dir.path());

        let md = marker
            .render(&input, &cfg(ConversionMode::Ocr, OutputFormat::Markdown))
            .await
            .unwrap();
        match md {
            RenderedDocument::Markdown(text) => assert!(text.contains("\"force_ocr\": true")),
            other => panic!("expected markdown, got {other:?}"),
        }

        let json = marker
            .render(&input, &cfg(ConversionMode::Llm, OutputFormat::Json))
            .await
            .unwrap();
        match json {
            RenderedDocument::Json(v) => assert_eq!(v["openai_model"], "gpt-4o-mini"),
            other => panic!("expected json, got {other:?}"),
        }

        let html = marker
            .render(&input, &cfg(ConversionMode::Standard, OutputFormat::Html))
            .await
            .unwrap();
        assert!(matches!(html, RenderedDocument::Html(_)), "got {html:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pdf");
        std::fs::write(&input, b"%PDF").unwrap();
        let marker = MarkerConverter::new("sh")
            .with_prefix_args(["-c", "echo 'model load failed' >&2; exit 3", "marker_single"]);
        let err = marker.render(&input, &ConversionConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("model load failed"), "got {err}");
    }

    #[tokio::test]
    async fn missing_program_is_a_converter_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pdf");
        std::fs::write(&input, b"%PDF").unwrap();
        let marker = MarkerConverter::new(dir.path().join("no-such-marker"));
        let err = marker.render(&input, &ConversionConfig::default()).await.unwrap_err();
        assert!(matches!(err, DocServeError::Converter { .. }), "got {err:?}");
        assert!(err.to_string().contains("not found"));
    }
}
