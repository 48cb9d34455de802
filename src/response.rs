//! Turning a [`ConversionResult`] into an HTTP response.
//!
//! Multipart routes always answer with [`ConversionResponse`] JSON. Binary
//! routes asking for markdown get the `.md` file as a download instead; if
//! that file cannot be written and read back, the already-converted text is
//! returned inline as [`InlineFallback`] JSON.

use crate::config::{ConversionMode, OutputFormat};
use crate::error::DocServeError;
use crate::output::ConversionResult;
use crate::upload::FixedUpload;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// JSON body of a successful conversion.
///
/// `html` / `json` repeat `text` when that format was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResponse {
    pub text: String,
    pub file_type: String,
    pub conversion_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl From<ConversionResult> for ConversionResponse {
    fn from(result: ConversionResult) -> Self {
        let html = (result.output_format == OutputFormat::Html).then(|| result.text.clone());
        let json = (result.output_format == OutputFormat::Json).then(|| result.text.clone());
        Self {
            text: result.text,
            file_type: result.file_type,
            conversion_type: result.mode.label(),
            html,
            json,
            model: result.model,
        }
    }
}

/// Inline JSON used when the markdown download cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineFallback {
    pub text: String,
    pub file_type: String,
    /// Only reported for the assisted mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_type: Option<&'static str>,
}

impl From<ConversionResult> for InlineFallback {
    fn from(result: ConversionResult) -> Self {
        Self {
            conversion_type: (result.mode == ConversionMode::Llm).then(|| result.mode.label()),
            text: result.text,
            file_type: result.file_type,
        }
    }
}

/// Response for a multipart route.
pub fn json_response(result: ConversionResult) -> Response {
    Json(ConversionResponse::from(result)).into_response()
}

/// Response for a binary route: markdown download, or JSON for other formats.
pub async fn binary_response(upload: &FixedUpload, result: ConversionResult) -> Response {
    if result.output_format != OutputFormat::Markdown {
        return json_response(result);
    }

    let md_path = upload.markdown_path();
    match write_and_read_back(&md_path, &result.text).await {
        Ok(bytes) => {
            info!("Returning markdown file {}", md_path.display());
            markdown_download(&upload.download_name(), bytes)
        }
        Err(e) => {
            warn!("Markdown file unavailable, returning text inline: {e}");
            Json(InlineFallback::from(result)).into_response()
        }
    }
}

/// Write `text` to `path`, check the file is there, and return its content.
async fn write_and_read_back(path: &Path, text: &str) -> Result<Vec<u8>, DocServeError> {
    tokio::fs::write(path, text)
        .await
        .map_err(|e| DocServeError::fs(path, e))?;
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| DocServeError::fs(path, e))?
    {
        return Err(DocServeError::fs(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "markdown file was not created"),
        ));
    }
    tokio::fs::read(path).await.map_err(|e| DocServeError::fs(path, e))
}

/// `200 OK` download of a markdown file named `file_name`.
pub fn markdown_download(file_name: &str, body: Vec<u8>) -> Response {
    let disposition = HeaderValue::from_str(&content_disposition(file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/markdown; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

/// Bytes outside the RFC 5987 `attr-char` set.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `attachment` disposition with an ASCII `filename` and an RFC 5987
/// `filename*` carrying the exact UTF-8 name.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if ascii == file_name {
        format!("attachment; filename=\"{ascii}\"")
    } else {
        format!(
            "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
            utf8_percent_encode(file_name, ATTR_CHAR)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(mode: ConversionMode, format: OutputFormat) -> ConversionResult {
        ConversionResult {
            text: "<p>hi</p>".into(),
            file_type: "pdf".into(),
            mode,
            output_format: format,
            model: (mode == ConversionMode::Llm).then(|| "gpt-4o".to_string()),
        }
    }

    #[test]
    fn html_and_json_duplicate_text() {
        let html = serde_json::to_value(ConversionResponse::from(result(
            ConversionMode::Standard,
            OutputFormat::Html,
        )))
        .unwrap();
        assert_eq!(html["html"], html["text"]);
        assert_eq!(html["conversion_type"], "standard");
        assert!(html.get("json").is_none());
        assert!(html.get("model").is_none());

        let json = serde_json::to_value(ConversionResponse::from(result(
            ConversionMode::Ocr,
            OutputFormat::Json,
        )))
        .unwrap();
        assert_eq!(json["json"], "<p>hi</p>");
        assert_eq!(json["conversion_type"], "ocr");
    }

    #[test]
    fn assisted_mode_reports_model() {
        let v = serde_json::to_value(ConversionResponse::from(result(
            ConversionMode::Llm,
            OutputFormat::Markdown,
        )))
        .unwrap();
        assert_eq!(v["conversion_type"], "gpt");
        assert_eq!(v["model"], "gpt-4o");
        assert!(v.get("html").is_none());
    }

    #[test]
    fn fallback_labels_only_assisted_mode() {
        let standard = serde_json::to_value(InlineFallback::from(result(
            ConversionMode::Standard,
            OutputFormat::Markdown,
        )))
        .unwrap();
        assert_eq!(standard, serde_json::json!({"text": "<p>hi</p>", "file_type": "pdf"}));

        let gpt = InlineFallback::from(result(ConversionMode::Llm, OutputFormat::Markdown));
        assert_eq!(gpt.conversion_type, Some("gpt"));
    }

    #[test]
    fn disposition_encodes_non_ascii_names() {
        assert_eq!(content_disposition("report.md"), "attachment; filename=\"report.md\"");
        let d = content_disposition("דוח.md");
        assert!(d.starts_with("attachment; filename=\"___.md\""), "got: {d}");
        assert!(d.ends_with("filename*=UTF-8''%D7%93%D7%95%D7%97.md"), "got: {d}");

        let d = content_disposition("été 50%.md");
        assert!(d.starts_with("attachment; filename=\"_t_ 50%.md\""), "got: {d}");
        assert!(d.ends_with("filename*=UTF-8''%C3%A9t%C3%A9%2050%25.md"), "got: {d}");
    }

    #[tokio::test]
    async fn markdown_is_served_as_download() {
        let dir = tempfile::tempdir().unwrap();
        let upload = FixedUpload::persist(dir.path(), b"%PDF", "Quarterly Report.pdf")
            .await
            .unwrap();
        let mut r = result(ConversionMode::Standard, OutputFormat::Markdown);
        r.text = "# Q3\n".into();

        let response = binary_response(&upload, r).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/markdown; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Quarterly Report.md\""
        );
        assert!(upload.markdown_path().exists());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"# Q3\n");
    }

    #[tokio::test]
    async fn unwritable_markdown_falls_back_to_inline_json() {
        let dir = tempfile::tempdir().unwrap();
        let upload = FixedUpload::persist(dir.path(), b"%PDF", "a.pdf").await.unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();

        let response = binary_response(&upload, result(ConversionMode::Llm, OutputFormat::Markdown)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["text"], "<p>hi</p>");
        assert_eq!(v["conversion_type"], "gpt");
    }
}
