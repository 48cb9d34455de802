//! Route handlers.
//!
//! Every handler validates the whole request (extension, output format,
//! flags, credentials) before anything is written to disk or converted.

use super::AppState;
use crate::config::{ConversionMode, OutputFormat, ProviderCredentials};
use crate::error::DocServeError;
use crate::response::{binary_response, json_response};
use crate::upload::{validate_extension, FixedUpload, ScopedUpload};
use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

type HandlerResult = Result<Response, DocServeError>;

// ── Health ───────────────────────────────────────────────────────────────

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Document processing service is up and running",
    }))
}

// ── Multipart routes ─────────────────────────────────────────────────────

pub async fn standard(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult {
    let form = UploadForm::read(multipart).await?;
    let file_type = validate_extension(&form.file_name)?;
    let format = form.output_format()?;
    convert_scoped(&state, &form, &file_type, ConversionMode::Standard, format, None).await
}

pub async fn ocr(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult {
    let form = UploadForm::read(multipart).await?;
    let file_type = validate_extension(&form.file_name)?;
    let format = form.output_format()?;
    convert_scoped(&state, &form, &file_type, ConversionMode::Ocr, format, None).await
}

pub async fn gpt(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult {
    let form = UploadForm::read(multipart).await?;
    let file_type = validate_extension(&form.file_name)?;
    let format = form.output_format()?;
    let credentials = credentials(
        &state,
        form.text("api_key"),
        form.text("model_name"),
        "api_key",
    )?;
    let credentials = Some(credentials);
    convert_scoped(&state, &form, &file_type, ConversionMode::Llm, format, credentials).await
}

/// Flag-driven dispatch: `use_llm` wins over `force_ocr`.
pub async fn parse(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult {
    let form = UploadForm::read(multipart).await?;
    dispatch(&state, &form).await
}

/// [`parse`] for PDF files only.
pub async fn parse_pdf(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> HandlerResult {
    let form = UploadForm::read(multipart).await?;
    validate_extension(&form.file_name)?;
    if !form.file_name.to_lowercase().ends_with(".pdf") {
        return Err(DocServeError::NotAPdf {
            file_name: form.file_name,
        });
    }
    dispatch(&state, &form).await
}

async fn dispatch(state: &AppState, form: &UploadForm) -> HandlerResult {
    let file_type = validate_extension(&form.file_name)?;
    let format = form.output_format()?;
    let use_llm = form.flag("use_llm")?;
    let force_ocr = form.flag("force_ocr")?;

    if use_llm {
        let credentials = credentials(
            state,
            form.text("openai_api_key"),
            form.text("model_name"),
            "openai_api_key",
        )?;
        let credentials = Some(credentials);
        convert_scoped(state, form, &file_type, ConversionMode::Llm, format, credentials).await
    } else if force_ocr {
        convert_scoped(state, form, &file_type, ConversionMode::Ocr, format, None).await
    } else {
        convert_scoped(state, form, &file_type, ConversionMode::Standard, format, None).await
    }
}

/// Convert a form upload inside its own temp directory, removed afterwards.
async fn convert_scoped(
    state: &AppState,
    form: &UploadForm,
    file_type: &str,
    mode: ConversionMode,
    format: OutputFormat,
    credentials: Option<ProviderCredentials>,
) -> HandlerResult {
    info!(
        "{} conversion of '{}' ({} bytes) → {}",
        mode.label(),
        form.file_name,
        form.bytes.len(),
        format
    );
    let upload = ScopedUpload::persist(&form.bytes, &form.file_name).await?;
    let outcome = state.convert(upload.path(), file_type, mode, format, credentials).await;
    upload.close();
    outcome.map(json_response)
}

/// A parsed multipart request: the `file` part plus every text field.
struct UploadForm {
    file_name: String,
    bytes: Bytes,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, DocServeError> {
        let mut multipart =
            multipart.map_err(|rejection| DocServeError::InvalidRequest(rejection.body_text()))?;

        let mut file = None;
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, bytes));
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                fields.insert(name, value);
            }
        }

        let (file_name, bytes) = file.ok_or_else(|| DocServeError::MissingField {
            field: "file",
            hint: "send the document as the multipart part 'file'".into(),
        })?;
        if file_name.trim().is_empty() {
            return Err(DocServeError::MissingField {
                field: "file",
                hint: "the 'file' part has no filename".into(),
            });
        }

        Ok(Self {
            file_name,
            bytes,
            fields,
        })
    }

    /// `output_format`, markdown when absent.
    fn output_format(&self) -> Result<OutputFormat, DocServeError> {
        self.fields
            .get("output_format")
            .map_or(Ok(OutputFormat::Markdown), |v| v.parse())
    }

    /// Boolean field, false when absent.
    fn flag(&self, name: &'static str) -> Result<bool, DocServeError> {
        self.fields
            .get(name)
            .map_or(Ok(false), |v| parse_bool(name, v))
    }

    /// Non-blank text field.
    fn text(&self, name: &str) -> Option<String> {
        non_blank(self.fields.get(name).cloned())
    }
}

fn multipart_error(e: MultipartError) -> DocServeError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocServeError::PayloadTooLarge(e.body_text())
    } else {
        DocServeError::InvalidRequest(e.body_text())
    }
}

/// Form booleans: true/false, 1/0, yes/no, on/off, any case.
pub fn parse_bool(field: &str, value: &str) -> Result<bool, DocServeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(DocServeError::InvalidRequest(format!(
            "'{field}' must be a boolean (true or false), got '{value}'"
        ))),
    }
}

// ── Binary routes ────────────────────────────────────────────────────────

/// Query string of the binary routes.
#[derive(Default, Deserialize)]
pub struct BinaryParams {
    pub file_name: Option<String>,
    pub output_format: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
}

impl fmt::Debug for BinaryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryParams")
            .field("file_name", &self.file_name)
            .field("output_format", &self.output_format)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_name", &self.model_name)
            .finish()
    }
}

pub async fn standard_binary(
    State(state): State<Arc<AppState>>,
    params: Result<Query<BinaryParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    convert_binary(&state, params, body, ConversionMode::Standard).await
}

pub async fn ocr_binary(
    State(state): State<Arc<AppState>>,
    params: Result<Query<BinaryParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    convert_binary(&state, params, body, ConversionMode::Ocr).await
}

pub async fn gpt_binary(
    State(state): State<Arc<AppState>>,
    params: Result<Query<BinaryParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> HandlerResult {
    convert_binary(&state, params, body, ConversionMode::Llm).await
}

async fn convert_binary(
    state: &AppState,
    params: Result<Query<BinaryParams>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
    mode: ConversionMode,
) -> HandlerResult {
    let Query(params) =
        params.map_err(|rejection| DocServeError::InvalidRequest(rejection.body_text()))?;

    let file_name = non_blank(params.file_name).ok_or_else(|| DocServeError::MissingField {
        field: "file_name",
        hint: "pass the original filename, including its extension, as ?file_name=".into(),
    })?;
    let file_type = validate_extension(&file_name)?;
    let format: OutputFormat = params
        .output_format
        .as_deref()
        .map_or(Ok(OutputFormat::Markdown), str::parse)?;
    let credentials = match mode {
        ConversionMode::Llm => Some(credentials(
            state,
            non_blank(params.api_key),
            non_blank(params.model_name),
            "api_key",
        )?),
        _ => None,
    };

    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            DocServeError::PayloadTooLarge(rejection.body_text())
        } else {
            DocServeError::InvalidRequest(rejection.body_text())
        }
    })?;

    info!(
        "{} binary conversion of '{}' ({} bytes) → {}",
        mode.label(),
        file_name,
        bytes.len(),
        format
    );
    let upload = FixedUpload::persist(&state.settings().upload_dir, &bytes, &file_name).await?;
    let result = state.convert(upload.path(), &file_type, mode, format, credentials).await?;
    Ok(binary_response(&upload, result).await)
}

// ── Shared ───────────────────────────────────────────────────────────────

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Request credentials; `key_field` names the field reported when missing.
fn credentials(
    state: &AppState,
    api_key: Option<String>,
    model_name: Option<String>,
    key_field: &'static str,
) -> Result<ProviderCredentials, DocServeError> {
    let api_key = api_key.ok_or_else(|| DocServeError::MissingField {
        field: key_field,
        hint: "an OpenAI API key is required for LLM-assisted conversion".into(),
    })?;
    let model = model_name.or_else(|| Some(state.settings().default_model.clone()));
    Ok(ProviderCredentials::new(api_key, model))
}
