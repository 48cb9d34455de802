use crate::error::DocServeError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

impl IntoResponse for DocServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!("{} {}: {}", status.as_u16(), status.canonical_reason().unwrap_or(""), detail);
        } else {
            tracing::warn!("Rejected request ({}): {}", status.as_u16(), detail);
        }

        let body = Json(json!({
            "detail": detail,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn error_body_carries_detail_and_status() {
        let response = DocServeError::EmptyBody.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], 400);
        assert!(v["detail"].as_str().unwrap().contains("empty"));
    }
}
