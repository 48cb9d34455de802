//! HTTP surface: the `/documents` router and its shared state.
//!
//! Handlers never call a converter directly. They go through
//! [`AppState::convert`], which holds a semaphore permit for the duration of
//! the conversion; the semaphore is the service's bounded worker pool, so a
//! burst of uploads queues behind `max_concurrent_conversions` running
//! conversions while health checks keep answering.

mod error;
pub mod handlers;

use crate::config::{ConversionMode, OutputFormat, ProviderCredentials, ServiceConfig};
use crate::convert::convert_document;
use crate::converter::{build_converter, DocumentConverter};
use crate::error::DocServeError;
use crate::output::ConversionResult;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// State shared by every handler.
pub struct AppState {
    converter: Arc<dyn DocumentConverter>,
    settings: ServiceConfig,
    permits: Semaphore,
}

impl AppState {
    pub fn new(converter: Arc<dyn DocumentConverter>, settings: ServiceConfig) -> Self {
        let permits = Semaphore::new(settings.max_concurrent_conversions.max(1));
        Self {
            converter,
            settings,
            permits,
        }
    }

    pub fn settings(&self) -> &ServiceConfig {
        &self.settings
    }

    /// Run one conversion once a worker slot is free.
    pub async fn convert(
        &self,
        path: &Path,
        file_type: &str,
        mode: ConversionMode,
        output_format: OutputFormat,
        credentials: Option<ProviderCredentials>,
    ) -> Result<ConversionResult, DocServeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DocServeError::Internal("conversion pool is closed".into()))?;
        debug!("Acquired conversion slot ({} left)", self.permits.available_permits());

        convert_document(
            self.converter.as_ref(),
            path,
            file_type,
            mode,
            output_format,
            credentials,
            self.settings.conversion_timeout(),
        )
        .await
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.max_upload_bytes;

    let documents = Router::new()
        .route("/health", get(handlers::health))
        .route("/standard", post(handlers::standard))
        .route("/ocr", post(handlers::ocr))
        .route("/gpt", post(handlers::gpt))
        .route("/parse", post(handlers::parse))
        .route("/parse-pdf", post(handlers::parse_pdf))
        .route("/standard/binary", post(handlers::standard_binary))
        .route("/ocr/binary", post(handlers::ocr_binary))
        .route("/gpt/binary", post(handlers::gpt_binary));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/documents", documents)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `settings.bind` and serve until Ctrl-C.
pub async fn serve(settings: ServiceConfig) -> Result<(), DocServeError> {
    let converter = build_converter(&settings);
    let bind = settings.bind;
    info!(
        "Starting docserve on http://{} (backend={}, upload_dir={}, workers={})",
        bind,
        converter.name(),
        settings.upload_dir.display(),
        settings.max_concurrent_conversions
    );

    let app = router(Arc::new(AppState::new(converter, settings)));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| DocServeError::Internal(format!("cannot bind {bind}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DocServeError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
