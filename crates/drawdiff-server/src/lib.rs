//! HTTP surface of the drawing comparison service.
//!
//! | route | method | body |
//! |-------|--------|------|
//! | `/health` | GET | - |
//! | `/compare` | POST | `{image_a, image_b, config?}` |
//! | `/crop` | POST | `{image, bounding_box, padding?}` |
//!
//! Images travel as base64, optionally wrapped in a data URL. Pipeline
//! work is CPU-bound, so each request runs on the blocking pool behind a
//! semaphore that caps how many run at once.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use drawdiff_pipeline::{CropCoords, DEFAULT_PADDING, NormalizedBox, codec};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "drawing-compare";

/// Default request body cap (64 MiB); two base64 scans add up quickly.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Errors that end a request before or outside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request is malformed or missing required fields.
    #[error("{0}")]
    BadRequest(String),
    /// Processing failed outside the pipeline's own error reporting.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({"success": false, "error": self.to_string()}))).into_response()
    }
}

/// Shared, immutable per-process state.
#[derive(Debug, Clone)]
pub struct AppState {
    limiter: Arc<Semaphore>,
}

impl AppState {
    /// State allowing at most `max_concurrent` pipeline runs at once.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run `work` on the blocking pool once a slot is free.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    image_a: Option<String>,
    image_b: Option<String>,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CropRequest {
    image: Option<String>,
    bounding_box: Option<NormalizedBox>,
    padding: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CropResponse {
    success: bool,
    cropped_image: String,
    crop_coords: CropCoords,
}

/// Parse a JSON body into `T`, mapping every failure to a 400.
fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("No JSON data provided".to_owned()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "imageproc_version": drawdiff_pipeline::IMAGEPROC_VERSION,
    }))
}

async fn compare(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: CompareRequest = parse_body(&body)?;
    let (Some(image_a), Some(image_b)) = (non_empty(request.image_a), non_empty(request.image_b))
    else {
        return Err(ApiError::BadRequest(
            "Both image_a and image_b are required".to_owned(),
        ));
    };
    let config = request.config;

    let result = state
        .run_blocking(move || drawdiff_pipeline::compare(&image_a, &image_b, config))
        .await?;
    tracing::info!(
        success = result.success,
        regions = result.region_count,
        "comparison finished"
    );
    Ok(Json(result).into_response())
}

async fn crop(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: CropRequest = parse_body(&body)?;
    let (Some(image), Some(bbox)) = (non_empty(request.image), request.bounding_box) else {
        return Err(ApiError::BadRequest(
            "image and bounding_box required".to_owned(),
        ));
    };
    let padding = request.padding.unwrap_or(DEFAULT_PADDING);

    let response = state
        .run_blocking(move || -> Result<CropResponse, drawdiff_pipeline::PipelineError> {
            let decoded = codec::decode_transport(&image)?;
            let cut = drawdiff_pipeline::crop(&decoded, &bbox, padding)?;
            Ok(CropResponse {
                success: true,
                cropped_image: codec::to_data_url(&cut.image)?,
                crop_coords: cut.coords,
            })
        })
        .await?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(response).into_response())
}

/// Build the service router.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/compare", post(compare))
        .route("/crop", post(crop))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
