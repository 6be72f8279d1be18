use super::batch::run_batch;
use super::error::{AppError, AppResult};
use super::events::PipelineEvent;
use super::state::AppState;
use crate::media::UploadedMedia;
use crate::pipeline::{CONFIDENCE_RANGE, DEFAULT_CONFIDENCE};
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

/// Multipart field carrying uploaded files
const FILE_FIELD: &str = "file";

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Query string of `POST /api/process`
///
/// Kept as raw text so a malformed number becomes a JSON error instead of
/// axum's plain-text rejection.
#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub confidence: Option<String>,
}

impl ProcessParams {
    pub fn confidence(&self) -> AppResult<f32> {
        let requested = match self.confidence.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<f32>()
                    .map_err(|_| AppError::UnparsableConfidence(raw.to_string()))?,
            ),
        };
        validate_confidence(requested)
    }
}

/// Resolve the requested threshold, rejecting anything outside the slider range
pub fn validate_confidence(requested: Option<f32>) -> AppResult<f32> {
    let value = requested.unwrap_or(DEFAULT_CONFIDENCE);
    let (min, max) = CONFIDENCE_RANGE;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::InvalidConfidence { value, min, max })
    }
}

/// POST /api/process?confidence=
///
/// Reads every `file` field, rejects the whole request on an unsupported
/// extension, then streams NDJSON `PipelineEvent`s while a blocking worker
/// processes the files in order.
pub async fn process_upload(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let confidence = params.confidence()?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("file field without a file name".to_string()))?;
        let bytes = field.bytes().await?;
        let upload = UploadedMedia::new(name.clone(), bytes.to_vec())
            .ok_or(AppError::UnsupportedMedia(name))?;
        uploads.push(upload);
    }

    if uploads.is_empty() {
        return Err(AppError::BadRequest("No files received".to_string()));
    }

    tracing::info!(files = uploads.len(), confidence, "Starting batch");

    let (tx, rx) = mpsc::channel::<PipelineEvent>(state.settings.event_buffer.max(1));
    let worker_state = state.clone();
    tokio::task::spawn_blocking(move || {
        run_batch(
            &worker_state.pipeline,
            &worker_state.artifacts,
            &uploads,
            confidence,
            worker_state.settings.preview_interval,
            |event| {
                // A closed channel means the client left; keep processing
                let _ = tx.blocking_send(event);
            },
        );
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_line()));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// GET /api/artifacts/{id}
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let artifact = state
        .artifacts
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Artifact {id}")))?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.file_name.replace(['"', '\\'], "_")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| AppError::Internal(format!("Invalid file name header: {e}")))?;
    let content_type = HeaderValue::from_str(&artifact.mime_type)
        .map_err(|e| AppError::Internal(format!("Invalid content type: {e}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes.clone(),
    )
        .into_response())
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub input_size: (u32, u32),
    pub classes: Vec<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: ModelInfo,
    pub artifacts: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.pipeline.model();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: ModelInfo {
            input_size: model.input_size(),
            classes: model.class_names().to_vec(),
        },
        artifacts: state.artifacts.len(),
    })
}
