//! HTTP surface: upload UI, streaming processing endpoint, artifact download.

mod batch;
pub mod error;
pub mod events;
mod handlers;
mod state;
mod store;

pub use batch::{run_batch, VideoReporter};
pub use error::{AppError, AppResult};
pub use events::{ArtifactLink, PipelineEvent};
pub use handlers::validate_confidence;
pub use state::{AppState, ServerSettings};
pub use store::{ArtifactStore, DEFAULT_CAPACITY};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Build the application router with its middleware stack
///
/// Shared by the binary and the integration tests.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/process", post(handlers::process_upload))
        .route("/api/artifacts/{id}", get(handlers::download_artifact))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
