use super::store::ArtifactStore;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Server settings fixed at startup
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Emit a preview JPEG every this many frames
    pub preview_interval: u64,
    /// Upper bound on a whole multipart request body
    pub max_upload_bytes: usize,
    /// Capacity of the in-memory event channel per request
    pub event_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            preview_interval: 5,
            max_upload_bytes: 512 * 1024 * 1024,
            event_buffer: 64,
        }
    }
}

/// Shared state handed to every handler through `State<AppState>`
///
/// Cheap to clone; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub artifacts: Arc<ArtifactStore>,
    pub settings: Arc<ServerSettings>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, artifacts: ArtifactStore, settings: ServerSettings) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            artifacts: Arc::new(artifacts),
            settings: Arc::new(settings),
        }
    }
}
