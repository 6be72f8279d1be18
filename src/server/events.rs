//! Progress feed streamed to the browser, one JSON object per line.

use crate::media::MediaKind;
use crate::pipeline::ProcessedArtifact;
use serde::Serialize;
use uuid::Uuid;

/// Where the browser can fetch a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactLink {
    pub id: Uuid,
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
}

impl ArtifactLink {
    pub fn new(id: Uuid, artifact: &ProcessedArtifact) -> Self {
        Self {
            id,
            url: artifact_url(id),
            file_name: artifact.file_name.clone(),
            mime_type: artifact.mime_type.clone(),
        }
    }
}

pub fn artifact_url(id: Uuid) -> String {
    format!("/api/artifacts/{id}")
}

/// Events of one batch, tagged by `event`; `index` is the file's position
/// in the upload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    FileStarted {
        index: usize,
        name: String,
        kind: MediaKind,
    },
    Progress {
        index: usize,
        frame_index: u64,
        frames_processed: u64,
        total_frames: Option<u64>,
        fraction: Option<f32>,
        detections: usize,
        unique_potholes: usize,
    },
    Preview {
        index: usize,
        frame_index: u64,
        url: String,
    },
    ImageCompleted {
        index: usize,
        name: String,
        summary: String,
        detections: usize,
        width: u32,
        height: u32,
        artifact: ArtifactLink,
    },
    VideoCompleted {
        index: usize,
        name: String,
        frames_processed: u64,
        unique_potholes: usize,
        artifact: ArtifactLink,
    },
    FileFailed {
        index: usize,
        name: String,
        error: String,
    },
    BatchCompleted {
        files: usize,
        failed: usize,
    },
}

impl PipelineEvent {
    /// NDJSON line, newline included
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to serialize event");
            String::from(r#"{"event":"serialization_error"}"#)
        });
        line.push('\n');
        line
    }
}
