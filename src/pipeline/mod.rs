//! Orchestration: upload → inference (+ tracking) → annotation → artifact.

mod image;
mod video;

pub use video::{
    progress_fraction, FrameProgress, TrackingState, VideoOutcome, TRACKER_FRAME_RATE,
};
pub use self::image::{DetectionResult, DetectionSummary, ImageOutcome};

use crate::detection::SegmentationModel;
use crate::media::{FfmpegTools, MediaKind};
use crate::render::Annotator;
use crate::tracking::TrackerConfig;
use std::sync::Arc;

/// Confidence threshold applied when the client does not choose one
pub const DEFAULT_CONFIDENCE: f32 = 0.3;
/// Inclusive range accepted from clients
pub const CONFIDENCE_RANGE: (f32, f32) = (0.1, 1.0);

/// Processed media ready for download, byte-exact
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl ProcessedArtifact {
    /// Artifact for an upload: named `processed_<original name>`, typed by kind
    pub fn for_upload(kind: MediaKind, original_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: kind.output_mime().to_string(),
            file_name: format!("processed_{original_name}"),
        }
    }
}

/// Everything one inference run needs, built once at startup
///
/// Cheap to clone: the model is shared, the annotator holds its font behind an `Arc`.
#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn SegmentationModel>,
    annotator: Annotator,
    tools: FfmpegTools,
    tracker: TrackerConfig,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn SegmentationModel>,
        annotator: Annotator,
        tools: FfmpegTools,
        tracker: TrackerConfig,
    ) -> Self {
        Self {
            model,
            annotator,
            tools,
            tracker,
        }
    }

    pub fn model(&self) -> &dyn SegmentationModel {
        self.model.as_ref()
    }
}
