use super::{Pipeline, ProcessedArtifact};
use crate::detection::Detection;
use crate::media::{self, MediaKind, UploadedMedia};
use crate::output;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fmt;

/// Output of one detection call on an image or frame
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub annotated: RgbImage,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    /// Whether the model produced any mask output
    pub fn has_masks(&self) -> bool {
        self.detections.iter().any(|d| d.mask.is_some())
    }

    pub fn summary(&self) -> DetectionSummary {
        if self.has_masks() {
            DetectionSummary::Detected(self.detections.len())
        } else {
            DetectionSummary::NoneDetected
        }
    }
}

/// User-facing outcome of an image; finding nothing is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSummary {
    Detected(usize),
    NoneDetected,
}

impl DetectionSummary {
    pub fn count(&self) -> usize {
        match self {
            DetectionSummary::Detected(n) => *n,
            DetectionSummary::NoneDetected => 0,
        }
    }
}

impl fmt::Display for DetectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSummary::Detected(n) => write!(f, "Potholes Detected: {n}"),
            DetectionSummary::NoneDetected => write!(f, "No potholes detected."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub result: DetectionResult,
    pub artifact: ProcessedArtifact,
}

impl Pipeline {
    /// Single-shot detection and annotation of one image
    pub fn detect_image(&self, image: &RgbImage, confidence: f32) -> Result<DetectionResult> {
        let _span = tracing::debug_span!("detect_image", confidence).entered();

        let detections = self
            .model
            .detect(image, confidence)
            .context("Failed to run detection")?;
        let annotated = self.annotator.annotate(image, &detections);

        Ok(DetectionResult {
            annotated,
            detections,
        })
    }

    /// Decode an uploaded image, detect, and encode the annotated result as PNG
    pub fn process_image(&self, upload: &UploadedMedia, confidence: f32) -> Result<ImageOutcome> {
        anyhow::ensure!(
            upload.kind == MediaKind::Image,
            "{} is not an image",
            upload.name
        );

        let image = media::decode_image(&upload.bytes)
            .with_context(|| format!("Failed to decode {}", upload.name))?;
        let result = self.detect_image(&image, confidence)?;
        let png = output::encode_png(&result.annotated)?;

        tracing::info!(
            file = %upload.name,
            width = image.width(),
            height = image.height(),
            "{}",
            result.summary()
        );

        Ok(ImageOutcome {
            artifact: ProcessedArtifact::for_upload(MediaKind::Image, &upload.name, png),
            result,
        })
    }
}
