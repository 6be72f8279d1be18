mod decoder;
mod ffmpeg;

pub use decoder::FfmpegVideoReader;
pub use ffmpeg::{FfmpegTools, VideoInfo, FALLBACK_FPS};
pub(crate) use ffmpeg::{collect_stderr, join_stderr};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;

/// Extensions accepted at the upload boundary
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file by its extension (case-insensitive)
    ///
    /// Returns `None` for anything outside the allow-list, including names
    /// without an extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// MIME type of the processed artifact for this kind
    pub fn output_mime(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/png",
            MediaKind::Video => "video/mp4",
        }
    }
}

/// One uploaded file, alive for a single request
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub name: String,
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

impl UploadedMedia {
    /// Build an upload, classifying by name; `None` if the extension is not allowed
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Option<Self> {
        let name = name.into();
        let kind = MediaKind::from_file_name(&name)?;
        Some(Self { name, bytes, kind })
    }

    /// Lower-cased extension of the original name
    pub fn extension(&self) -> String {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Decode an uploaded image to RGB
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let _span = tracing::debug_span!("decode_image", len = bytes.len()).entered();
    let image = image::load_from_memory(bytes).context("Failed to decode image")?;
    Ok(image.into_rgb8())
}

/// Trait for sequential video frame sources
pub trait FrameSource {
    /// Decode the next frame; `Ok(None)` marks end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Metadata read when the source was opened
    fn info(&self) -> &VideoInfo;
}
