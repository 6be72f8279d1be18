//! Shared fixtures: a scripted segmentation model and in-memory video I/O.

#![allow(dead_code)]

use anyhow::{bail, Result};
use image::{ImageFormat, Rgb, RgbImage};
use pothole_web::detection::{BBox, Detection, Mask, SegmentationModel};
use pothole_web::media::{FfmpegTools, FrameSource, VideoInfo};
use pothole_web::output::FrameSink;
use pothole_web::pipeline::Pipeline;
use pothole_web::render::Annotator;
use pothole_web::server::{AppState, ArtifactStore, ServerSettings};
use pothole_web::tracking::TrackerConfig;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;

/// Pixel value above which the fake model calls a pixel "pothole"
const BRIGHT: u8 = 200;

/// Finds bright blobs, one per vertical half of the frame, with a fixed score
pub struct BrightBlobModel {
    pub score: f32,
    names: Vec<String>,
}

impl BrightBlobModel {
    pub fn with_score(score: f32) -> Self {
        Self {
            score,
            names: vec!["pothole".to_string()],
        }
    }
}

impl Default for BrightBlobModel {
    fn default() -> Self {
        Self::with_score(0.9)
    }
}

impl SegmentationModel for BrightBlobModel {
    fn detect(&self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        if self.score <= confidence {
            return Ok(Vec::new());
        }
        let half = frame.width() / 2;
        let bands = [(0, half), (half, frame.width())];
        Ok(bands
            .iter()
            .filter_map(|&(start, end)| blob_in_band(frame, start, end, self.score))
            .collect())
    }

    fn input_size(&self) -> (u32, u32) {
        (640, 640)
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }
}

fn blob_in_band(frame: &RgbImage, start: u32, end: u32, score: f32) -> Option<Detection> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for y in 0..frame.height() {
        for x in start..end {
            if frame.get_pixel(x, y)[0] > BRIGHT {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }
    }
    let (x1, y1, x2, y2) = bounds?;
    let (width, height) = (x2 - x1 + 1, y2 - y1 + 1);
    let data = (0..height)
        .flat_map(|dy| (0..width).map(move |dx| (dx, dy)))
        .map(|(dx, dy)| frame.get_pixel(x1 + dx, y1 + dy)[0] > BRIGHT)
        .collect();
    let bbox = BBox::new(x1 as f32, y1 as f32, (x2 + 1) as f32, (y2 + 1) as f32);
    Some(Detection::new(bbox, score, 0).with_mask(Mask {
        x: x1,
        y: y1,
        width,
        height,
        data,
    }))
}

/// Black frame with one white square at `(x, y)`
pub fn frame_with_square(width: u32, height: u32, x: u32, y: u32, size: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |px, py| {
        if px >= x && px < x + size && py >= y && py < y + size {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

pub fn blank_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::new(width, height)
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    info: VideoInfo,
}

impl MemorySource {
    /// `total_frames` is what the "container" claims, independent of the real count
    pub fn new(frames: Vec<RgbImage>, total_frames: Option<u64>) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((64, 64));
        Self {
            frames: frames.into(),
            info: VideoInfo {
                width,
                height,
                fps: 30.0,
                total_frames,
            },
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.info.fps = fps;
        self
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }

    fn info(&self) -> &VideoInfo {
        &self.info
    }
}

/// Source that yields `good` frames and then fails
pub struct FailingSource {
    inner: MemorySource,
}

impl FailingSource {
    pub fn new(good: Vec<RgbImage>) -> Self {
        Self {
            inner: MemorySource::new(good, None),
        }
    }
}

impl FrameSource for FailingSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.inner.next_frame()? {
            Some(frame) => Ok(Some(frame)),
            None => bail!("corrupt packet"),
        }
    }

    fn info(&self) -> &VideoInfo {
        self.inner.info()
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.finished {
            bail!("sink already finished");
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

pub fn test_pipeline() -> Pipeline {
    let model = Arc::new(BrightBlobModel::default());
    Pipeline::new(
        model,
        Annotator::new(vec!["pothole".to_string()]),
        FfmpegTools::default(),
        TrackerConfig::default(),
    )
}

pub fn test_state() -> AppState {
    AppState::new(
        test_pipeline(),
        ArtifactStore::default(),
        ServerSettings::default(),
    )
}

/// Whether ffmpeg and ffprobe are on PATH
pub fn ffmpeg_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        std::process::Command::new(tool)
            .arg("-version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    })
}
