use super::{Pipeline, ProcessedArtifact};
use crate::detection::Detection;
use crate::media::{FfmpegVideoReader, FrameSource, MediaKind, UploadedMedia, VideoInfo};
use crate::output::{FfmpegVideoWriter, FrameSink};
use crate::tracking::{ByteTracker, TrackedObject};
use anyhow::{Context, Result};
use image::RgbImage;
use std::collections::BTreeSet;
use std::time::Instant;

/// Frame rate handed to the tracker whatever the container reports, so the
/// lost-track buffer is always `track_buffer` frames
pub const TRACKER_FRAME_RATE: f32 = 30.0;

/// Per-video tracking statistics
///
/// `frame_count` only moves forward, one per decoded frame, and
/// `unique_track_ids` only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingState {
    unique_track_ids: BTreeSet<u32>,
    frame_count: u64,
}

impl TrackingState {
    pub fn record_ids<I: IntoIterator<Item = u32>>(&mut self, ids: I) {
        self.unique_track_ids.extend(ids);
    }

    pub fn advance_frame(&mut self) {
        self.frame_count += 1;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn unique_track_ids(&self) -> &BTreeSet<u32> {
        &self.unique_track_ids
    }

    /// Distinct potholes seen so far
    pub fn unique_count(&self) -> usize {
        self.unique_track_ids.len()
    }
}

/// Fraction of the video processed, clamped to `[0, 1]`
///
/// `None` when the container did not report a usable frame total.
pub fn progress_fraction(frames_processed: u64, total_frames: Option<u64>) -> Option<f32> {
    match total_frames {
        Some(total) if total > 0 => Some((frames_processed as f64 / total as f64).clamp(0.0, 1.0) as f32),
        _ => None,
    }
}

/// Snapshot handed to the progress callback after every frame
pub struct FrameProgress<'a> {
    /// Zero-based index of the frame just written
    pub frame_index: u64,
    pub total_frames: Option<u64>,
    pub fraction: Option<f32>,
    pub annotated: &'a RgbImage,
    pub detections: &'a [Detection],
    pub state: &'a TrackingState,
}

#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub state: TrackingState,
    pub info: VideoInfo,
    pub artifact: ProcessedArtifact,
}

/// Turn tracker output back into drawable detections carrying their ids
fn tracked_detections(tracked: &[TrackedObject], detections: &[Detection]) -> Vec<Detection> {
    tracked
        .iter()
        .map(|t| Detection {
            bbox: t.bbox,
            confidence: t.score,
            class_id: t.class_id,
            mask: detections.get(t.det_index).and_then(|d| d.mask.clone()),
            track_id: Some(t.track_id),
        })
        .collect()
}

impl Pipeline {
    /// Run detection and tracking over every frame of `source`, writing annotated
    /// frames to `sink` in decode order
    ///
    /// The sink is finished on success. Any decode, inference or write error ends
    /// the video; partial output is left to the caller to discard.
    pub fn process_video<S, K, F>(
        &self,
        source: &mut S,
        sink: &mut K,
        confidence: f32,
        mut on_frame: F,
    ) -> Result<TrackingState>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(FrameProgress<'_>),
    {
        let info = source.info().clone();
        let mut tracker = ByteTracker::new(self.tracker.clone(), TRACKER_FRAME_RATE);
        let mut state = TrackingState::default();

        let started = Instant::now();
        let mut window_start = Instant::now();

        while let Some(frame) = source
            .next_frame()
            .with_context(|| format!("Failed to decode frame {}", state.frame_count()))?
        {
            let frame_index = state.frame_count();

            let detections = self
                .model
                .detect(&frame, confidence)
                .with_context(|| format!("Detection failed on frame {frame_index}"))?;
            let tracked = tracker.update(&detections);
            let drawn = tracked_detections(&tracked, &detections);

            state.record_ids(tracked.iter().map(|t| t.track_id));

            let annotated = self.annotator.annotate(&frame, &drawn);
            sink.write_frame(&annotated)
                .with_context(|| format!("Failed to write frame {frame_index}"))?;

            state.advance_frame();

            on_frame(FrameProgress {
                frame_index,
                total_frames: info.total_frames,
                fraction: progress_fraction(state.frame_count(), info.total_frames),
                annotated: &annotated,
                detections: &drawn,
                state: &state,
            });

            if state.frame_count() % 30 == 0 {
                let elapsed = window_start.elapsed();
                tracing::debug!(
                    frames = state.frame_count(),
                    unique = state.unique_count(),
                    "{:.1} fps",
                    30.0 / elapsed.as_secs_f64().max(f64::EPSILON)
                );
                window_start = Instant::now();
            }
        }

        sink.finish().context("Failed to finalize output video")?;

        tracing::info!(
            frames = state.frame_count(),
            unique_potholes = state.unique_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Video tracking finished"
        );

        Ok(state)
    }

    /// Full video path for an upload: spool to a private temp dir, decode with
    /// ffmpeg, track, and re-encode as mp4v
    ///
    /// The temp dir and both child processes are gone when this returns,
    /// whether it succeeds or not.
    pub fn process_video_upload<F>(
        &self,
        upload: &UploadedMedia,
        confidence: f32,
        on_frame: F,
    ) -> Result<VideoOutcome>
    where
        F: FnMut(FrameProgress<'_>),
    {
        anyhow::ensure!(
            upload.kind == MediaKind::Video,
            "{} is not a video",
            upload.name
        );

        let workdir = tempfile::Builder::new()
            .prefix("pothole-web-")
            .tempdir()
            .context("Failed to create working directory")?;
        let input_path = workdir.path().join(format!("input.{}", upload.extension()));
        let output_path = workdir.path().join("output.mp4");

        std::fs::write(&input_path, &upload.bytes)
            .with_context(|| format!("Failed to spool {}", upload.name))?;

        let mut source = FfmpegVideoReader::open(&self.tools, &input_path)
            .with_context(|| format!("Failed to open {}", upload.name))?;
        let info = source.info().clone();

        tracing::info!(
            file = %upload.name,
            width = info.width,
            height = info.height,
            fps = info.fps,
            total_frames = ?info.total_frames,
            "Processing video"
        );

        let mut sink =
            FfmpegVideoWriter::create(&self.tools, &output_path, info.width, info.height, info.fps)?;
        let state = self.process_video(&mut source, &mut sink, confidence, on_frame)?;
        drop(source);
        drop(sink);

        let bytes = std::fs::read(&output_path)
            .with_context(|| format!("Failed to read {}", output_path.display()))?;

        Ok(VideoOutcome {
            state,
            info,
            artifact: ProcessedArtifact::for_upload(MediaKind::Video, &upload.name, bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    #[test]
    fn fraction_is_clamped_when_metadata_undercounts() {
        assert_eq!(progress_fraction(5, Some(10)), Some(0.5));
        assert_eq!(progress_fraction(12, Some(10)), Some(1.0));
        assert_eq!(progress_fraction(0, Some(10)), Some(0.0));
    }

    #[test]
    fn fraction_unknown_without_total() {
        assert_eq!(progress_fraction(3, None), None);
        assert_eq!(progress_fraction(3, Some(0)), None);
    }

    #[test]
    fn tracking_state_only_grows() {
        let mut state = TrackingState::default();
        state.record_ids([3, 1]);
        state.advance_frame();
        state.record_ids([1, 2]);
        state.advance_frame();

        assert_eq!(state.frame_count(), 2);
        assert_eq!(
            state.unique_track_ids().iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(state.unique_count(), 3);
    }

    #[test]
    fn tracked_detections_carry_ids_and_source_masks() {
        let mask = crate::detection::Mask {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            data: vec![true; 4],
        };
        let detections = vec![
            Detection::new(BBox::new(0.0, 0.0, 2.0, 2.0), 0.9, 0).with_mask(mask.clone()),
            Detection::new(BBox::new(5.0, 5.0, 7.0, 7.0), 0.4, 0),
        ];
        let tracked = vec![TrackedObject {
            track_id: 7,
            bbox: BBox::new(0.5, 0.5, 2.5, 2.5),
            score: 0.9,
            class_id: 0,
            det_index: 0,
        }];

        let drawn = tracked_detections(&tracked, &detections);
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].track_id, Some(7));
        assert_eq!(drawn[0].bbox, BBox::new(0.5, 0.5, 2.5, 2.5));
        assert_eq!(drawn[0].mask, Some(mask));
    }
}
