//! ByteTrack association over per-frame detections.

use super::kalman::KalmanFilter;
use super::matching::{self, Assignment};
use super::strack::{STrack, TrackState};
use crate::detection::{BBox, Detection};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// IoU gate for the second (low score) association
const LOW_SCORE_MATCH_THRESH: f32 = 0.5;
/// IoU gate for confirming tentative tracks
const UNCONFIRMED_MATCH_THRESH: f32 = 0.7;
/// Tracked/lost pairs overlapping more than this are duplicates
const DUPLICATE_IOU: f32 = 0.85;

/// Tracker parameters, matching the stock `bytetrack.yaml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this join the first association
    pub track_high_thresh: f32,
    /// Detections above this (and below the high threshold) join the second
    pub track_low_thresh: f32,
    /// Minimum score to start a new track
    pub new_track_thresh: f32,
    /// Frames (at 30 fps) a lost track is kept for re-identification
    pub track_buffer: u32,
    /// Maximum fused cost for a first-association match
    pub match_thresh: f32,
    /// Weight IoU by detection score in the first association
    pub fuse_score: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_high_thresh: 0.25,
            track_low_thresh: 0.1,
            new_track_thresh: 0.25,
            track_buffer: 30,
            match_thresh: 0.8,
            fuse_score: true,
        }
    }
}

impl TrackerConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse tracker config {}", path.display()))
    }
}

/// A confirmed track reported for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub track_id: u32,
    pub bbox: BBox,
    pub score: f32,
    pub class_id: u32,
    /// Index into the detections passed to this frame's `update`
    pub det_index: usize,
}

pub struct ByteTracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    frame_id: u32,
    next_id: u32,
    max_time_lost: u32,
    config: TrackerConfig,
    kalman_filter: KalmanFilter,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig, frame_rate: f32) -> Self {
        let max_time_lost = (frame_rate / 30.0 * config.track_buffer as f32) as u32;
        tracing::debug!(?config, frame_rate, max_time_lost, "Creating ByteTrack tracker");
        Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            frame_id: 0,
            next_id: 1,
            max_time_lost,
            config,
            kalman_filter: KalmanFilter::default(),
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Associate this frame's detections with existing tracks
    ///
    /// Returns the confirmed tracks matched on this frame.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedObject> {
        let _span = tracing::debug_span!("bytetrack_update").entered();
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let cfg = self.config.clone();
        let kf = self.kalman_filter.clone();

        let mut activated = Vec::new();
        let mut refound = Vec::new();
        let mut lost = Vec::new();

        // Split detections by score
        let mut high = Vec::new();
        let mut low = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            let track = STrack::new(det.bbox, det.confidence, det.class_id, idx);
            if det.confidence >= cfg.track_high_thresh {
                high.push(track);
            } else if det.confidence > cfg.track_low_thresh {
                low.push(track);
            }
        }

        let (mut unconfirmed, confirmed): (Vec<STrack>, Vec<STrack>) = self
            .tracked_stracks
            .drain(..)
            .partition(|t| !t.is_activated);

        // First association: high score detections against confirmed + lost tracks
        let mut pool = joint_stracks(confirmed, &self.lost_stracks);
        for track in &mut pool {
            track.predict(&kf);
        }

        let mut dists = matching::iou_distance(&boxes(&pool), &boxes(&high));
        if cfg.fuse_score {
            let scores: Vec<f32> = high.iter().map(|t| t.score).collect();
            matching::fuse_score(&mut dists, &scores);
        }
        let Assignment {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::linear_assignment(&dists, cfg.match_thresh);

        for (it, id) in matches {
            let mut track = pool[it].clone();
            if track.state == TrackState::Tracked {
                track.update(&high[id], &kf, frame_id);
                activated.push(track);
            } else {
                track.re_activate(&high[id], &kf, frame_id);
                refound.push(track);
            }
        }

        // Second association: low score detections against still-tracked leftovers.
        // Unmatched lost tracks keep this frame's prediction so they coast along
        // their last velocity while hidden.
        let (remaining, still_lost): (Vec<STrack>, Vec<STrack>) = unmatched_tracks
            .iter()
            .map(|&i| pool[i].clone())
            .partition(|t| t.state == TrackState::Tracked);
        let dists = matching::iou_distance(&boxes(&remaining), &boxes(&low));
        let second = matching::linear_assignment(&dists, LOW_SCORE_MATCH_THRESH);

        for &(it, id) in &second.matches {
            let mut track = remaining[it].clone();
            if track.state == TrackState::Tracked {
                track.update(&low[id], &kf, frame_id);
                activated.push(track);
            } else {
                track.re_activate(&low[id], &kf, frame_id);
                refound.push(track);
            }
        }
        for &it in &second.unmatched_tracks {
            let mut track = remaining[it].clone();
            if track.state != TrackState::Lost {
                track.mark_lost();
                lost.push(track);
            }
        }

        // Tentative tracks (one frame old) get one chance at the leftovers
        let leftovers: Vec<STrack> = unmatched_detections
            .iter()
            .map(|&i| high[i].clone())
            .collect();
        let mut dists = matching::iou_distance(&boxes(&unconfirmed), &boxes(&leftovers));
        if cfg.fuse_score {
            let scores: Vec<f32> = leftovers.iter().map(|t| t.score).collect();
            matching::fuse_score(&mut dists, &scores);
        }
        let tentative = matching::linear_assignment(&dists, UNCONFIRMED_MATCH_THRESH);
        for &(it, id) in &tentative.matches {
            unconfirmed[it].update(&leftovers[id], &kf, frame_id);
            activated.push(unconfirmed[it].clone());
        }
        // Unmatched tentative tracks are removed outright

        // Start new tracks
        for &id in &tentative.unmatched_detections {
            let mut track = leftovers[id].clone();
            if track.score < cfg.new_track_thresh {
                continue;
            }
            let track_id = self.allocate_id();
            track.activate(&kf, frame_id, track_id);
            activated.push(track);
        }

        // Expire lost tracks
        for track in still_lost {
            if frame_id - track.end_frame() <= self.max_time_lost {
                lost.push(track);
            }
        }

        self.tracked_stracks = activated
            .into_iter()
            .chain(refound)
            .filter(|t| t.state == TrackState::Tracked)
            .collect();
        let lost = sub_stracks(lost, &self.tracked_stracks);
        let (tracked, lost) = remove_duplicate_stracks(&self.tracked_stracks, &lost);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;

        let output: Vec<TrackedObject> = self
            .tracked_stracks
            .iter()
            .filter(|t| t.is_activated)
            .map(|t| TrackedObject {
                track_id: t.track_id,
                bbox: t.bbox(),
                score: t.score,
                class_id: t.class_id,
                det_index: t.det_index,
            })
            .collect();

        tracing::debug!(
            frame_id,
            tracked = output.len(),
            lost = self.lost_stracks.len(),
            "Tracker updated"
        );
        output
    }
}

fn boxes(tracks: &[STrack]) -> Vec<BBox> {
    tracks.iter().map(STrack::bbox).collect()
}

fn joint_stracks(a: Vec<STrack>, b: &[STrack]) -> Vec<STrack> {
    let mut seen: HashSet<u32> = a.iter().map(|t| t.track_id).collect();
    let mut out = a;
    for t in b {
        if seen.insert(t.track_id) {
            out.push(t.clone());
        }
    }
    out
}

fn sub_stracks(a: Vec<STrack>, b: &[STrack]) -> Vec<STrack> {
    let ids: HashSet<u32> = b.iter().map(|t| t.track_id).collect();
    a.into_iter().filter(|t| !ids.contains(&t.track_id)).collect()
}

/// Drop the younger of any tracked/lost pair that covers the same object
fn remove_duplicate_stracks(a: &[STrack], b: &[STrack]) -> (Vec<STrack>, Vec<STrack>) {
    let mut dup_a = vec![false; a.len()];
    let mut dup_b = vec![false; b.len()];

    for (i, ta) in a.iter().enumerate() {
        for (j, tb) in b.iter().enumerate() {
            if ta.bbox().iou(&tb.bbox()) > DUPLICATE_IOU {
                let age_a = ta.frame_id - ta.start_frame;
                let age_b = tb.frame_id - tb.start_frame;
                if age_a > age_b {
                    dup_b[j] = true;
                } else {
                    dup_a[i] = true;
                }
            }
        }
    }

    let keep = |tracks: &[STrack], dup: &[bool]| {
        tracks
            .iter()
            .zip(dup)
            .filter(|(_, &d)| !d)
            .map(|(t, _)| t.clone())
            .collect::<Vec<_>>()
    };
    (keep(a, &dup_a), keep(b, &dup_b))
}
