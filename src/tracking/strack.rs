//! Single object track.

use super::kalman::{KalmanFilter, Measurement, StateCovariance, StateMean};
use crate::detection::BBox;

/// Track lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Newly created track, not yet confirmed
    #[default]
    New,
    /// Matched on the latest frame
    Tracked,
    /// Temporarily unmatched, kept for re-identification
    Lost,
}

#[derive(Debug, Clone)]
pub struct STrack {
    pub track_id: u32,
    pub state: TrackState,
    /// Confirmed tracks are reported to callers
    pub is_activated: bool,
    pub score: f32,
    pub class_id: u32,
    /// Index of the detection this track was last matched to
    pub det_index: usize,
    pub frame_id: u32,
    pub start_frame: u32,
    mean: Option<StateMean>,
    covariance: Option<StateCovariance>,
    observed: BBox,
}

impl STrack {
    pub fn new(bbox: BBox, score: f32, class_id: u32, det_index: usize) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            score,
            class_id,
            det_index,
            frame_id: 0,
            start_frame: 0,
            mean: None,
            covariance: None,
            observed: bbox,
        }
    }

    /// Current box: the filtered estimate once initialised, else the raw observation
    pub fn bbox(&self) -> BBox {
        match &self.mean {
            Some(mean) => BBox::from_xyah(
                mean[0] as f32,
                mean[1] as f32,
                mean[2] as f32,
                mean[3] as f32,
            ),
            None => self.observed,
        }
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    pub fn activate(&mut self, kalman_filter: &KalmanFilter, frame_id: u32, track_id: u32) {
        self.track_id = track_id;
        let (mean, covariance) = kalman_filter.initiate(measurement(&self.observed));
        self.mean = Some(mean);
        self.covariance = Some(covariance);
        self.state = TrackState::Tracked;
        // Tracks born on the first frame are trusted immediately; later ones
        // need a second match
        self.is_activated = frame_id == 1;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    pub fn re_activate(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(detection, kalman_filter);
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.frame_id = frame_id;
    }

    pub fn update(&mut self, detection: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.frame_id = frame_id;
        self.correct(detection, kalman_filter);
        self.state = TrackState::Tracked;
        self.is_activated = true;
    }

    fn correct(&mut self, detection: &STrack, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let (mean, cov) = kalman_filter.update(mean, cov, measurement(&detection.observed));
            self.mean = Some(mean);
            self.covariance = Some(cov);
        }
        self.observed = detection.observed;
        self.score = detection.score;
        self.class_id = detection.class_id;
        self.det_index = detection.det_index;
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let mut mean = *mean;
            if self.state != TrackState::Tracked {
                mean[7] = 0.0;
            }
            let (mean, cov) = kalman_filter.predict(&mean, cov);
            self.mean = Some(mean);
            self.covariance = Some(cov);
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }
}

fn measurement(bbox: &BBox) -> Measurement {
    let [cx, cy, a, h] = bbox.to_xyah();
    Measurement::new(cx as f64, cy as f64, a as f64, h as f64)
}
