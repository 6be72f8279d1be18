mod byte_tracker;
mod kalman;
mod matching;
mod strack;

pub use byte_tracker::{ByteTracker, TrackedObject, TrackerConfig};
pub use strack::TrackState;
