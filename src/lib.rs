//! Pothole detection web service: YOLOv8 segmentation on uploaded images,
//! plus ByteTrack tracking on uploaded video.

pub mod config;
pub mod detection;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod tracking;
