use crate::detection::DEFAULT_INPUT_SIZE;
use crate::media::FfmpegTools;
use crate::server::ServerSettings;
use crate::tracking::TrackerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Pothole detection and tracking web service", long_about = None)]
pub struct Args {
    /// Path to the YOLOv8 segmentation model (ONNX file)
    #[arg(long, env = "POTHOLE_MODEL", default_value = "best.onnx")]
    pub model: PathBuf,

    /// Square model input size in pixels
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    pub input_size: u32,

    /// Address to listen on
    #[arg(long, env = "POTHOLE_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "POTHOLE_PORT", default_value_t = 8501)]
    pub port: u16,

    /// TrueType/OpenType font for box labels; labels are omitted without one
    #[arg(long, env = "POTHOLE_FONT")]
    pub font: Option<PathBuf>,

    /// ByteTrack settings (TOML); defaults match bytetrack.yaml
    #[arg(long)]
    pub tracker_config: Option<PathBuf>,

    /// Send a preview frame every N processed video frames
    #[arg(long, default_value_t = 5)]
    pub preview_interval: u64,

    /// Largest accepted request body, in megabytes
    #[arg(long, default_value_t = 512)]
    pub max_upload_mb: usize,

    /// Number of processed files kept available for download
    #[arg(long, default_value_t = crate::server::DEFAULT_CAPACITY)]
    pub keep_artifacts: usize,

    /// ffmpeg executable
    #[arg(long, env = "POTHOLE_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, env = "POTHOLE_FFPROBE", default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn ffmpeg_tools(&self) -> FfmpegTools {
        FfmpegTools {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
        }
    }

    pub fn tracker(&self) -> Result<TrackerConfig> {
        match &self.tracker_config {
            Some(path) => TrackerConfig::from_toml_file(path)
                .with_context(|| format!("Invalid --tracker-config {}", path.display())),
            None => Ok(TrackerConfig::default()),
        }
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            preview_interval: self.preview_interval.max(1),
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
            ..ServerSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_app() {
        let args = Args::try_parse_from(["pothole-web"]).unwrap();
        assert_eq!(args.model, PathBuf::from("best.onnx"));
        assert_eq!(args.input_size, 640);
        assert_eq!(args.tracker().unwrap(), TrackerConfig::default());
        assert_eq!(args.server_settings().preview_interval, 5);
        assert_eq!(args.server_settings().max_upload_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "pothole-web",
            "--model",
            "/models/road.onnx",
            "--bind",
            "0.0.0.0",
            "--port",
            "9000",
            "--preview-interval",
            "0",
            "--ffmpeg",
            "/opt/ffmpeg/bin/ffmpeg",
        ])
        .unwrap();
        assert_eq!(args.socket_addr(), "0.0.0.0:9000".parse().unwrap());
        assert_eq!(args.server_settings().preview_interval, 1);
        assert_eq!(args.ffmpeg_tools().ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(args.ffmpeg_tools().ffprobe, PathBuf::from("ffprobe"));
    }

    #[test]
    fn tracker_config_is_read_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        std::fs::write(&path, "track_buffer = 60\nfuse_score = false\n").unwrap();

        let args = Args::try_parse_from([
            "pothole-web",
            "--tracker-config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let tracker = args.tracker().unwrap();
        assert_eq!(tracker.track_buffer, 60);
        assert!(!tracker.fuse_score);
        assert_eq!(tracker.match_thresh, 0.8);
    }
}
