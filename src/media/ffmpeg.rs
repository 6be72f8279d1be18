//! `ffmpeg` / `ffprobe` child-process plumbing shared by the video reader and writer.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command};
use std::thread::JoinHandle;

/// Locations of the `ffmpeg` and `ffprobe` executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Container metadata read before decoding starts
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count reported by the container, or estimated from duration
    /// and frame rate; only good for progress estimates
    pub total_frames: Option<u64>,
}

/// Frame rate assumed when the container does not report one
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

impl FfmpegTools {
    /// Run `ffprobe` on the first video stream of `path`
    pub fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let _span = tracing::debug_span!("ffprobe", path = %path.display()).entered();

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.ffprobe.display()))?;

        if !output.status.success() {
            bail!(
                "ffprobe failed (exit code {:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<VideoInfo> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe output")?;
    let stream = parsed
        .streams
        .first()
        .context("file has no video stream")?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => bail!("video stream has no frame size"),
    };

    let rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));
    let fps = rate.unwrap_or(FALLBACK_FPS);

    // Many AVI and MKV files carry no frame count; estimate it from the
    // stream (or container) duration at the reported rate
    let duration = stream
        .duration
        .as_deref()
        .or_else(|| parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);
    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| {
            let estimate = (duration? * rate?).round();
            (estimate >= 1.0).then_some(estimate as u64)
        });

    Ok(VideoInfo {
        width,
        height,
        fps,
        total_frames,
    })
}

/// Parse an ffprobe rational such as "30000/1001"; "0/0" yields `None`
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Drain a child's stderr on a helper thread so a chatty process never
/// blocks on a full pipe
pub(crate) fn collect_stderr(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            text
        })
    })
}

pub(crate) fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
