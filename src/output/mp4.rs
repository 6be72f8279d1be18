use super::FrameSink;
use crate::media::{collect_stderr, join_stderr, FfmpegTools};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

/// MPEG-4 Part 2 (`mp4v`) writer backed by an `ffmpeg` child process
///
/// Raw RGB24 frames are piped to ffmpeg's stdin; the container is always
/// `.mp4` whatever the input format was.
pub struct FfmpegVideoWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl FfmpegVideoWriter {
    pub fn create(
        tools: &FfmpegTools,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self> {
        tracing::info!(
            "Opening mp4v writer at {} ({}x{} @ {:.2} fps)",
            path.display(),
            width,
            height,
            fps
        );

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps}"))
            .args([
                "-i", "-", "-an", "-c:v", "mpeg4", "-tag:v", "mp4v", "-q:v", "5", "-pix_fmt",
                "yuv420p", "-f", "mp4",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", tools.ffmpeg.display()))?;

        let stdin = child.stdin.take().context("ffmpeg encoder has no stdin pipe")?;
        let stderr = collect_stderr(child.stderr.take());

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            path: path.to_path_buf(),
            width,
            height,
            frames_written: 0,
        })
    }
}

impl FrameSink for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let stdin = self.stdin.as_mut().context("video writer already finished")?;
        stdin
            .write_all(frame.as_raw())
            .context("Failed to write frame to ffmpeg encoder")?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin signals end of input
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().context("Failed to wait for ffmpeg encoder")?;
        let stderr = join_stderr(self.stderr.take());
        if !status.success() {
            bail!(
                "ffmpeg encoder failed after {} frames (exit code {:?}): {}",
                self.frames_written,
                status.code(),
                stderr
            );
        }
        tracing::info!(
            frames = self.frames_written,
            "Finished writing {}",
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
