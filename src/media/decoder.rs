use super::ffmpeg::{collect_stderr, join_stderr, FfmpegTools, VideoInfo};
use super::FrameSource;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

/// Sequential RGB24 frame decoder backed by an `ffmpeg` child process
pub struct FfmpegVideoReader {
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    info: VideoInfo,
    frame_len: usize,
    frames_read: u64,
}

impl FfmpegVideoReader {
    pub fn open(tools: &FfmpegTools, path: &Path) -> Result<Self> {
        let info = tools
            .probe(path)
            .with_context(|| format!("Failed to probe {}", path.display()))?;

        tracing::info!(
            "Opening video {} ({}x{} @ {:.2} fps, {:?} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.total_frames
        );

        // Keep the stored orientation so frame size matches the probed size,
        // and emit every decoded frame once: rawvideo would otherwise force a
        // constant rate and duplicate or drop frames of variable-rate input
        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0", "-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt",
                "rgb24", "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", tools.ffmpeg.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("ffmpeg decoder has no stdout pipe")?;
        let stderr = collect_stderr(child.stderr.take());

        Ok(Self {
            child: Some(child),
            stdout: BufReader::new(stdout),
            stderr,
            frame_len: info.width as usize * info.height as usize * 3,
            info,
            frames_read: 0,
        })
    }

    /// Reap the child once the stream is exhausted and surface decode failures
    fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().context("Failed to wait for ffmpeg decoder")?;
        let stderr = join_stderr(self.stderr.take());
        if !status.success() {
            bail!(
                "ffmpeg decoder failed after {} frames (exit code {:?}): {}",
                self.frames_read,
                status.code(),
                stderr
            );
        }
        tracing::debug!(frames = self.frames_read, "Video decoder reached end of stream");
        Ok(())
    }
}

impl FrameSource for FfmpegVideoReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.child.is_none() {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read frame from ffmpeg"),
            }
        }

        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < buf.len() {
            self.finish()?;
            bail!(
                "truncated frame {}: got {} of {} bytes",
                self.frames_read,
                filled,
                buf.len()
            );
        }

        self.frames_read += 1;
        let frame = RgbImage::from_raw(self.info.width, self.info.height, buf)
            .context("frame buffer does not match probed size")?;
        Ok(Some(frame))
    }

    fn info(&self) -> &VideoInfo {
        &self.info
    }
}

impl Drop for FfmpegVideoReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
