use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use chrono::Local;

use crate::frame::Frame;

use super::{RecordingSink, SinkError};

const WRITE_QUEUE: usize = 16;

/// Pipes raw RGB24 frames into an ffmpeg H.264 encoder writing an MP4.
pub struct FfmpegRecorder {
    path: PathBuf,
    width: u32,
    height: u32,
    frame_tx: Option<SyncSender<Vec<u8>>>,
    child: Option<Child>,
    writer_handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl FfmpegRecorder {
    /// Starts a recording at `<dir>/recording_YYYYmmdd_HHMMSS.mp4`.
    pub fn start(dir: &Path, width: u32, height: u32, fps: u32) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(recording_file_name());

        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &fps.max(1).to_string(),
                "-i",
                "pipe:0",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SinkError::Unavailable("ffmpeg not found".into())
                } else {
                    SinkError::Io(e)
                }
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SinkError::Unavailable("failed to capture ffmpeg stdin".into()));
        };

        let (frame_tx, frame_rx) = mpsc::sync_channel::<Vec<u8>>(WRITE_QUEUE);
        let writer_handle = thread::spawn(move || {
            let mut stdin = stdin;
            while let Ok(data) = frame_rx.recv() {
                if stdin.write_all(&data).is_err() {
                    break;
                }
            }
            // Dropping stdin signals end of input to the encoder.
        });

        tracing::info!(path = %path.display(), width, height, fps, "recording started");

        Ok(Self {
            path,
            width,
            height,
            frame_tx: Some(frame_tx),
            child: Some(child),
            writer_handle: Some(writer_handle),
            dropped: 0,
        })
    }
}

impl RecordingSink for FfmpegRecorder {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SinkError::FrameSize {
                width: self.width,
                height: self.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }
        let Some(tx) = &self.frame_tx else {
            return Err(SinkError::Closed);
        };
        match tx.try_send(frame.as_raw().to_vec()) {
            Ok(()) => Ok(()),
            // Encoder is behind; losing a frame beats stalling the session.
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Closed),
        }
    }

    fn close(&mut self) {
        // Closing the channel lets the writer flush what is queued and hang up stdin.
        if self.frame_tx.take().is_none() {
            return;
        }
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(path = %self.path.display(), %status, "encoder exited abnormally"),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to wait for encoder"),
            }
        }
        tracing::info!(path = %self.path.display(), dropped = self.dropped, "recording stopped");
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

fn recording_file_name() -> String {
    format!("recording_{}.mp4", Local::now().format("%Y%m%d_%H%M%S_%3f"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_timestamped() {
        let name = recording_file_name();
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".mp4"));
        // recording_YYYYmmdd_HHMMSS_mmm.mp4
        assert_eq!(name.len(), "recording_".len() + 19 + ".mp4".len());
    }

    #[test]
    fn restarts_within_a_second_get_distinct_files() {
        let first = recording_file_name();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = recording_file_name();
        assert_ne!(first, second);
    }
}
