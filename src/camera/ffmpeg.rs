use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::CameraConfig;
use crate::frame::Frame;

use super::{FrameSource, SourceError};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(2);
const FRAME_QUEUE: usize = 4;

/// What ffmpeg should open and the size it should scale frames to.
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    pub input: String,
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl FfmpegInput {
    pub fn camera(config: &CameraConfig) -> Self {
        Self {
            input: config.input.clone(),
            format: config.format.clone(),
            width: config.width,
            height: config.height,
        }
    }

    /// A local video file, format detected by ffmpeg.
    pub fn file(path: &std::path::Path, width: u32, height: u32) -> Self {
        Self {
            input: path.display().to_string(),
            format: None,
            width,
            height,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(String::from)
            .collect();
        if let Some(format) = &self.format {
            args.extend(["-f".into(), format.clone()]);
        }
        args.extend([
            "-i".into(),
            self.input.clone(),
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ]);
        args
    }
}

/// Decodes any ffmpeg-readable input to packed RGB24 frames of a fixed size.
pub struct FfmpegSource {
    name: String,
    width: u32,
    height: u32,
    frame_rx: Receiver<Vec<u8>>,
    pending: Option<Frame>,
    child: Option<Child>,
    _reader_handle: JoinHandle<()>,
}

impl FfmpegSource {
    /// Spawns ffmpeg and waits for the first frame, so an unopenable input
    /// is reported here rather than on the first read.
    pub fn open(input: &FfmpegInput) -> Result<Self, SourceError> {
        let mut child = Command::new("ffmpeg")
            .args(input.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SourceError::Unavailable("ffmpeg not found".into())
                } else {
                    SourceError::Unavailable(e.to_string())
                }
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SourceError::Unavailable("failed to capture ffmpeg stdout".into()));
        };

        let frame_size = input.width as usize * input.height as usize * 3;
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Vec<u8>>(FRAME_QUEUE);

        let reader_handle = thread::spawn(move || {
            let mut stdout = stdout;
            loop {
                let mut buf = vec![0u8; frame_size];
                if stdout.read_exact(&mut buf).is_err() {
                    break;
                }
                if frame_tx.send(buf).is_err() {
                    break;
                }
            }
        });

        let mut source = Self {
            name: format!("ffmpeg:{}", input.input),
            width: input.width,
            height: input.height,
            frame_rx,
            pending: None,
            child: Some(child),
            _reader_handle: reader_handle,
        };

        match source.receive(FIRST_FRAME_TIMEOUT) {
            Ok(frame) => {
                source.pending = Some(frame);
                tracing::info!(source = %source.name, width = input.width, height = input.height, "ffmpeg source opened");
                Ok(source)
            }
            Err(e) => Err(SourceError::Unavailable(format!("{}: {e}", input.input))),
        }
    }

    fn receive(&self, timeout: Duration) -> Result<Frame, SourceError> {
        let data = match self.frame_rx.recv_timeout(timeout) {
            Ok(data) => data,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SourceError::Read("timed out waiting for a frame".into()))
            }
            Err(RecvTimeoutError::Disconnected) => return Err(SourceError::EndOfStream),
        };
        Frame::from_rgb(self.width, self.height, data)
            .ok_or_else(|| SourceError::Read("short frame from ffmpeg".into()))
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        if self.child.is_none() {
            return Err(SourceError::EndOfStream);
        }
        self.receive(FRAME_READ_TIMEOUT)
    }

    fn close(&mut self) {
        self.pending = None;
        // The reader thread exits once ffmpeg is gone or the receiver is dropped.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(source = %self.name, "ffmpeg source closed");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_input_passes_format() {
        let args = FfmpegInput::camera(&CameraConfig::default()).args();
        let joined = args.join(" ");
        assert!(joined.contains("-f v4l2 -i /dev/video0"));
        assert!(joined.contains("scale=640:480"));
        assert!(joined.ends_with("-f rawvideo -pix_fmt rgb24 pipe:1"));
    }

    #[test]
    fn file_input_format_is_detected_by_ffmpeg() {
        let args = FfmpegInput::file(std::path::Path::new("/tmp/clip.mp4"), 320, 240).args();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/tmp/clip.mp4");
        assert!(!args[..input].contains(&"-f".to_string()));
    }
}
