mod ffmpeg;

pub use ffmpeg::FfmpegRecorder;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("frame is {got_width}x{got_height}, recording is {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("encoder stopped accepting frames")]
    Closed,
}

/// Destination for the frames of one session.
pub trait RecordingSink: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Finalises the output. Must be safe to call more than once.
    fn close(&mut self);
}
