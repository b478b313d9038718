mod ffmpeg;
mod synthetic;

pub use ffmpeg::{FfmpegInput, FfmpegSource};
pub use synthetic::SyntheticSource;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("end of stream")]
    EndOfStream,
    /// A single read failed; the next one may succeed.
    #[error("frame read failed: {0}")]
    Read(String),
}

/// Produces frames on demand, one at a time, in capture order.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Releases the underlying device. Must be safe to call more than once.
    fn close(&mut self);

    fn name(&self) -> &str;
}
