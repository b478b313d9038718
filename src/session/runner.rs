use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::analytics::{FrameAnalysis, FramePipeline, Sensitivity};
use crate::camera::{FrameSource, SourceError};
use crate::config::Config;
use crate::frame::Frame;
use crate::recording::RecordingSink;
use crate::storage::IncidentStore;

use super::events::StreamEvent;
use super::SessionFactory;

const STREAM_JPEG_QUALITY: u8 = 75;

/// Everything a runner needs, handed over when the session starts.
pub(super) struct RunnerContext {
    pub session: Uuid,
    pub config: Arc<Config>,
    pub sensitivity: Sensitivity,
    pub factory: Arc<dyn SessionFactory>,
    pub store: Arc<dyn IncidentStore>,
    pub events: broadcast::Sender<Arc<StreamEvent>>,
    pub shutdown: Arc<AtomicBool>,
}

struct RecordingSession {
    sink: Box<dyn RecordingSink>,
    started_at: Instant,
}

enum RecordingState {
    /// Opens on the next frame read.
    Pending,
    Recording(RecordingSession),
    Disabled,
}

impl RecordingState {
    fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording(_))
    }
}

/// Owns every per-session resource. Dropping it releases the source and
/// finalises the recording, whichever way the loop was left.
struct SessionRunner {
    ctx: RunnerContext,
    source: Box<dyn FrameSource>,
    pipeline: FramePipeline,
    recording: RecordingState,
    frames: u64,
    incidents: u64,
}

/// Blocking entry point for one session; returns when stopped or the source ends.
pub(super) fn run(ctx: RunnerContext) {
    let mut runner = SessionRunner::open(ctx);
    runner.run();
}

impl SessionRunner {
    fn open(ctx: RunnerContext) -> Self {
        let source = match ctx.factory.open_source() {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(session = %ctx.session, error = %e, "camera unavailable, using synthetic source");
                ctx.factory.fallback_source()
            }
        };
        let pipeline = FramePipeline::live(&ctx.config, ctx.sensitivity, ctx.factory.detectors());
        let recording = if ctx.config.surveillance.record {
            RecordingState::Pending
        } else {
            RecordingState::Disabled
        };

        tracing::info!(
            session = %ctx.session,
            source = source.name(),
            sensitivity = %ctx.sensitivity,
            detectors = pipeline.detector_count(),
            "session started"
        );

        Self {
            ctx,
            source,
            pipeline,
            recording,
            frames: 0,
            incidents: 0,
        }
    }

    fn run(&mut self) {
        let interval = Duration::from_millis(self.ctx.config.surveillance.frame_interval_ms);

        while !self.ctx.shutdown.load(Ordering::SeqCst) {
            match self.source.read() {
                Ok(frame) => self.step(&frame),
                Err(SourceError::EndOfStream) => {
                    tracing::info!(session = %self.ctx.session, source = self.source.name(), "source ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!(session = %self.ctx.session, error = %e, "frame read failed");
                    self.emit(StreamEvent::read_failure(
                        e.to_string(),
                        self.recording.is_recording(),
                    ));
                }
            }
            thread::sleep(interval);
        }
    }

    fn step(&mut self, frame: &Frame) {
        self.frames += 1;
        self.ensure_recording(frame);

        let analysis = self.pipeline.process(frame);

        if let Some(event) = &analysis.incident {
            match self.ctx.store.persist(event) {
                Ok(id) => {
                    self.incidents += 1;
                    tracing::info!(session = %self.ctx.session, incident = %id, "incident recorded");
                }
                Err(e) => tracing::error!(session = %self.ctx.session, error = %e, "failed to persist incident"),
            }
        }

        self.write_recording(frame);

        let encoded = if self.ctx.events.receiver_count() > 0 {
            encode_frame(frame, &analysis)
        } else {
            None
        };
        self.emit(StreamEvent::analysed(
            &analysis,
            encoded,
            self.recording.is_recording(),
        ));
    }

    fn ensure_recording(&mut self, frame: &Frame) {
        if !matches!(self.recording, RecordingState::Pending) {
            return;
        }
        let fps = self.ctx.config.surveillance.target_fps();
        self.recording = match self.ctx.factory.open_recording(frame.width(), frame.height(), fps) {
            Ok(sink) => RecordingState::Recording(RecordingSession {
                sink,
                started_at: Instant::now(),
            }),
            Err(e) => {
                tracing::warn!(session = %self.ctx.session, error = %e, "recording unavailable for this session");
                RecordingState::Disabled
            }
        };
    }

    fn write_recording(&mut self, frame: &Frame) {
        let RecordingState::Recording(recording) = &mut self.recording else {
            return;
        };
        if let Err(e) = recording.sink.write(frame) {
            tracing::error!(session = %self.ctx.session, error = %e, "recording failed, disabling");
            recording.sink.close();
            self.recording = RecordingState::Disabled;
        }
    }

    fn emit(&self, event: StreamEvent) {
        // No subscribers is not an error.
        let _ = self.ctx.events.send(Arc::new(event));
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        if let RecordingState::Recording(recording) = &mut self.recording {
            recording.sink.close();
            tracing::debug!(
                session = %self.ctx.session,
                secs = recording.started_at.elapsed().as_secs(),
                "recording closed"
            );
        }
        self.recording = RecordingState::Disabled;
        self.source.close();

        tracing::info!(
            session = %self.ctx.session,
            frames = self.frames,
            incidents = self.incidents,
            "session ended"
        );
    }
}

fn encode_frame(frame: &Frame, analysis: &FrameAnalysis) -> Option<String> {
    match frame
        .annotated(&analysis.detections.boxes)
        .encode_jpeg(STREAM_JPEG_QUALITY)
    {
        Ok(jpeg) => Some(STANDARD.encode(jpeg)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode stream frame");
            None
        }
    }
}
