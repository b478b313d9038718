use std::time::Duration;

use crate::camera::{FrameSource, SourceError};
use crate::config::Config;
use crate::frame::Frame;
use crate::storage::IncidentStore;

use super::incident::{IncidentEvent, IncidentPolicy, Origin};
use super::motion::{MotionSegmenter, Sensitivity};
use super::object::{DetectionFuser, Detector, FusedDetections};
use super::tracker::{IdentityTracker, TrackedObject};

/// Clips are sampled rather than analysed frame by frame.
pub const CLIP_SAMPLE_EVERY: u64 = 10;

const MAX_CLIP_READ_FAILURES: u32 = 3;

/// Everything one frame produced, in stage order.
#[derive(Debug)]
pub struct FrameAnalysis {
    pub motion: bool,
    pub detections: FusedDetections,
    pub tracks: Vec<TrackedObject>,
    pub incident: Option<IncidentEvent>,
}

impl FrameAnalysis {
    pub fn object_count(&self) -> usize {
        self.tracks.len()
    }
}

/// The per-frame decision chain of one session.
///
/// Every stage is owned here, so dropping the pipeline discards the background
/// model, the track registry and the cooldown window together.
pub struct FramePipeline {
    segmenter: MotionSegmenter,
    fuser: DetectionFuser,
    tracker: IdentityTracker,
    policy: IncidentPolicy,
}

impl FramePipeline {
    pub fn live(config: &Config, sensitivity: Sensitivity, detectors: Vec<Box<dyn Detector>>) -> Self {
        let cooldown = Duration::from_secs(config.surveillance.cooldown_secs);
        Self::with_policy(
            config,
            sensitivity,
            detectors,
            IncidentPolicy::new(cooldown, Origin::Live),
        )
    }

    /// Every qualifying sampled frame of a clip is an incident.
    pub fn clip(config: &Config, sensitivity: Sensitivity, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self::with_policy(
            config,
            sensitivity,
            detectors,
            IncidentPolicy::new(Duration::ZERO, Origin::Clip),
        )
    }

    fn with_policy(
        config: &Config,
        sensitivity: Sensitivity,
        detectors: Vec<Box<dyn Detector>>,
        policy: IncidentPolicy,
    ) -> Self {
        Self {
            segmenter: MotionSegmenter::new(config.motion.clone(), sensitivity),
            fuser: DetectionFuser::new(detectors, &config.detection),
            tracker: IdentityTracker::new(
                config.surveillance.max_disappeared,
                config.surveillance.max_match_distance,
            ),
            policy,
        }
    }

    pub fn detector_count(&self) -> usize {
        self.fuser.detector_count()
    }

    pub fn process(&mut self, frame: &Frame) -> FrameAnalysis {
        let motion = self.segmenter.observe(frame);
        let detections = self.fuser.detect(frame);
        self.tracker.update(&detections.boxes);
        let tracks: Vec<TrackedObject> = self.tracker.registry().values().copied().collect();
        let incident = self
            .policy
            .evaluate(motion, tracks.len(), frame, &detections);

        tracing::trace!(
            motion,
            region = self.segmenter.largest_region(),
            age_ms = frame.captured_at().elapsed().as_millis() as u64,
            boxes = detections.boxes.len(),
            tracks = tracks.len(),
            incident = incident.is_some(),
            "frame processed"
        );

        FrameAnalysis {
            motion,
            detections,
            tracks,
            incident,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipReport {
    pub incidents_detected: usize,
    pub frames_processed: u64,
}

/// Runs a finite source through `pipeline`, analysing every `sample_every`-th
/// frame and persisting each incident. `frames_processed` counts every frame read.
pub fn analyze_clip(
    source: &mut dyn FrameSource,
    pipeline: &mut FramePipeline,
    store: &dyn IncidentStore,
    sample_every: u64,
) -> ClipReport {
    let sample_every = sample_every.max(1);
    let mut report = ClipReport::default();
    let mut failures = 0;

    loop {
        let frame = match source.read() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(SourceError::EndOfStream) => break,
            Err(e @ SourceError::Read(_)) if failures < MAX_CLIP_READ_FAILURES => {
                failures += 1;
                tracing::warn!(source = source.name(), error = %e, "clip read failed, retrying");
                continue;
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "clip analysis stopped early");
                break;
            }
        };

        report.frames_processed += 1;
        if report.frames_processed % sample_every != 0 {
            continue;
        }

        let analysis = pipeline.process(&frame);
        if let Some(event) = analysis.incident {
            match store.persist(&event) {
                Ok(id) => {
                    report.incidents_detected += 1;
                    tracing::debug!(incident = %id, "clip incident stored");
                }
                Err(e) => tracing::error!(error = %e, "failed to store clip incident"),
            }
        }
    }

    source.close();
    tracing::info!(
        source = source.name(),
        frames = report.frames_processed,
        incidents = report.incidents_detected,
        "clip analysis finished"
    );
    report
}
