pub mod detectors;
mod incident;
mod motion;
mod object;
mod pipeline;
mod tracker;

pub use detectors::DetectorPlan;
pub use incident::{DetectionType, IncidentEvent, IncidentPolicy, Origin};
pub use motion::{MotionSegmenter, Sensitivity};
pub use object::{
    DetectionBox, DetectionFuser, Detector, DetectorError, DetectorKind, FusedDetections,
    RawDetection,
};
pub use pipeline::{analyze_clip, ClipReport, FrameAnalysis, FramePipeline, CLIP_SAMPLE_EVERY};
pub use tracker::{Centroid, IdentityTracker, TrackId, TrackRegistry, TrackedObject};
