use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::frame::Frame;

use super::object::{DetectorKind, FusedDetections};

/// Where the frames behind an incident came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Clip,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Live => "live",
            Origin::Clip => "clip",
        }
    }
}

/// Which signals agreed on an incident. Renders as e.g. `live_motion+person+face`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionType {
    origin: Origin,
    kinds: Vec<DetectorKind>,
}

impl DetectionType {
    pub fn new(origin: Origin, detections: &FusedDetections) -> Self {
        Self {
            origin,
            kinds: detections.kinds().into_iter().collect(),
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_motion", self.origin.as_str())?;
        for kind in &self.kinds {
            write!(f, "+{kind}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub timestamp: DateTime<Utc>,
    pub snapshot: Frame,
    pub confidence: f32,
    pub detection_type: DetectionType,
    pub object_count: usize,
}

/// Decides when motion plus live tracks is worth an incident.
///
/// A single cooldown window covers the whole policy, so one incident suppresses
/// every other for `cooldown` no matter how the population changes.
pub struct IncidentPolicy {
    cooldown: Duration,
    origin: Origin,
    last_fired: Option<Instant>,
}

impl IncidentPolicy {
    pub fn new(cooldown: Duration, origin: Origin) -> Self {
        Self {
            cooldown,
            origin,
            last_fired: None,
        }
    }

    pub fn evaluate(
        &mut self,
        motion: bool,
        track_count: usize,
        frame: &Frame,
        detections: &FusedDetections,
    ) -> Option<IncidentEvent> {
        self.evaluate_at(Instant::now(), motion, track_count, frame, detections)
    }

    pub fn evaluate_at(
        &mut self,
        now: Instant,
        motion: bool,
        track_count: usize,
        frame: &Frame,
        detections: &FusedDetections,
    ) -> Option<IncidentEvent> {
        if !motion || track_count == 0 {
            return None;
        }
        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.cooldown {
                return None;
            }
        }
        self.last_fired = Some(now);

        Some(IncidentEvent {
            timestamp: Utc::now(),
            snapshot: frame.annotated(&detections.boxes),
            confidence: detections.confidence,
            detection_type: DetectionType::new(self.origin, detections),
            object_count: track_count,
        })
    }
}
