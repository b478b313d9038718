use serde::Serialize;

use crate::analytics::{FrameAnalysis, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackPoint {
    pub id: TrackId,
    pub x: i32,
    pub y: i32,
}

/// One outbound message per processed frame or idle heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    /// Base64 JPEG of the annotated frame; absent while idle or unobserved.
    pub frame: Option<String>,
    pub status: SessionStatus,
    pub motion_detected: bool,
    pub object_count: usize,
    pub confidence_percent: u32,
    pub incident_detected: bool,
    pub recording: bool,
    pub tracks: Vec<TrackPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn idle() -> Self {
        Self {
            frame: None,
            status: SessionStatus::Idle,
            motion_detected: false,
            object_count: 0,
            confidence_percent: 0,
            incident_detected: false,
            recording: false,
            tracks: Vec::new(),
            error: None,
        }
    }

    /// A live session that could not read this iteration's frame.
    pub fn read_failure(error: String, recording: bool) -> Self {
        Self {
            status: SessionStatus::Active,
            recording,
            error: Some(error),
            ..Self::idle()
        }
    }

    pub fn analysed(analysis: &FrameAnalysis, frame: Option<String>, recording: bool) -> Self {
        Self {
            frame,
            status: SessionStatus::Active,
            motion_detected: analysis.motion,
            object_count: analysis.object_count(),
            confidence_percent: (analysis.detections.confidence.clamp(0.0, 1.0) * 100.0).round()
                as u32,
            incident_detected: analysis.incident.is_some(),
            recording,
            tracks: analysis
                .tracks
                .iter()
                .map(|t| TrackPoint {
                    id: t.id,
                    x: t.centroid.x,
                    y: t.centroid.y,
                })
                .collect(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_event_has_null_frame_and_no_error_field() {
        let json = serde_json::to_value(StreamEvent::idle()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json["frame"].is_null());
        assert!(json.get("error").is_none());
        assert_eq!(json["tracks"], serde_json::json!([]));
    }

    #[test]
    fn read_failure_stays_active() {
        let json = serde_json::to_value(StreamEvent::read_failure("timeout".into(), true)).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["recording"], true);
    }
}
