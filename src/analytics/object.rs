use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::DetectionConfig;
use crate::frame::Frame;

use super::tracker::Centroid;

/// Capability a detector provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Person,
    Face,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::Person => "person",
            DetectorKind::Face => "face",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector backend error: {0}")]
    Backend(String),
}

impl DetectorError {
    pub fn backend(e: impl fmt::Display) -> Self {
        DetectorError::Backend(e.to_string())
    }
}

/// A box as reported by a detector, in the coordinates of the frame it was given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub weight: Option<f32>,
}

/// A detection in full-frame coordinates, valid for one frame only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: Option<f32>,
    pub source: DetectorKind,
}

impl DetectionBox {
    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }
}

/// A black-box detection capability. Implementations must not hold on to the frame.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn kind(&self) -> DetectorKind;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError>;
}

#[derive(Debug, Clone, Default)]
pub struct FusedDetections {
    pub boxes: Vec<DetectionBox>,
    pub confidence: f32,
}

impl FusedDetections {
    pub fn kinds(&self) -> BTreeSet<DetectorKind> {
        self.boxes.iter().map(|b| b.source).collect()
    }
}

/// Runs every configured detector on a downsampled frame and unions their boxes.
///
/// Boxes from different detectors are concatenated as-is; a person seen by both
/// the person and the face detector contributes two boxes.
pub struct DetectionFuser {
    detectors: Vec<Box<dyn Detector>>,
    working_width: u32,
    min_weight: f32,
    default_confidence: f32,
}

impl DetectionFuser {
    pub fn new(detectors: Vec<Box<dyn Detector>>, config: &DetectionConfig) -> Self {
        Self {
            detectors,
            working_width: config.working_width,
            min_weight: config.min_weight,
            default_confidence: config.default_confidence,
        }
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    pub fn detect(&mut self, frame: &Frame) -> FusedDetections {
        if self.detectors.is_empty() {
            return FusedDetections::default();
        }

        let (working, scale) = frame.downscaled(self.working_width);
        let min_weight = self.min_weight;
        let mut boxes = Vec::new();

        for detector in self.detectors.iter_mut() {
            let raw = match detector.detect(&working) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(detector = detector.name(), error = %e, "detector failed");
                    continue;
                }
            };

            let kind = detector.kind();
            let before = boxes.len();
            boxes.extend(
                raw.into_iter()
                    .filter(|d| d.weight.map_or(true, |w| w >= min_weight))
                    .map(|d| rescale(d, scale, kind)),
            );

            tracing::trace!(
                detector = detector.name(),
                boxes = boxes.len() - before,
                "detector finished"
            );
        }

        let confidence = self.aggregate_confidence(&boxes);
        FusedDetections { boxes, confidence }
    }

    fn aggregate_confidence(&self, boxes: &[DetectionBox]) -> f32 {
        if boxes.is_empty() {
            return 0.0;
        }
        let reported: Vec<f32> = boxes.iter().filter_map(|b| b.confidence).collect();
        if reported.is_empty() {
            return self.default_confidence;
        }
        let mean = reported.iter().sum::<f32>() / reported.len() as f32;
        mean.clamp(0.0, 1.0)
    }
}

fn rescale(d: RawDetection, scale: f32, source: DetectorKind) -> DetectionBox {
    DetectionBox {
        x: (d.x / scale).round() as i32,
        y: (d.y / scale).round() as i32,
        width: (d.width / scale).round() as i32,
        height: (d.height / scale).round() as i32,
        confidence: d.weight.map(|w| w.clamp(0.0, 1.0)),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    struct FixedDetector {
        kind: DetectorKind,
        detections: Vec<RawDetection>,
        seen_width: Arc<Mutex<Option<u32>>>,
    }

    impl Detector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn kind(&self) -> DetectorKind {
            self.kind
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
            *self.seen_width.lock().unwrap() = Some(frame.width());
            Ok(self.detections.clone())
        }
    }

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn kind(&self) -> DetectorKind {
            DetectorKind::Face
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
            Err(DetectorError::Backend("model crashed".into()))
        }
    }

    fn raw(x: f32, y: f32, weight: Option<f32>) -> RawDetection {
        RawDetection {
            x,
            y,
            width: 50.0,
            height: 100.0,
            weight,
        }
    }

    fn fixed(kind: DetectorKind, detections: Vec<RawDetection>) -> Box<dyn Detector> {
        Box::new(FixedDetector {
            kind,
            detections,
            seen_width: Arc::new(Mutex::new(None)),
        })
    }

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::new(width, height))
    }

    #[test]
    fn boxes_are_rescaled_to_full_frame() {
        let seen = Arc::new(Mutex::new(None));
        let detector = FixedDetector {
            kind: DetectorKind::Person,
            detections: vec![raw(100.0, 40.0, Some(0.9))],
            seen_width: Arc::clone(&seen),
        };
        let mut fuser = DetectionFuser::new(vec![Box::new(detector)], &DetectionConfig::default());

        let fused = fuser.detect(&frame(1280, 960));

        assert_eq!(*seen.lock().unwrap(), Some(640));
        assert_eq!(fused.boxes.len(), 1);
        let b = fused.boxes[0];
        assert_eq!((b.x, b.y, b.width, b.height), (200, 80, 100, 200));
        assert_eq!(b.source, DetectorKind::Person);
    }

    #[test]
    fn low_weight_boxes_are_discarded() {
        let mut fuser = DetectionFuser::new(
            vec![fixed(
                DetectorKind::Person,
                vec![raw(0.0, 0.0, Some(0.1)), raw(10.0, 10.0, Some(0.6)), raw(20.0, 20.0, None)],
            )],
            &DetectionConfig::default(),
        );
        let fused = fuser.detect(&frame(320, 240));
        assert_eq!(fused.boxes.len(), 2);
        assert!((fused.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn detectors_are_unioned_without_dedup() {
        let same = raw(10.0, 10.0, None);
        let mut fuser = DetectionFuser::new(
            vec![
                fixed(DetectorKind::Person, vec![same]),
                fixed(DetectorKind::Face, vec![same]),
            ],
            &DetectionConfig::default(),
        );
        let fused = fuser.detect(&frame(320, 240));
        assert_eq!(fused.boxes.len(), 2);
        assert_eq!(
            fused.kinds().into_iter().collect::<Vec<_>>(),
            vec![DetectorKind::Person, DetectorKind::Face]
        );
    }

    #[test]
    fn confidence_defaults_when_unreported() {
        let mut fuser = DetectionFuser::new(
            vec![fixed(DetectorKind::Person, vec![raw(0.0, 0.0, None)])],
            &DetectionConfig::default(),
        );
        assert!((fuser.detect(&frame(320, 240)).confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_clamped() {
        let mut fuser = DetectionFuser::new(
            vec![fixed(
                DetectorKind::Person,
                vec![raw(0.0, 0.0, Some(2.5)), raw(5.0, 5.0, Some(1.5))],
            )],
            &DetectionConfig::default(),
        );
        let fused = fuser.detect(&frame(320, 240));
        assert_eq!(fused.confidence, 1.0);
        assert!(fused.boxes.iter().all(|b| b.confidence == Some(1.0)));
    }

    #[test]
    fn failing_detector_contributes_nothing() {
        let mut fuser = DetectionFuser::new(
            vec![
                Box::new(BrokenDetector),
                fixed(DetectorKind::Person, vec![raw(0.0, 0.0, Some(0.8))]),
            ],
            &DetectionConfig::default(),
        );
        let fused = fuser.detect(&frame(320, 240));
        assert_eq!(fused.boxes.len(), 1);
        assert_eq!(fused.boxes[0].source, DetectorKind::Person);
    }

    #[test]
    fn no_boxes_means_zero_confidence() {
        let mut fuser = DetectionFuser::new(
            vec![fixed(DetectorKind::Person, Vec::new())],
            &DetectionConfig::default(),
        );
        let fused = fuser.detect(&frame(320, 240));
        assert!(fused.boxes.is_empty());
        assert_eq!(fused.confidence, 0.0);
    }

    #[test]
    fn centroid_uses_integer_midpoint() {
        let b = DetectionBox {
            x: 10,
            y: 20,
            width: 31,
            height: 40,
            confidence: None,
            source: DetectorKind::Face,
        };
        assert_eq!(b.centroid(), Centroid { x: 25, y: 40 });
    }
}
