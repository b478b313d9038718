use std::path::Path;

use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::analytics::object::{Detector, DetectorError, DetectorKind, RawDetection};
use crate::frame::Frame;

use super::gray_mat;

const SCALE_FACTOR: f64 = 1.1;
const MIN_NEIGHBORS: i32 = 5;
const MIN_FACE: i32 = 30;

/// Haar cascade face detector. Cascades report no weight, so every box is kept.
pub struct CascadeFaceDetector {
    classifier: CascadeClassifier,
    rects: Vector<Rect>,
}

impl CascadeFaceDetector {
    pub fn new(path: &Path) -> Result<Self, DetectorError> {
        let path = path
            .to_str()
            .ok_or_else(|| DetectorError::Backend(format!("invalid cascade path: {}", path.display())))?;
        let classifier = CascadeClassifier::new(path).map_err(DetectorError::backend)?;
        if classifier.empty().map_err(DetectorError::backend)? {
            return Err(DetectorError::Backend(format!("cascade {path} is empty")));
        }
        Ok(Self {
            classifier,
            rects: Vector::new(),
        })
    }
}

impl Detector for CascadeFaceDetector {
    fn name(&self) -> &'static str {
        "haar-cascade"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Face
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        let gray = gray_mat(frame)?;
        self.rects.clear();
        self.classifier
            .detect_multi_scale(
                &gray,
                &mut self.rects,
                SCALE_FACTOR,
                MIN_NEIGHBORS,
                0,
                Size::new(MIN_FACE, MIN_FACE),
                Size::default(),
            )
            .map_err(DetectorError::backend)?;

        Ok(self
            .rects
            .iter()
            .map(|r| RawDetection {
                x: r.x as f32,
                y: r.y as f32,
                width: r.width as f32,
                height: r.height as f32,
                weight: None,
            })
            .collect())
    }
}
