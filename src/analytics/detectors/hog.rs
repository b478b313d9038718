use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::HOGDescriptor;
use opencv::prelude::*;

use crate::analytics::object::{Detector, DetectorError, DetectorKind, RawDetection};
use crate::frame::Frame;

use super::gray_mat;

const WIN_STRIDE: i32 = 8;
const PADDING: i32 = 4;
const PYRAMID_SCALE: f64 = 1.05;

/// OpenCV's stock pedestrian HOG + linear SVM.
pub struct HogPersonDetector {
    hog: HOGDescriptor,
    locations: Vector<Rect>,
    weights: Vector<f64>,
}

impl HogPersonDetector {
    pub fn new() -> Result<Self, DetectorError> {
        let mut hog = HOGDescriptor::default().map_err(DetectorError::backend)?;
        let svm = HOGDescriptor::get_default_people_detector().map_err(DetectorError::backend)?;
        hog.set_svm_detector(&svm).map_err(DetectorError::backend)?;
        Ok(Self {
            hog,
            locations: Vector::new(),
            weights: Vector::new(),
        })
    }
}

impl Detector for HogPersonDetector {
    fn name(&self) -> &'static str {
        "hog"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Person
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        let gray = gray_mat(frame)?;
        self.locations.clear();
        self.weights.clear();

        self.hog
            .detect_multi_scale_weights(
                &gray,
                &mut self.locations,
                &mut self.weights,
                0.0,
                Size::new(WIN_STRIDE, WIN_STRIDE),
                Size::new(PADDING, PADDING),
                PYRAMID_SCALE,
                2.0,
                false,
            )
            .map_err(DetectorError::backend)?;

        Ok(self
            .locations
            .iter()
            .zip(self.weights.iter())
            .map(|(r, w)| RawDetection {
                x: r.x as f32,
                y: r.y as f32,
                width: r.width as f32,
                height: r.height as f32,
                weight: Some(w as f32),
            })
            .collect())
    }
}
