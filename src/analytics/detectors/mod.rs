//! Concrete detector backends and the startup choice between them.

#[cfg(feature = "opencv")]
mod cascade;
#[cfg(feature = "opencv")]
mod hog;
#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "opencv")]
pub use cascade::CascadeFaceDetector;
#[cfg(feature = "opencv")]
pub use hog::HogPersonDetector;
#[cfg(feature = "onnx")]
pub use onnx::OnnxDetector;

use std::fmt;
use std::path::PathBuf;

use crate::config::DetectionConfig;

use super::object::Detector;

#[derive(Debug, Clone, PartialEq)]
pub enum PersonBackend {
    Model(PathBuf),
    Hog,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceBackend {
    Model(PathBuf),
    Cascade(PathBuf),
    Disabled,
}

/// Which backend serves each detector kind. Resolved once at startup from the
/// configuration and the features compiled in, then instantiated per session.
#[derive(Debug, Clone)]
pub struct DetectorPlan {
    pub person: PersonBackend,
    pub face: FaceBackend,
    pub model_confidence: f32,
}

impl DetectorPlan {
    pub fn resolve(config: &DetectionConfig) -> Self {
        let person = match &config.person_model {
            Some(path) if cfg!(feature = "onnx") => PersonBackend::Model(path.clone()),
            _ if config.hog && cfg!(feature = "opencv") => PersonBackend::Hog,
            _ => PersonBackend::Disabled,
        };

        let face = match (&config.face_model, &config.face_cascade) {
            (Some(path), _) if cfg!(feature = "onnx") => FaceBackend::Model(path.clone()),
            (_, Some(path)) if cfg!(feature = "opencv") && path.exists() => {
                FaceBackend::Cascade(path.clone())
            }
            _ => FaceBackend::Disabled,
        };

        if config.person_model.is_some() && !matches!(person, PersonBackend::Model(_)) {
            tracing::warn!("person_model configured but onnx support is not compiled in");
        }
        if config.face_model.is_some() && !matches!(face, FaceBackend::Model(_)) {
            tracing::warn!("face_model configured but onnx support is not compiled in");
        }

        Self {
            person,
            face,
            model_confidence: config.model_confidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.person == PersonBackend::Disabled && self.face == FaceBackend::Disabled
    }

    /// Builds fresh detector instances. A backend that fails to load is skipped.
    pub fn instantiate(&self) -> Vec<Box<dyn Detector>> {
        #[cfg_attr(not(any(feature = "opencv", feature = "onnx")), allow(unused_mut))]
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();

        match &self.person {
            #[cfg(feature = "onnx")]
            PersonBackend::Model(path) => push(
                &mut detectors,
                OnnxDetector::person(path, self.model_confidence),
            ),
            #[cfg(feature = "opencv")]
            PersonBackend::Hog => push(&mut detectors, HogPersonDetector::new()),
            _ => {}
        }

        match &self.face {
            #[cfg(feature = "onnx")]
            FaceBackend::Model(path) => push(
                &mut detectors,
                OnnxDetector::face(path, self.model_confidence),
            ),
            #[cfg(feature = "opencv")]
            FaceBackend::Cascade(path) => push(&mut detectors, CascadeFaceDetector::new(path)),
            _ => {}
        }

        detectors
    }
}

impl fmt::Display for DetectorPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.person {
            PersonBackend::Model(path) => write!(f, "person=onnx:{}", path.display())?,
            PersonBackend::Hog => f.write_str("person=hog")?,
            PersonBackend::Disabled => f.write_str("person=off")?,
        }
        match &self.face {
            FaceBackend::Model(path) => write!(f, " face=onnx:{}", path.display()),
            FaceBackend::Cascade(path) => write!(f, " face=cascade:{}", path.display()),
            FaceBackend::Disabled => f.write_str(" face=off"),
        }
    }
}

#[cfg(any(feature = "opencv", feature = "onnx"))]
fn push<D: Detector + 'static>(
    detectors: &mut Vec<Box<dyn Detector>>,
    built: Result<D, super::object::DetectorError>,
) {
    match built {
        Ok(detector) => {
            tracing::debug!(detector = detector.name(), "detector loaded");
            detectors.push(Box::new(detector));
        }
        Err(e) => tracing::error!(error = %e, "failed to load detector"),
    }
}

#[cfg(feature = "opencv")]
fn gray_mat(
    frame: &crate::frame::Frame,
) -> Result<opencv::core::Mat, super::object::DetectorError> {
    crate::frame::gray_mat(&frame.to_gray()).map_err(super::object::DetectorError::backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_configured_means_no_detectors() {
        let config = DetectionConfig {
            hog: false,
            ..DetectionConfig::default()
        };
        let plan = DetectorPlan::resolve(&config);
        assert!(plan.is_empty());
        assert!(plan.instantiate().is_empty());
        assert_eq!(plan.to_string(), "person=off face=off");
    }

    #[test]
    fn missing_cascade_file_disables_faces() {
        let config = DetectionConfig {
            face_cascade: Some(PathBuf::from("/nonexistent/haarcascade_frontalface.xml")),
            ..DetectionConfig::default()
        };
        assert_eq!(DetectorPlan::resolve(&config).face, FaceBackend::Disabled);
    }

    #[cfg(feature = "opencv")]
    #[test]
    fn default_config_detects_people_with_hog() {
        let plan = DetectorPlan::resolve(&DetectionConfig::default());
        assert_eq!(plan.person, PersonBackend::Hog);
        assert!(!plan.is_empty());
        assert_eq!(plan.to_string(), "person=hog face=off");

        let detectors = plan.instantiate();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].name(), "hog");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn models_need_onnx_support() {
        let config = DetectionConfig {
            hog: false,
            person_model: Some(PathBuf::from("person.onnx")),
            face_model: Some(PathBuf::from("face.onnx")),
            ..DetectionConfig::default()
        };
        assert!(DetectorPlan::resolve(&config).is_empty());
    }
}
