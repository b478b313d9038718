//! Adaptive background subtraction reduced to a single "motion present" flag.
//!
//! With the `opencv` feature the model is OpenCV's MOG2 and the mask is
//! dilated and labelled by `imgproc`. Without it a single running Gaussian per
//! pixel stands in, post-processed by `imageproc`.

#[cfg(not(feature = "opencv"))]
mod gaussian;
#[cfg(feature = "opencv")]
mod mog2;

use std::fmt;

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MotionConfig;
use crate::frame::Frame;

#[cfg(not(feature = "opencv"))]
use gaussian::GaussianBackground as Background;
#[cfg(feature = "opencv")]
use mog2::Mog2Background as Background;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("analysis frame is empty")]
    EmptyFrame,
    #[cfg(feature = "opencv")]
    #[error("background subtraction failed: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// How large a changed region must be before it counts as motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    High,
    #[default]
    Medium,
    Low,
}

impl Sensitivity {
    /// Minimum region area in full-frame pixels. Strictly increasing from high to low.
    pub fn min_area(self) -> f32 {
        match self {
            Sensitivity::High => 500.0,
            Sensitivity::Medium => 1000.0,
            Sensitivity::Low => 2500.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::High => "high",
            Sensitivity::Medium => "medium",
            Sensitivity::Low => "low",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct MotionSegmenter {
    config: MotionConfig,
    sensitivity: Sensitivity,
    background: Option<Background>,
    largest_region: f32,
}

impl MotionSegmenter {
    pub fn new(config: MotionConfig, sensitivity: Sensitivity) -> Self {
        Self {
            config,
            sensitivity,
            background: None,
            largest_region: 0.0,
        }
    }

    /// Area of the largest changed region seen by the last `observe`, in full-frame pixels.
    pub fn largest_region(&self) -> f32 {
        self.largest_region
    }

    /// A failed analysis counts as no motion.
    pub fn observe(&mut self, frame: &Frame) -> bool {
        self.largest_region = 0.0;
        match self.segment(frame) {
            Ok(motion) => motion,
            Err(e) => {
                tracing::warn!(error = %e, "motion analysis failed");
                false
            }
        }
    }

    fn segment(&mut self, frame: &Frame) -> Result<bool, MotionError> {
        let (gray, scale) = self.analysis_image(frame);
        if gray.width() == 0 || gray.height() == 0 {
            return Err(MotionError::EmptyFrame);
        }

        if !self.background.as_ref().is_some_and(|b| b.fits(&gray)) {
            tracing::debug!(
                width = gray.width(),
                height = gray.height(),
                "initialising background model"
            );
            self.background = Some(Background::new(&gray, &self.config)?);
            return Ok(false);
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(false);
        };

        let largest = background.largest_region(&gray, &self.config)?;
        self.largest_region = largest as f32 / (scale * scale);
        let motion = self.largest_region > self.sensitivity.min_area();

        tracing::trace!(
            region = self.largest_region,
            min_area = self.sensitivity.min_area(),
            motion,
            "motion observed"
        );
        Ok(motion)
    }

    fn analysis_image(&self, frame: &Frame) -> (GrayImage, f32) {
        let gray = frame.to_gray();
        let width = gray.width();
        let target = self.config.analysis_width;
        if width <= target || target == 0 {
            return (gray, 1.0);
        }
        let scale = target as f32 / width as f32;
        let height = ((gray.height() as f32 * scale).round() as u32).max(1);
        (
            imageops::resize(&gray, target, height, FilterType::Triangle),
            scale,
        )
    }
}
