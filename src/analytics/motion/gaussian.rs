use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::MotionConfig;

use super::MotionError;

const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
const SHADOW_TAU: f32 = 0.5;
const FOREGROUND: u8 = 255;

/// Per-pixel running mean and variance of the static scene.
pub(super) struct GaussianBackground {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    frames_seen: u32,
}

impl GaussianBackground {
    pub(super) fn new(gray: &GrayImage, _config: &MotionConfig) -> Result<Self, MotionError> {
        Ok(Self {
            width: gray.width(),
            height: gray.height(),
            mean: gray.as_raw().iter().map(|&v| v as f32).collect(),
            variance: vec![VAR_INIT; gray.as_raw().len()],
            frames_seen: 1,
        })
    }

    pub(super) fn fits(&self, gray: &GrayImage) -> bool {
        self.width == gray.width() && self.height == gray.height()
    }

    /// Pixel count of the largest foreground region after dilation.
    pub(super) fn largest_region(
        &mut self,
        gray: &GrayImage,
        config: &MotionConfig,
    ) -> Result<u32, MotionError> {
        let mut mask = self.foreground(gray, config);
        if config.dilate_iterations > 0 {
            // An L-inf ball of radius k is k passes of a 3x3 square.
            let k = config.dilate_iterations.min(u8::MAX as u32) as u8;
            mask = dilate(&mask, Norm::LInf, k);
        }
        Ok(largest_component(&mask))
    }

    /// Classifies each pixel against the model as it stood before this frame,
    /// then folds the frame into the model.
    fn foreground(&mut self, gray: &GrayImage, config: &MotionConfig) -> GrayImage {
        self.frames_seen = self.frames_seen.saturating_add(1);
        let alpha = 1.0 / self.frames_seen.min(config.history.max(1)) as f32;

        let mut mask = GrayImage::new(self.width, self.height);
        for (i, (&raw, out)) in gray.as_raw().iter().zip(mask.iter_mut()).enumerate() {
            let value = raw as f32;
            let mean = self.mean[i];
            let variance = self.variance[i];
            let diff = value - mean;
            let dist2 = diff * diff;

            let mut foreground = dist2 > config.var_threshold * variance;
            if foreground && config.detect_shadows && mean > 0.0 {
                let ratio = value / mean;
                if (SHADOW_TAU..1.0).contains(&ratio) {
                    foreground = false;
                }
            }
            if foreground {
                *out = FOREGROUND;
            }

            self.mean[i] = mean + alpha * diff;
            self.variance[i] = (variance + alpha * (dist2 - variance)).clamp(VAR_MIN, VAR_MAX);
        }
        mask
    }
}

/// Pixel count of the largest 8-connected foreground region.
fn largest_component(mask: &GrayImage) -> u32 {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut areas: Vec<u32> = Vec::new();
    for label in labels.pixels().map(|p| p.0[0] as usize).filter(|&l| l > 0) {
        if label >= areas.len() {
            areas.resize(label + 1, 0);
        }
        areas[label] += 1;
    }
    areas.into_iter().max().unwrap_or(0)
}
