use image::GrayImage;
use opencv::core::{Mat, Point, Ptr, Size, BORDER_CONSTANT, CV_32S};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::video::{self, BackgroundSubtractorMOG2, BackgroundSubtractorTrait};

use crate::config::MotionConfig;
use crate::frame::gray_mat;

use super::MotionError;

/// MOG2 labels shadows 127 and foreground 255; only the latter passes.
const FOREGROUND_CUT: f64 = 200.0;
const EIGHT_CONNECTED: i32 = 8;

pub(super) struct Mog2Background {
    mog2: Ptr<BackgroundSubtractorMOG2>,
    width: u32,
    height: u32,
    history: u32,
    frames_seen: u32,
    kernel: Mat,
    fg_mask: Mat,
    binary: Mat,
    dilated: Mat,
    labels: Mat,
    stats: Mat,
    centroids: Mat,
}

impl Mog2Background {
    /// Builds the subtractor and seeds it with `gray`.
    pub(super) fn new(gray: &GrayImage, config: &MotionConfig) -> Result<Self, MotionError> {
        let mog2 = video::create_background_subtractor_mog2(
            config.history as i32,
            config.var_threshold as f64,
            config.detect_shadows,
        )?;
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(3, 3),
            Point::new(-1, -1),
        )?;

        let mut background = Self {
            mog2,
            width: gray.width(),
            height: gray.height(),
            history: config.history.max(1),
            frames_seen: 0,
            kernel,
            fg_mask: Mat::default(),
            binary: Mat::default(),
            dilated: Mat::default(),
            labels: Mat::default(),
            stats: Mat::default(),
            centroids: Mat::default(),
        };
        background.subtract(gray)?;
        Ok(background)
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
        self.subtract(gray)?;

        imgproc::threshold(
            &self.fg_mask,
            &mut self.binary,
            FOREGROUND_CUT,
            255.0,
            imgproc::THRESH_BINARY,
        )?;
        imgproc::dilate(
            &self.binary,
            &mut self.dilated,
            &self.kernel,
            Point::new(-1, -1),
            config.dilate_iterations as i32,
            BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        let count = imgproc::connected_components_with_stats(
            &self.dilated,
            &mut self.labels,
            &mut self.stats,
            &mut self.centroids,
            EIGHT_CONNECTED,
            CV_32S,
        )?;

        // Label 0 is the background.
        let mut largest = 0;
        for label in 1..count {
            let area = *self.stats.at_2d::<i32>(label, imgproc::CC_STAT_AREA)?;
            largest = largest.max(area);
        }
        Ok(largest.max(0) as u32)
    }

    /// Learning rate is `1 / min(frames_seen, history)`, so the first frame
    /// replaces the model outright.
    fn subtract(&mut self, gray: &GrayImage) -> Result<(), MotionError> {
        self.frames_seen = self.frames_seen.saturating_add(1);
        let rate = 1.0 / self.frames_seen.min(self.history) as f64;
        let frame = gray_mat(gray)?;
        BackgroundSubtractorTrait::apply(&mut self.mog2, &frame, &mut self.fg_mask, rate)?;
        Ok(())
    }
}
