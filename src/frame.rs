use std::borrow::Cow;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageResult, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::analytics::DetectionBox;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// One decoded RGB8 image sample. Stages borrow it; nothing mutates it in place.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    /// Wraps a packed RGB24 buffer; `None` when the length does not match.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Shrinks the frame to at most `max_width` columns, keeping aspect ratio.
    /// Returns the working frame and the scale factor (`working / full`, never above 1).
    pub fn downscaled(&self, max_width: u32) -> (Cow<'_, Frame>, f32) {
        let width = self.width();
        if width <= max_width || max_width == 0 {
            return (Cow::Borrowed(self), 1.0);
        }
        let scale = max_width as f32 / width as f32;
        let height = ((self.height() as f32 * scale).round() as u32).max(1);
        let image = imageops::resize(&self.image, max_width, height, FilterType::Triangle);
        let frame = Frame {
            image,
            captured_at: self.captured_at,
        };
        (Cow::Owned(frame), scale)
    }

    pub fn encode_jpeg(&self, quality: u8) -> ImageResult<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&self.image)?;
        Ok(buf)
    }

    /// Copy of the frame with every box outlined.
    pub fn annotated(&self, boxes: &[DetectionBox]) -> Frame {
        let mut image = self.image.clone();
        for b in boxes {
            let rect = Rect::at(b.x, b.y).of_size(b.width.max(1) as u32, b.height.max(1) as u32);
            draw_hollow_rect_mut(&mut image, rect, BOX_COLOR);
        }
        Frame {
            image,
            captured_at: self.captured_at,
        }
    }
}

/// Packs a luma plane into a single-channel `Mat` that owns its pixels.
#[cfg(feature = "opencv")]
pub fn gray_mat(gray: &GrayImage) -> opencv::Result<opencv::core::Mat> {
    use opencv::core::Mat;
    use opencv::prelude::*;

    let mat = Mat::from_slice(gray.as_raw())?;
    let mat = mat.reshape(1, gray.height() as i32)?;
    mat.try_clone()
}
