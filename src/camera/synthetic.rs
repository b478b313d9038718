use image::{Rgb, RgbImage};

use crate::frame::Frame;

use super::{FrameSource, SourceError};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const BACKGROUND: u8 = 32;
const BLOCK: u8 = 220;
const BLOCK_SIZE: u32 = 96;
const STEP: i64 = 12;

/// Stand-in camera: a bright square bouncing across a dark frame.
///
/// Always opens, never fails a read, and never ends.
pub struct SyntheticSource {
    x: i64,
    dx: i64,
    frames: u64,
    closed: bool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            x: 0,
            dx: STEP,
            frames: 0,
            closed: false,
        }
    }

    fn advance(&mut self) {
        let max_x = (WIDTH - BLOCK_SIZE) as i64;
        let next = self.x + self.dx;
        if !(0..=max_x).contains(&next) {
            self.dx = -self.dx;
        }
        self.x = (self.x + self.dx).clamp(0, max_x);
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Frame, SourceError> {
        if self.closed {
            return Err(SourceError::EndOfStream);
        }

        // Faint texture keeps the background model's variance honest.
        let seed = self.frames;
        let mut image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let noise = ((x as u64 * 7 + y as u64 * 13 + seed) % 3) as u8;
            Rgb([BACKGROUND + noise; 3])
        });

        let x0 = self.x as u32;
        let y0 = (HEIGHT - BLOCK_SIZE) / 2;
        for y in y0..y0 + BLOCK_SIZE {
            for x in x0..x0 + BLOCK_SIZE {
                image.put_pixel(x, y, Rgb([BLOCK; 3]));
            }
        }

        self.frames += 1;
        self.advance();
        Ok(Frame::new(image))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_left_edge(frame: &Frame) -> u32 {
        let y = HEIGHT / 2;
        (0..WIDTH)
            .find(|&x| frame.image().get_pixel(x, y).0[0] == BLOCK)
            .unwrap()
    }

    #[test]
    fn block_moves_and_bounces() {
        let mut source = SyntheticSource::new();
        let first = source.read().unwrap();
        let second = source.read().unwrap();
        assert_eq!(first.width(), WIDTH);
        assert_eq!(block_left_edge(&first), 0);
        assert_eq!(block_left_edge(&second), STEP as u32);

        let mut last = 0;
        for _ in 0..200 {
            last = block_left_edge(&source.read().unwrap());
            assert!(last + BLOCK_SIZE <= WIDTH);
        }
        assert!(last > 0);
    }

    #[test]
    fn closed_source_ends() {
        let mut source = SyntheticSource::new();
        source.close();
        assert!(matches!(source.read(), Err(SourceError::EndOfStream)));
    }
}
