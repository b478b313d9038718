use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayViewD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::analytics::object::{Detector, DetectorError, DetectorKind, RawDetection};
use crate::frame::Frame;

const INPUT_SIZE: u32 = 640;
const PAD_VALUE: u8 = 114;
/// COCO index of "person".
const PERSON_CLASS: usize = 0;

/// Letterbox placement of the source frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: f32,
    height: f32,
}

/// End-to-end detection model exported with `logits` and `pred_boxes` outputs.
pub struct OnnxDetector {
    session: Session,
    kind: DetectorKind,
    confidence_threshold: f32,
    /// Only this class is reported; `None` accepts every class (single-class face models).
    class: Option<usize>,
}

impl OnnxDetector {
    pub fn person(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        Self::new(model_path, DetectorKind::Person, confidence_threshold, Some(PERSON_CLASS))
    }

    pub fn face(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        Self::new(model_path, DetectorKind::Face, confidence_threshold, None)
    }

    fn new(
        model_path: &Path,
        kind: DetectorKind,
        confidence_threshold: f32,
        class: Option<usize>,
    ) -> Result<Self, DetectorError> {
        let session = Session::builder()
            .map_err(DetectorError::backend)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(DetectorError::backend)?
            .with_intra_threads(4)
            .map_err(DetectorError::backend)?
            .commit_from_file(model_path)
            .map_err(DetectorError::backend)?;

        tracing::info!(model = %model_path.display(), kind = %kind, "onnx model loaded");

        Ok(Self {
            session,
            kind,
            confidence_threshold,
            class,
        })
    }

    fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let input = INPUT_SIZE as f32;
        let scale = (input / width).min(input / height);
        let new_w = ((width * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height * scale).round() as u32).clamp(1, INPUT_SIZE);
        let pad_x = (INPUT_SIZE - new_w) / 2;
        let pad_y = (INPUT_SIZE - new_h) / 2;

        let resized = imageops::resize(frame.image(), new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = INPUT_SIZE as usize;
        let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });

        (
            tensor,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
                width,
                height,
            },
        )
    }

    fn postprocess(
        logits: &ArrayViewD<f32>,
        boxes: &ArrayViewD<f32>,
        confidence_threshold: f32,
        class: Option<usize>,
        letterbox: Letterbox,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        // logits [1, N, C], boxes [1, N, 4]
        let shape = logits.shape();
        if shape.len() < 2 || boxes.shape().len() < 2 {
            return Ok(Vec::new());
        }
        let (count, classes) = if shape.len() == 3 {
            (shape[1], shape[2])
        } else {
            (shape[0], shape[1])
        };

        let logits = logits
            .as_slice()
            .ok_or_else(|| DetectorError::Backend("logits are not contiguous".into()))?;
        let boxes = boxes
            .as_slice()
            .ok_or_else(|| DetectorError::Backend("boxes are not contiguous".into()))?;
        if logits.len() < count * classes || boxes.len() < count * 4 {
            return Err(DetectorError::Backend("model output shorter than its shape".into()));
        }

        let input = INPUT_SIZE as f32;
        let mut detections = Vec::new();

        for i in 0..count {
            let row = &logits[i * classes..(i + 1) * classes];
            let best = match class {
                Some(c) if c < classes => Some((c, row[c])),
                Some(_) => None,
                None => row
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(&b.1)),
            };
            let Some((_, logit)) = best else {
                continue;
            };

            let score = 1.0 / (1.0 + (-logit).exp());
            if score < confidence_threshold {
                continue;
            }

            // (cx, cy, w, h) normalised to the letterboxed input
            let cx = boxes[i * 4] * input;
            let cy = boxes[i * 4 + 1] * input;
            let w = boxes[i * 4 + 2] * input;
            let h = boxes[i * 4 + 3] * input;

            let x = ((cx - w / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, letterbox.width);
            let y = ((cy - h / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, letterbox.height);
            let width = (w / letterbox.scale).min(letterbox.width - x);
            let height = (h / letterbox.scale).min(letterbox.height - y);

            detections.push(RawDetection {
                x,
                y,
                width,
                height,
                weight: Some(score),
            });
        }

        Ok(detections)
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &'static str {
        match self.kind {
            DetectorKind::Person => "onnx-person",
            DetectorKind::Face => "onnx-face",
        }
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (tensor, letterbox) = Self::preprocess(frame);
        let input = TensorRef::from_array_view(tensor.view())
            .map_err(DetectorError::backend)?
            .into_dyn();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(DetectorError::backend)?;

        let (Some(logits), Some(boxes)) = (outputs.get("logits"), outputs.get("pred_boxes")) else {
            return Err(DetectorError::Backend(
                "expected 'logits' and 'pred_boxes' outputs".into(),
            ));
        };
        let logits = logits
            .try_extract_array::<f32>()
            .map_err(DetectorError::backend)?
            .to_owned();
        let boxes = boxes
            .try_extract_array::<f32>()
            .map_err(DetectorError::backend)?
            .to_owned();
        drop(outputs);

        Self::postprocess(
            &logits.view(),
            &boxes.view(),
            self.confidence_threshold,
            self.class,
            letterbox,
        )
    }
}
