//! ONNX Runtime backend for YOLOv8-style detection exports.
//!
//! Expects one `images` input of shape `[1, 3, S, S]` and an output of
//! shape `[1, 4 + classes, anchors]` holding center boxes followed by
//! per-class scores.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use tracing::{debug, info};

use super::builder::DetectionBuilder;
use super::detector::{ClassNames, DetectionSource, DetectorConfig, RawDetection, non_max_suppression};
use crate::error::{Error, Result};
use crate::video::Frame;

/// Square input side of the default YOLOv8 export.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// Letterbox fill, the value Ultralytics pads with.
const PAD_VALUE: u8 = 114;

#[derive(Debug, thiserror::Error)]
pub enum OnnxDetectorError {
    #[error(transparent)]
    Runtime(#[from] ort::Error),
    #[error("unexpected output shape {0:?}")]
    OutputShape(Vec<i64>),
}

pub struct OnnxDetector {
    session: Session,
    names: ClassNames,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
}

fn load_session(path: &Path) -> ort::Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)?)
}

/// Letterboxed input plus the transform needed to map boxes back.
struct Letterbox {
    tensor: Vec<f32>,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl OnnxDetector {
    /// Load the model once; it is reused for every frame.
    pub fn open(model_path: impl AsRef<Path>, names: ClassNames, config: &DetectorConfig) -> Result<Self> {
        let path = model_path.as_ref();
        let session = load_session(path).map_err(|e| Error::model(path, e))?;

        info!(path = %path.display(), classes = names.len(), "onnx model loaded");
        Ok(Self {
            session,
            names,
            input_size: DEFAULT_INPUT_SIZE,
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    fn letterbox(&self, image: &RgbImage) -> Letterbox {
        let target = self.input_size;
        let (src_w, src_h) = image.dimensions();
        let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale).round() as u32).clamp(1, target);
        let scaled_h = ((src_h as f32 * scale).round() as u32).clamp(1, target);
        let pad_x = (target - scaled_w) / 2;
        let pad_y = (target - scaled_h) / 2;

        let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(target, target, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let plane = (target * target) as usize;
        let mut tensor = vec![0.0f32; 3 * plane];
        for (x, y, px) in canvas.enumerate_pixels() {
            let idx = (y * target + x) as usize;
            for c in 0..3 {
                tensor[c * plane + idx] = px[c] as f32 / 255.0;
            }
        }

        Letterbox {
            tensor,
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        }
    }

    fn decode(&self, output: &[f32], num_classes: usize, anchors: usize, lb: &Letterbox) -> Vec<RawDetection> {
        let mut rows = Vec::new();
        for i in 0..anchors {
            let (best_class, best_score) = (0..num_classes)
                .map(|c| (c, output[(4 + c) * anchors + i]))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if best_score < self.conf_threshold {
                continue;
            }

            rows.push(
                DetectionBuilder::new()
                    .xywh(output[i], output[anchors + i], output[2 * anchors + i], output[3 * anchors + i])
                    .unletterbox(lb.scale, lb.pad_x, lb.pad_y)
                    .score(best_score)
                    .class_index(best_class)
                    .build(),
            );
        }
        non_max_suppression(&mut rows, self.iou_threshold);
        rows
    }
}

impl DetectionSource for OnnxDetector {
    type Error = OnnxDetectorError;

    fn detect(&mut self, frame: &Frame) -> std::result::Result<Vec<RawDetection>, Self::Error> {
        let mut lb = self.letterbox(&frame.image);
        let size = self.input_size as usize;
        let shape = [1, 3, size, size];
        let tensor = std::mem::take(&mut lb.tensor).into_boxed_slice();
        let input = ort::value::Value::from_array((shape.as_slice(), tensor))?;

        let (dims, data) = {
            let outputs = self.session.run(ort::inputs!["images" => input])?;
            let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            (out_shape.iter().copied().collect::<Vec<i64>>(), data.to_vec())
        };

        let [1, channels, anchors] = dims[..] else {
            return Err(OnnxDetectorError::OutputShape(dims));
        };
        if channels <= 4 {
            return Err(OnnxDetectorError::OutputShape(dims));
        }

        let rows = self.decode(&data, channels as usize - 4, anchors as usize, &lb);
        debug!(frame = frame.index, rows = rows.len(), "onnx inference");
        Ok(rows)
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }
}
