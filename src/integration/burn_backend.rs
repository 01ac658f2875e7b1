//! Burn inference backend for object detection.
//!
//! This module provides a `BurnDetector` that implements `DetectionSource`
//! for running detection models built with the Burn framework.
//!
//! # Example
//!
//! ```ignore
//! use roadeye::integration::{BurnDetector, BurnModel, ClassNames, RawDetection};
//! use burn::backend::NdArray;
//!
//! struct MyYoloModel { /* ... */ }
//!
//! impl BurnModel<NdArray> for MyYoloModel {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 4>) -> Vec<RawDetection> {
//!         // Run inference, boxes in model input pixels
//!     }
//! }
//!
//! let names = ClassNames::new(["car", "accident"]);
//! let detector = BurnDetector::new(MyYoloModel::load("model.bin"), Default::default(), names);
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;
use image::imageops::{self, FilterType};

use super::detector::{ClassNames, DetectionSource, RawDetection, non_max_suppression};
use crate::video::Frame;

#[derive(Debug, thiserror::Error)]
pub enum BurnDetectorError {
    #[error("model expects {expected} input channels, frames have 3")]
    InvalidChannels { expected: u32 },
    #[error("model input size {width}x{height} is empty")]
    EmptyInput { width: u32, height: u32 },
}

/// Trait for Burn-based detection models.
///
/// Implement this trait for your specific model architecture.
pub trait BurnModel<B: Backend>: Send + Sync {
    /// Run a forward pass on a `[batch, channels, height, width]` tensor.
    ///
    /// Returned boxes are corner pairs in the model's input pixel space.
    fn forward(&self, input: Tensor<B, 4>) -> Vec<RawDetection>;

    /// Expected input size (channels, height, width).
    fn input_size(&self) -> (u32, u32, u32) {
        (3, 640, 640)
    }
}

pub struct BurnDetector<B: Backend, M: BurnModel<B>> {
    model: M,
    device: B::Device,
    names: ClassNames,
    iou_threshold: f32,
}

impl<B: Backend, M: BurnModel<B>> BurnDetector<B, M> {
    pub fn new(model: M, device: B::Device, names: ClassNames) -> Self {
        Self {
            model,
            device,
            names,
            iou_threshold: 0.45,
        }
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Stretch the frame to the model size and lay it out as normalized CHW.
    fn preprocess(&self, frame: &Frame) -> Result<Tensor<B, 4>, BurnDetectorError> {
        let (channels, height, width) = self.model.input_size();
        if channels != 3 {
            return Err(BurnDetectorError::InvalidChannels { expected: channels });
        }
        if width == 0 || height == 0 {
            return Err(BurnDetectorError::EmptyInput { width, height });
        }

        let resized = imageops::resize(&frame.image, width, height, FilterType::Triangle);
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, px) in resized.enumerate_pixels() {
            let idx = (y * width + x) as usize;
            for c in 0..3 {
                data[c * plane + idx] = px[c] as f32 / 255.0;
            }
        }

        Ok(Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
            1,
            3,
            height as usize,
            width as usize,
        ]))
    }

    /// Map boxes from model input space back to frame pixels.
    fn postprocess(&self, frame: &Frame, mut rows: Vec<RawDetection>) -> Vec<RawDetection> {
        let (_, in_h, in_w) = self.model.input_size();
        let sx = frame.image.width() as f32 / in_w as f32;
        let sy = frame.image.height() as f32 / in_h as f32;
        for row in &mut rows {
            let [x1, y1, x2, y2] = row.bbox;
            row.bbox = [x1 * sx, y1 * sy, x2 * sx, y2 * sy];
        }
        non_max_suppression(&mut rows, self.iou_threshold);
        rows
    }
}

impl<B: Backend, M: BurnModel<B>> DetectionSource for BurnDetector<B, M> {
    type Error = BurnDetectorError;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Self::Error> {
        let tensor = self.preprocess(frame)?;
        let rows = self.model.forward(tensor);
        Ok(self.postprocess(frame, rows))
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }
}
