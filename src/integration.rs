//! Detector backends and the per-frame pipeline built on them.
//!
//! Backends implement [`DetectionSource`]; [`FrameDetector`] normalizes
//! their rows and [`Pipeline`] drives tracking, speed and drawing.

mod builder;
mod detector;
mod pipeline;
mod replay;

pub use builder::DetectionBuilder;
pub use detector::{
    ClassNames, ClassTag, DetectionSource, DetectorConfig, FrameDetector, RawDetection, non_max_suppression,
};
pub use pipeline::{FrameReport, Pipeline, PipelineMode, RunSummary, TrackReport};
pub use replay::ReplayDetector;

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnDetector, BurnDetectorError, BurnModel};

#[cfg(feature = "onnx")]
mod onnx_backend;

#[cfg(feature = "onnx")]
pub use onnx_backend::{DEFAULT_INPUT_SIZE, OnnxDetector, OnnxDetectorError};
