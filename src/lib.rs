//! Traffic video annotation.
//!
//! Runs a detection model over every frame of a video, then either draws
//! the detections directly or associates them into tracks with ByteTrack
//! and labels each track with an estimated ground speed.
//!
//! ```ignore
//! use roadeye::annotate::Annotator;
//! use roadeye::integration::{Pipeline, PipelineMode, ReplayDetector};
//! use roadeye::video::{FrameSource, ImageSequenceReader, ImageSequenceWriter};
//! use roadeye::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let mut input = ImageSequenceReader::open("frames/", None)?;
//! let mut output = ImageSequenceWriter::create("annotated/", input.info())?;
//! let detector = ReplayDetector::open("detections.jsonl")?;
//! let annotator = Annotator::new(config.annotation.clone())?;
//!
//! let fps = input.info().fps;
//! let mut pipeline = Pipeline::new(detector, PipelineMode::Speed, &config, annotator, fps);
//! let summary = pipeline.run(&mut input, &mut output, None)?;
//! ```

pub mod annotate;
pub mod config;
pub mod detection;
pub mod error;
pub mod integration;
pub mod kinematics;
pub mod tracker;
pub mod video;

pub use config::PipelineConfig;
pub use detection::Detection;
pub use error::{Error, Result};
pub use tracker::{BYTETracker, STrack, TrackerConfig};
