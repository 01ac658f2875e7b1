//! Frame input and output.
//!
//! The pipeline only sees [`FrameSource`] and [`FrameSink`]. Two backends
//! ship with the crate:
//!
//! - image sequences: a directory of frames sorted by file name, plus a
//!   `video.json` sidecar holding the frame rate;
//! - video files (feature `video`): decoded and encoded with OpenCV,
//!   written as mp4v.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[cfg(feature = "video")]
mod capture;

#[cfg(feature = "video")]
pub use capture::{OUTPUT_FOURCC, VideoFileReader, VideoFileWriter};

/// Sidecar file describing an image sequence.
pub const SEQUENCE_META_FILE: &str = "video.json";

/// Frame rate used when a stream reports none, or a meaningless one.
pub const DEFAULT_FPS: f64 = 30.0;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "m4v", "avi", "mov", "mkv"];

/// Whether `path` names a video container by its extension.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Stream properties carried from input to output unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One decoded frame in RGB channel order.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Zero-based position in the stream.
    pub index: u64,
    pub image: RgbImage,
}

pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush anything buffered. Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads a directory of still frames in file-name order.
pub struct ImageSequenceReader {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    info: VideoInfo,
}

impl ImageSequenceReader {
    /// Open `dir`. `fps` overrides the rate stored in the sidecar; without
    /// either the rate defaults to 30.
    ///
    /// Fails before any frame is processed if the directory is unreadable,
    /// holds no frames, or its first frame cannot be decoded.
    pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir).map_err(|e| Error::input(&dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::input(&dir, e))?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_frame {
                files.push(path);
            }
        }
        files.sort();

        let Some(first) = files.first() else {
            return Err(Error::input(&dir, "no frames found"));
        };
        let (width, height) = image::image_dimensions(first).map_err(|e| Error::input(first, e))?;

        let fps = match fps {
            Some(fps) => fps,
            None => read_sidecar(&dir)?.map_or(DEFAULT_FPS, |meta| meta.fps),
        };
        let fps = checked_fps(fps, &dir);

        let info = VideoInfo { width, height, fps };
        info!(dir = %dir.display(), frames = files.len(), width, height, fps, "opened image sequence");

        Ok(Self {
            dir,
            files,
            next: 0,
            info,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// `fps` if it is a usable rate, otherwise [`DEFAULT_FPS`].
pub(crate) fn checked_fps(fps: f64, origin: &Path) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        warn!(fps, origin = %origin.display(), fallback = DEFAULT_FPS, "unusable frame rate");
        DEFAULT_FPS
    }
}

fn read_sidecar(dir: &Path) -> Result<Option<VideoInfo>> {
    let path = dir.join(SEQUENCE_META_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(&path).map_err(|e| Error::input(&path, e))?;
    let meta = serde_json::from_str(&json).map_err(|e| Error::input(&path, e))?;
    Ok(Some(meta))
}

impl FrameSource for ImageSequenceReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };

        let image = image::open(path).map_err(|e| Error::input(path, e))?.into_rgb8();
        if image.dimensions() != (self.info.width, self.info.height) {
            return Err(Error::input(
                path,
                format!(
                    "frame is {}x{}, stream is {}x{}",
                    image.width(),
                    image.height(),
                    self.info.width,
                    self.info.height
                ),
            ));
        }

        let index = self.next as u64;
        self.next += 1;
        debug!(index, dir = %self.dir.display(), "decoded frame");
        Ok(Some(Frame { index, image }))
    }
}

/// Writes frames as `frame_NNNNNN.png` next to a `video.json` sidecar.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    info: VideoInfo,
    written: u64,
}

impl ImageSequenceWriter {
    /// Create the output directory and sidecar.
    pub fn create(dir: impl AsRef<Path>, info: VideoInfo) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::output(&dir, e))?;

        let meta = serde_json::to_string_pretty(&info)?;
        let meta_path = dir.join(SEQUENCE_META_FILE);
        fs::write(&meta_path, meta).map_err(|e| Error::output(&meta_path, e))?;

        Ok(Self {
            dir,
            info,
            written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.image.dimensions() != (self.info.width, self.info.height) {
            return Err(Error::output(
                &self.dir,
                format!(
                    "frame {} is {}x{}, writer expects {}x{}",
                    frame.index,
                    frame.image.width(),
                    frame.image.height(),
                    self.info.width,
                    self.info.height
                ),
            ));
        }

        let path = self.frame_path(frame.index);
        frame.image.save(&path).map_err(|e| Error::output(&path, e))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!(dir = %self.dir.display(), frames = self.written, "image sequence written");
        Ok(())
    }
}
