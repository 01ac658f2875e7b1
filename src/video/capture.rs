//! Video file input and output through OpenCV's `videoio`.
//!
//! Frames cross the boundary as RGB; OpenCV's BGR layout stays inside
//! this module.

use std::path::{Path, PathBuf};

use image::RgbImage;
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};
use tracing::{debug, info};

use super::{Frame, FrameSink, FrameSource, VideoInfo, checked_fps};
use crate::error::{Error, Result};

/// Four-character code of the output codec (MPEG-4 part 2).
pub const OUTPUT_FOURCC: [char; 4] = ['m', 'p', '4', 'v'];

/// Decodes a video file frame by frame.
pub struct VideoFileReader {
    path: PathBuf,
    cap: VideoCapture,
    info: VideoInfo,
    next: u64,
}

impl VideoFileReader {
    /// Open `path`. `fps` overrides the container's rate.
    pub fn open(path: impl AsRef<Path>, fps: Option<f64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.to_str().ok_or_else(|| Error::input(&path, "path is not valid UTF-8"))?;
        if !path.is_file() {
            return Err(Error::input(&path, "no such file"));
        }

        let cap = VideoCapture::from_file(name, videoio::CAP_ANY).map_err(|e| Error::input(&path, e))?;
        if !cap.is_opened().map_err(|e| Error::input(&path, e))? {
            return Err(Error::input(&path, "unsupported or unreadable video"));
        }

        let prop = |id| cap.get(id).map_err(|e| Error::input(&path, e));
        let width = prop(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = prop(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        let fps = match fps {
            Some(fps) => fps,
            None => prop(videoio::CAP_PROP_FPS)?,
        };
        let frames = prop(videoio::CAP_PROP_FRAME_COUNT)?;
        if width == 0 || height == 0 {
            return Err(Error::input(&path, "video reports no frame size"));
        }

        let info = VideoInfo {
            width,
            height,
            fps: checked_fps(fps, &path),
        };
        info!(path = %path.display(), width, height, fps = info.fps, frames, "opened video");

        Ok(Self {
            path,
            cap,
            info,
            next: 0,
        })
    }
}

impl FrameSource for VideoFileReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut bgr = Mat::default();
        let grabbed = self.cap.read(&mut bgr).map_err(|e| Error::input(&self.path, e))?;
        if !grabbed || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB).map_err(|e| Error::input(&self.path, e))?;

        let (cols, rows) = (rgb.cols() as u32, rgb.rows() as u32);
        if (cols, rows) != (self.info.width, self.info.height) {
            return Err(Error::input(
                &self.path,
                format!(
                    "frame {} is {}x{}, stream is {}x{}",
                    self.next, cols, rows, self.info.width, self.info.height
                ),
            ));
        }

        let data = rgb.data_bytes().map_err(|e| Error::input(&self.path, e))?.to_vec();
        let image = RgbImage::from_raw(cols, rows, data)
            .ok_or_else(|| Error::input(&self.path, format!("frame {} has a short buffer", self.next)))?;

        let index = self.next;
        self.next += 1;
        debug!(index, "decoded frame");
        Ok(Some(Frame { index, image }))
    }
}

/// Encodes frames into an mp4v video at a fixed size and rate.
pub struct VideoFileWriter {
    path: PathBuf,
    writer: VideoWriter,
    info: VideoInfo,
    written: u64,
}

impl VideoFileWriter {
    /// Create the output file. Fails before any frame is processed if the
    /// encoder cannot be opened.
    pub fn create(path: impl AsRef<Path>, info: VideoInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.to_str().ok_or_else(|| Error::output(&path, "path is not valid UTF-8"))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::output(parent, e))?;
        }

        let [a, b, c, d] = OUTPUT_FOURCC;
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(|e| Error::output(&path, e))?;
        let size = Size::new(info.width as i32, info.height as i32);
        let writer = VideoWriter::new(name, fourcc, info.fps, size, true).map_err(|e| Error::output(&path, e))?;
        if !writer.is_opened().map_err(|e| Error::output(&path, e))? {
            return Err(Error::output(&path, "encoder could not be opened"));
        }

        info!(path = %path.display(), width = info.width, height = info.height, fps = info.fps, "opened video writer");
        Ok(Self {
            path,
            writer,
            info,
            written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for VideoFileWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.image.dimensions() != (self.info.width, self.info.height) {
            return Err(Error::output(
                &self.path,
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

        let flat = Mat::from_slice(frame.image.as_raw().as_slice()).map_err(|e| Error::output(&self.path, e))?;
        let rgb = flat
            .reshape(3, self.info.height as i32)
            .map_err(|e| Error::output(&self.path, e))?;
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR).map_err(|e| Error::output(&self.path, e))?;

        self.writer.write(&bgr).map_err(|e| Error::output(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release().map_err(|e| Error::output(&self.path, e))?;
        info!(path = %self.path.display(), frames = self.written, "video written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::tests::scratch_dir;
    use image::Rgb;

    #[test]
    fn written_video_reads_back_with_same_size_and_rate() {
        let path = scratch_dir("mp4").join("out.mp4");
        let info = VideoInfo {
            width: 64,
            height: 48,
            fps: 12.0,
        };
        let mut writer = VideoFileWriter::create(&path, info).unwrap();
        for index in 0..5u64 {
            let image = RgbImage::from_pixel(64, 48, Rgb([200, 30, 30]));
            writer.write_frame(&Frame { index, image }).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 5);

        let mut reader = VideoFileReader::open(&path, None).unwrap();
        let read_info = reader.info();
        assert_eq!((read_info.width, read_info.height), (64, 48));
        assert!((read_info.fps - 12.0).abs() < 0.5, "fps {}", read_info.fps);

        let mut frames = 0;
        while let Some(frame) = reader.next_frame().unwrap() {
            assert_eq!(frame.index, frames);
            // lossy codec, but red must stay dominant
            let px = frame.image.get_pixel(32, 24);
            assert!(px[0] > 150 && px[2] < 90, "{px:?}");
            frames += 1;
        }
        assert_eq!(frames, 5);
    }

    #[test]
    fn fps_override_wins_over_container() {
        let path = scratch_dir("mp4-fps").join("out.mp4");
        let info = VideoInfo {
            width: 32,
            height: 32,
            fps: 25.0,
        };
        let mut writer = VideoFileWriter::create(&path, info).unwrap();
        writer
            .write_frame(&Frame {
                index: 0,
                image: RgbImage::new(32, 32),
            })
            .unwrap();
        writer.finish().unwrap();

        assert_eq!(VideoFileReader::open(&path, Some(10.0)).unwrap().info().fps, 10.0);
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let path = scratch_dir("mp4-missing").join("nothing.mp4");
        assert!(matches!(VideoFileReader::open(&path, None), Err(Error::Input { .. })));
    }

    #[test]
    fn wrong_frame_size_is_rejected_by_the_writer() {
        let path = scratch_dir("mp4-size").join("out.mp4");
        let info = VideoInfo {
            width: 32,
            height: 32,
            fps: 25.0,
        };
        let mut writer = VideoFileWriter::create(&path, info).unwrap();
        let frame = Frame {
            index: 0,
            image: RgbImage::new(16, 32),
        };
        assert!(matches!(writer.write_frame(&frame), Err(Error::OutputWriter { .. })));
    }
}
