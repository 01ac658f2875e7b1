//! Detector backend that replays a recorded detection dump.
//!
//! The dump is JSON lines. An optional line `{"names": ["car", ...]}`
//! carries the class lookup; every other line holds one frame:
//!
//! ```text
//! {"frame": 0, "rows": [[x1, y1, x2, y2, confidence, class_index], ...]}
//! ```
//!
//! Rows with five values have no class. Frames absent from the dump have
//! no detections.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::detector::{ClassNames, ClassTag, DetectionSource, RawDetection};
use crate::error::{Error, Result};
use crate::video::Frame;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpLine {
    Names { names: ClassNames },
    Frame { frame: u64, rows: Vec<Vec<f32>> },
}

pub struct ReplayDetector {
    names: ClassNames,
    frames: HashMap<u64, Vec<RawDetection>>,
}

impl ReplayDetector {
    /// Load the whole dump.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::model(path, e))?;
        let detector = Self::parse(&text).map_err(|reason| Error::model(path, reason))?;
        info!(
            path = %path.display(),
            frames = detector.frames.len(),
            classes = detector.names.len(),
            "loaded detection dump"
        );
        Ok(detector)
    }

    /// Parse dump text; the error names the offending line.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut names = ClassNames::default();
        let mut frames: HashMap<u64, Vec<RawDetection>> = HashMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: DumpLine =
                serde_json::from_str(line).map_err(|e| format!("line {}: {e}", lineno + 1))?;
            match parsed {
                DumpLine::Names { names: n } => names = n,
                DumpLine::Frame { frame, rows } => {
                    let entry = frames.entry(frame).or_default();
                    for row in rows {
                        entry.push(parse_row(&row).ok_or_else(|| {
                            format!("line {}: row needs 5 or 6 values, got {}", lineno + 1, row.len())
                        })?);
                    }
                }
            }
        }

        Ok(Self { names, frames })
    }

    /// Replace the class lookup, e.g. from a separate labels file.
    pub fn with_names(mut self, names: ClassNames) -> Self {
        self.names = names;
        self
    }
}

fn parse_row(row: &[f32]) -> Option<RawDetection> {
    match *row {
        [x1, y1, x2, y2, score, class] => Some(RawDetection::from_row([x1, y1, x2, y2, score, class])),
        [x1, y1, x2, y2, score] => Some(RawDetection::new([x1, y1, x2, y2], score, ClassTag::Missing)),
        _ => None,
    }
}

impl DetectionSource for ReplayDetector {
    type Error = Infallible;

    fn detect(&mut self, frame: &Frame) -> std::result::Result<Vec<RawDetection>, Self::Error> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const DUMP: &str = r#"
{"names": ["car", "accident"]}
{"frame": 0, "rows": [[10, 10, 50, 40, 0.9, 0], [60, 10, 90, 40, 0.7, 1]]}
{"frame": 2, "rows": [[12, 10, 52, 40, 0.88]]}
"#;

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            image: RgbImage::new(8, 8),
        }
    }

    #[test]
    fn replays_rows_by_frame_index() {
        let mut det = ReplayDetector::parse(DUMP).unwrap();
        assert_eq!(det.class_names().get(1), Some("accident"));

        let rows = det.detect(&frame(0)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].class, ClassTag::Index(1));

        assert!(det.detect(&frame(1)).unwrap().is_empty());
        assert_eq!(det.detect(&frame(2)).unwrap()[0].class, ClassTag::Missing);
    }

    #[test]
    fn malformed_row_names_the_line() {
        let err = ReplayDetector::parse("{\"frame\": 0, \"rows\": [[1, 2, 3]]}")
            .err()
            .unwrap();
        assert!(err.starts_with("line 1:"), "{err}");
    }

    #[test]
    fn unreadable_dump_is_a_model_error() {
        assert!(matches!(
            ReplayDetector::open("/no/such/dump.jsonl"),
            Err(Error::Model { .. })
        ));
    }
}
