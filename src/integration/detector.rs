//! Detector backends and the adapter that normalizes their output.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detection::{Detection, FALLBACK_LABEL};
use crate::error::{Error, Result};
use crate::tracker::Rect;
use crate::video::Frame;

/// Class as reported by a model, before it is resolved to a label.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClassTag {
    Index(usize),
    Name(String),
    #[default]
    Missing,
}

/// Model-provided lookup from class index to human-readable label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Load a lookup from a JSON array or a file with one name per line.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::model(path, e))?;
        if text.trim_start().starts_with('[') {
            return serde_json::from_str(&text).map_err(|e| Error::model(path, e));
        }
        Ok(Self::new(text.lines().map(str::trim).filter(|l| !l.is_empty())))
    }

    /// Resolve a tag to a label, falling back to [`FALLBACK_LABEL`].
    pub fn resolve(&self, tag: &ClassTag) -> String {
        match tag {
            ClassTag::Index(index) => match self.get(*index) {
                Some(name) => name.to_string(),
                None => {
                    warn!(index, known = self.len(), "class index outside model lookup");
                    FALLBACK_LABEL.to_string()
                }
            },
            ClassTag::Name(name) if !name.trim().is_empty() => name.clone(),
            ClassTag::Name(_) | ClassTag::Missing => FALLBACK_LABEL.to_string(),
        }
    }
}

/// One model output row: `[x1, y1, x2, y2, confidence, class]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Corner pair in absolute pixel coordinates of the frame.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class: ClassTag,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], score: f32, class: ClassTag) -> Self {
        Self { bbox, score, class }
    }

    /// Parse a numeric row. A negative or non-finite class value counts as missing.
    pub fn from_row(row: [f32; 6]) -> Self {
        let [x1, y1, x2, y2, score, class] = row;
        let class = if class.is_finite() && class >= 0.0 {
            ClassTag::Index(class as usize)
        } else {
            ClassTag::Missing
        };
        Self::new([x1, y1, x2, y2], score, class)
    }
}

/// Greedy per-class non-maximum suppression, highest score first.
pub fn non_max_suppression(rows: &mut Vec<RawDetection>, iou_threshold: f32) {
    rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let [x1, y1, x2, y2] = row.bbox;
        let rect = Rect::from_ltrb(x1, y1, x2, y2);
        let suppressed = kept.iter().any(|k| {
            let [kx1, ky1, kx2, ky2] = k.bbox;
            k.class == row.class && Rect::from_ltrb(kx1, ky1, kx2, ky2).iou(&rect) > iou_threshold
        });
        if !suppressed {
            kept.push(row);
        }
    }
    *rows = kept;
}

/// A detection model the pipeline can run on frames.
///
/// Implement this to plug any inference backend into the pipeline. The
/// model is loaded once up front and then called for every frame.
///
/// # Example
///
/// ```ignore
/// use roadeye::integration::{ClassNames, DetectionSource, RawDetection};
/// use roadeye::video::Frame;
///
/// struct MyDetector {
///     names: ClassNames,
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Self::Error> {
///         Ok(vec![])
///     }
///
///     fn class_names(&self) -> &ClassNames {
///         &self.names
///     }
/// }
/// ```
pub trait DetectionSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run inference on one RGB frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Self::Error>;

    fn class_names(&self) -> &ClassNames;
}

impl<D: DetectionSource + ?Sized> DetectionSource for Box<D> {
    type Error = D::Error;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Self::Error> {
        (**self).detect(frame)
    }

    fn class_names(&self) -> &ClassNames {
        (**self).class_names()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Rows below this confidence are dropped.
    pub conf_threshold: f32,
    /// NMS overlap threshold, used by backends that run their own NMS.
    pub iou_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Wraps a [`DetectionSource`] and turns its rows into [`Detection`]s.
///
/// Labels are resolved here, once; boxes are clamped to the frame and
/// empty boxes dropped. Backend failures become [`Error::Detection`].
pub struct FrameDetector<D: DetectionSource> {
    source: D,
    conf_threshold: f32,
}

impl<D: DetectionSource> FrameDetector<D> {
    pub fn new(source: D, config: &DetectorConfig) -> Self {
        Self {
            source,
            conf_threshold: config.conf_threshold,
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let rows = self.source.detect(frame).map_err(|e| Error::Detection {
            frame: frame.index,
            source: Box::new(e),
        })?;

        let (width, height) = frame.image.dimensions();
        let names = self.source.class_names();
        Ok(rows
            .into_iter()
            .filter(|row| row.score.is_finite() && row.score >= self.conf_threshold)
            .filter_map(|row| {
                let [x1, y1, x2, y2] = row.bbox;
                let bbox = Rect::from_ltrb(x1, y1, x2, y2).clamp_to(width, height);
                (!bbox.is_empty()).then(|| Detection::from_rect(bbox, row.score.min(1.0), names.resolve(&row.class)))
            })
            .collect())
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;

    #[derive(Debug, thiserror::Error)]
    #[error("model rejected frame")]
    pub(crate) struct Rejected;

    /// Replays fixed rows per call, or fails on a chosen frame.
    pub(crate) struct ScriptedSource {
        pub names: ClassNames,
        pub frames: Vec<Vec<RawDetection>>,
        pub fail_on: Option<u64>,
    }

    impl DetectionSource for ScriptedSource {
        type Error = Rejected;

        fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Self::Error> {
            if self.fail_on == Some(frame.index) {
                return Err(Rejected);
            }
            Ok(self.frames.get(frame.index as usize).cloned().unwrap_or_default())
        }

        fn class_names(&self) -> &ClassNames {
            &self.names
        }
    }

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            image: RgbImage::new(100, 80),
        }
    }

    #[test]
    fn resolve_handles_every_tag_shape() {
        let names = ClassNames::new(["car", "accident"]);
        assert_eq!(names.resolve(&ClassTag::Index(1)), "accident");
        assert_eq!(names.resolve(&ClassTag::Index(9)), FALLBACK_LABEL);
        assert_eq!(names.resolve(&ClassTag::Name("bus".into())), "bus");
        assert_eq!(names.resolve(&ClassTag::Name("  ".into())), FALLBACK_LABEL);
        assert_eq!(names.resolve(&ClassTag::Missing), FALLBACK_LABEL);
    }

    #[test]
    fn from_row_reads_class_index() {
        let row = RawDetection::from_row([1.0, 2.0, 3.0, 4.0, 0.5, 2.0]);
        assert_eq!(row.class, ClassTag::Index(2));
        assert_eq!(RawDetection::from_row([0.0, 0.0, 1.0, 1.0, 0.5, -1.0]).class, ClassTag::Missing);
    }

    #[test]
    fn nms_keeps_best_box_per_class() {
        let mut rows = vec![
            RawDetection::from_row([0.0, 0.0, 10.0, 10.0, 0.6, 0.0]),
            RawDetection::from_row([1.0, 0.0, 11.0, 10.0, 0.9, 0.0]),
            RawDetection::from_row([1.0, 0.0, 11.0, 10.0, 0.5, 1.0]),
            RawDetection::from_row([50.0, 50.0, 60.0, 60.0, 0.4, 0.0]),
        ];
        non_max_suppression(&mut rows, 0.45);
        let scores: Vec<f32> = rows.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.4]);
    }

    #[test]
    fn class_names_load_from_either_format() {
        let dir = crate::video::tests::scratch_dir("labels");
        let lines = dir.join("labels.txt");
        fs::write(&lines, "car\n\n accident \n").unwrap();
        assert_eq!(ClassNames::from_file(&lines).unwrap(), ClassNames::new(["car", "accident"]));

        let json = dir.join("labels.json");
        fs::write(&json, r#"["bus", "truck"]"#).unwrap();
        assert_eq!(ClassNames::from_file(&json).unwrap().get(1), Some("truck"));
    }

    #[test]
    fn adapter_filters_clamps_and_labels() {
        let source = ScriptedSource {
            names: ClassNames::new(["car"]),
            frames: vec![vec![
                RawDetection::from_row([10.0, 10.0, 50.0, 40.0, 0.9, 0.0]),
                RawDetection::from_row([90.0, 70.0, 150.0, 120.0, 0.8, 3.0]),
                RawDetection::from_row([0.0, 0.0, 10.0, 10.0, 0.1, 0.0]),
                RawDetection::from_row([200.0, 200.0, 250.0, 250.0, 0.9, 0.0]),
            ]],
            fail_on: None,
        };
        let mut detector = FrameDetector::new(source, &DetectorConfig::default());
        let dets = detector.detect(&frame(0)).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].label, "car");
        assert_eq!(dets[0].bbox, Rect::new(10.0, 10.0, 40.0, 30.0));
        assert_eq!(dets[1].label, FALLBACK_LABEL);
        assert_eq!(dets[1].bbox.to_ltrb(), [90.0, 70.0, 100.0, 80.0]);
    }

    #[test]
    fn backend_failure_is_a_detection_error() {
        let source = ScriptedSource {
            names: ClassNames::default(),
            frames: vec![],
            fail_on: Some(3),
        };
        let mut detector = FrameDetector::new(source, &DetectorConfig::default());
        assert!(detector.detect(&frame(2)).unwrap().is_empty());
        match detector.detect(&frame(3)) {
            Err(Error::Detection { frame, .. }) => assert_eq!(frame, 3),
            other => panic!("expected detection error, got {other:?}"),
        }
    }
}
