//! Per-frame detection record.

use serde::Serialize;

use crate::tracker::Rect;

/// Label used when the model gives no usable class for a box.
pub const FALLBACK_LABEL: &str = "object";

/// One object reported by the detector in a single frame.
///
/// Produced by the detector adapter and consumed within the same frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Box in LTWH pixel coordinates.
    pub bbox: Rect,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub label: String,
}

impl Detection {
    /// Build from a corner pair (x1, y1, x2, y2).
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, label: impl Into<String>) -> Self {
        Self {
            bbox: Rect::from_ltrb(x1, y1, x2, y2),
            score,
            label: label.into(),
        }
    }

    pub fn from_rect(bbox: Rect, score: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            score,
            label: label.into(),
        }
    }
}
