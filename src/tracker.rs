//! ByteTrack association engine.
//!
//! Stateful across frames: call [`BYTETracker::update`] exactly once per
//! frame, in frame order.

mod byte_tracker;
mod kalman_filter;
mod matching;
mod rect;
mod strack;

pub use byte_tracker::{BYTETracker, TrackerConfig};
pub use rect::{Rect, iou_batch};
pub use strack::{STrack, TrackId, TrackState};
