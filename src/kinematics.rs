//! Per-track speed estimation from consecutive centroid positions.
//!
//! Distances are converted with a fixed, uncalibrated meters-per-pixel
//! factor. The conversion is applied in a fixed order:
//!
//! ```text
//! meters = euclidean_px * meters_per_pixel
//! speed  = meters / dt_seconds * 3.6      (km/h)
//! ```
//!
//! Observations are stamped with the frame index and its time in seconds,
//! see [`FrameClock`]. Speed uses the seconds; expiry counts whole frames.

use std::collections::HashMap;

use nalgebra::{Point2, distance};
use serde::{Deserialize, Serialize};

use crate::tracker::TrackId;
use crate::video::DEFAULT_FPS;

/// m/s to km/h.
pub const MPS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Real-world meters covered by one pixel of displacement.
    pub meters_per_pixel: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            meters_per_pixel: 0.05,
        }
    }
}

/// When an observation was made: stream position and time in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub frame: u64,
    pub seconds: f64,
}

impl Timestamp {
    pub fn new(frame: u64, seconds: f64) -> Self {
        Self { frame, seconds }
    }
}

/// Maps frame indices onto a seconds time base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: f64,
}

impl FrameClock {
    /// A non-positive or non-finite rate falls back to [`DEFAULT_FPS`].
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { DEFAULT_FPS };
        Self { fps }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn timestamp(&self, frame_index: u64) -> Timestamp {
        Timestamp::new(frame_index, frame_index as f64 / self.fps)
    }
}

/// Last observation of one track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastKnownState {
    pub centroid: Point2<f64>,
    pub timestamp: Timestamp,
    /// Estimate returned by the last observation that advanced the clock.
    pub speed_kmh: f64,
}

/// Track id to last-known-state store.
///
/// Scoped to one run: build one per video and drop it afterwards.
#[derive(Debug, Clone)]
pub struct KinematicsEstimator {
    meters_per_pixel: f64,
    states: HashMap<TrackId, LastKnownState>,
}

impl KinematicsEstimator {
    pub fn new(config: &SpeedConfig) -> Self {
        Self {
            meters_per_pixel: config.meters_per_pixel,
            states: HashMap::new(),
        }
    }

    /// Record an observation of `track_id` and return its speed in km/h.
    ///
    /// The first observation of an id returns 0. An observation whose
    /// time does not advance past the stored one changes nothing and
    /// returns the previous estimate.
    pub fn observe(&mut self, track_id: TrackId, centroid: Point2<f64>, timestamp: Timestamp) -> f64 {
        let Some(last) = self.states.get_mut(&track_id) else {
            self.states.insert(
                track_id,
                LastKnownState {
                    centroid,
                    timestamp,
                    speed_kmh: 0.0,
                },
            );
            return 0.0;
        };

        let dt = timestamp.seconds - last.timestamp.seconds;
        if !(dt > 0.0) {
            return last.speed_kmh;
        }

        let meters = distance(&last.centroid, &centroid) * self.meters_per_pixel;
        let speed_kmh = meters / dt * MPS_TO_KMH;

        *last = LastKnownState {
            centroid,
            timestamp,
            speed_kmh,
        };
        speed_kmh
    }

    pub fn get(&self, track_id: TrackId) -> Option<&LastKnownState> {
        self.states.get(&track_id)
    }

    /// Drop tracks last observed more than `max_frames` frames before `now`.
    ///
    /// Returns how many entries were removed.
    pub fn evict_stale(&mut self, now: u64, max_frames: u32) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, s| now.saturating_sub(s.timestamp.frame) <= u64::from(max_frames));
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
