//! Single object track (STrack) and its lifecycle state.

use serde::Serialize;

use crate::detection::Detection;
use crate::tracker::kalman_filter::{KalmanFilter, Measurement, StateCovariance, StateVector};
use crate::tracker::rect::Rect;

/// Stable identity of a track for its lifetime within one tracker.
pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TrackState {
    /// Created from a detection, not yet started
    #[default]
    New,
    /// Matched in the latest frame
    Tracked,
    /// Unmatched, still inside the aging window
    Lost,
    /// Aged out or rejected; never returned again
    Removed,
}

#[derive(Debug, Clone)]
pub struct STrack {
    /// 0 until the track is activated
    pub track_id: TrackId,
    pub state: TrackState,
    /// Confirmed: enough consecutive evidence to be reported
    pub is_activated: bool,
    /// Score of the last matched detection
    pub score: f32,
    /// Class label of the detection that started the track
    pub label: String,
    /// Last frame the track was matched in
    pub frame_id: u32,
    pub start_frame: u32,
    /// Consecutive matched frames
    pub tracklet_len: u32,
    kalman: Option<(StateVector, StateCovariance)>,
    /// Box of the originating detection
    det_box: Rect,
}

fn measurement(rect: &Rect) -> Measurement {
    let [cx, cy, a, h] = rect.to_xyah();
    Measurement::new(cx as f64, cy as f64, a as f64, h as f64)
}

impl STrack {
    pub fn new(bbox: Rect, score: f32, label: impl Into<String>) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            score,
            label: label.into(),
            frame_id: 0,
            start_frame: 0,
            tracklet_len: 0,
            kalman: None,
            det_box: bbox,
        }
    }

    pub fn from_detection(det: Detection) -> Self {
        Self::new(det.bbox, det.score, det.label)
    }

    /// Current box: the filter estimate once started, the detection box before.
    pub fn rect(&self) -> Rect {
        match &self.kalman {
            Some((mean, _)) => Rect::from_xyah(
                mean[0] as f32,
                mean[1] as f32,
                mean[2] as f32,
                mean[3] as f32,
            ),
            None => self.det_box,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.is_activated
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    /// Start the track with a fresh id.
    ///
    /// Tracks born in the first frame are confirmed at once; later ones wait
    /// for a second match.
    pub fn activate(&mut self, kalman_filter: &KalmanFilter, frame_id: u32, track_id: TrackId) {
        self.track_id = track_id;
        self.kalman = Some(kalman_filter.initiate(measurement(&self.det_box)));
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = frame_id == 1;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    /// Bring a lost track back with a new observation, keeping its id.
    pub fn re_activate(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(new_track, kalman_filter);
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.frame_id = frame_id;
        self.score = new_track.score;
    }

    pub fn update(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(new_track, kalman_filter);
        self.frame_id = frame_id;
        self.tracklet_len += 1;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.score = new_track.score;
    }

    fn correct(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter) {
        if let Some((mean, cov)) = &self.kalman {
            self.kalman = Some(kalman_filter.update(mean, cov, measurement(&new_track.det_box)));
        }
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let Some((mean, cov)) = &self.kalman {
            let mut mean = *mean;
            if self.state != TrackState::Tracked {
                // a lost box keeps its size
                mean[7] = 0.0;
            }
            self.kalman = Some(kalman_filter.predict(&mean, cov));
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn multi_predict(stracks: &mut [STrack], kalman_filter: &KalmanFilter) {
        for strack in stracks.iter_mut() {
            strack.predict(kalman_filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_tracks_are_confirmed_immediately() {
        let kf = KalmanFilter::new();
        let mut t = STrack::new(Rect::new(0.0, 0.0, 10.0, 20.0), 0.9, "car");
        t.activate(&kf, 1, 7);
        assert!(t.is_confirmed());
        assert_eq!(t.track_id, 7);
        assert_eq!(t.state, TrackState::Tracked);
    }

    #[test]
    fn later_tracks_confirm_on_second_match() {
        let kf = KalmanFilter::new();
        let mut t = STrack::new(Rect::new(0.0, 0.0, 10.0, 20.0), 0.9, "car");
        t.activate(&kf, 5, 1);
        assert!(!t.is_confirmed());

        let obs = STrack::new(Rect::new(1.0, 0.0, 10.0, 20.0), 0.8, "truck");
        t.update(&obs, &kf, 6);
        assert!(t.is_confirmed());
        assert_eq!(t.label, "car");
        assert_eq!(t.score, 0.8);
    }
}
