//! Main BYTETracker algorithm implementation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::detection::Detection;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::strack::{STrack, TrackId, TrackState};

/// Detections at or below this score are ignored entirely.
const LOW_SCORE_FLOOR: f32 = 0.1;
/// Cost threshold for the low-score second association.
const SECOND_MATCH_THRESH: f32 = 0.5;
/// Cost threshold for matching unconfirmed tracks.
const UNCONFIRMED_MATCH_THRESH: f32 = 0.7;
/// Extra score over `track_thresh` a detection needs to start a track.
const NEW_TRACK_MARGIN: f32 = 0.1;
/// IoU above which a tracked and a lost track are considered the same object.
const DUPLICATE_IOU: f32 = 0.85;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this score take part in the first association.
    pub track_thresh: f32,
    /// Maximum fused cost for a first-association match.
    pub match_thresh: f32,
    /// Frames (at 30 fps) a lost track is kept before it is dropped.
    pub max_age: u32,
    pub frame_rate: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.5,
            match_thresh: 0.8,
            max_age: 30,
            frame_rate: 30.0,
        }
    }
}

pub struct BYTETracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    frame_id: u32,
    config: TrackerConfig,
    max_time_lost: u32,
    kalman_filter: KalmanFilter,
    next_id: TrackId,
}

impl BYTETracker {
    pub fn new(config: TrackerConfig) -> Self {
        let max_time_lost = (config.frame_rate / 30.0 * config.max_age as f32) as u32;
        Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            frame_id: 0,
            config,
            max_time_lost,
            kalman_filter: KalmanFilter::default(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of frames processed so far.
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Frames an unmatched track survives before removal.
    pub fn max_time_lost(&self) -> u32 {
        self.max_time_lost
    }

    fn next_track_id(&mut self) -> TrackId {
        self.next_id += 1;
        self.next_id
    }

    /// Associate one frame of detections and return the tracked tracks.
    ///
    /// Unconfirmed tracks are included; check [`STrack::is_confirmed`]
    /// before rendering or measuring them.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<STrack> {
        self.frame_id += 1;

        let mut activated_stracks = Vec::new();
        let mut refind_stracks = Vec::new();
        let mut lost_stracks = Vec::new();

        let (detections_high, detections_low): (Vec<_>, Vec<_>) = detections
            .into_iter()
            .filter(|d| d.score > LOW_SCORE_FLOOR)
            .partition(|d| d.score >= self.config.track_thresh);

        let detections: Vec<STrack> = detections_high.into_iter().map(STrack::from_detection).collect();

        let (tracked_stracks, mut unconfirmed): (Vec<_>, Vec<_>) = self
            .tracked_stracks
            .drain(..)
            .partition(|t| t.is_activated);

        let mut strack_pool = joint_stracks(tracked_stracks, &self.lost_stracks);

        // First association, high score detections
        STrack::multi_predict(&mut strack_pool, &self.kalman_filter);

        let mut dists = matching::iou_distance(&rects(&strack_pool), &rects(&detections));
        matching::fuse_score(&mut dists, &scores(&detections));

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::linear_assignment(&dists, self.config.match_thresh);

        for (itracked, idet) in matches {
            let mut track = strack_pool[itracked].clone();
            let det = &detections[idet];
            if track.state == TrackState::Tracked {
                track.update(det, &self.kalman_filter, self.frame_id);
                activated_stracks.push(track);
            } else {
                track.re_activate(det, &self.kalman_filter, self.frame_id);
                refind_stracks.push(track);
            }
        }

        // Second association, low score detections against still-tracked leftovers
        let detections_second: Vec<STrack> = detections_low.into_iter().map(STrack::from_detection).collect();

        let r_tracked_stracks: Vec<STrack> = unmatched_tracks
            .iter()
            .map(|&idx| &strack_pool[idx])
            .filter(|t| t.state == TrackState::Tracked)
            .cloned()
            .collect();

        let dists_second = matching::iou_distance(&rects(&r_tracked_stracks), &rects(&detections_second));

        let AssignmentResult {
            matches: matches_second,
            unmatched_tracks: unmatched_tracks_second,
            ..
        } = matching::linear_assignment(&dists_second, SECOND_MATCH_THRESH);

        for (itracked, idet) in matches_second {
            let mut track = r_tracked_stracks[itracked].clone();
            let det = &detections_second[idet];
            if track.state == TrackState::Tracked {
                track.update(det, &self.kalman_filter, self.frame_id);
                activated_stracks.push(track);
            } else {
                track.re_activate(det, &self.kalman_filter, self.frame_id);
                refind_stracks.push(track);
            }
        }

        for idx in unmatched_tracks_second {
            let mut track = r_tracked_stracks[idx].clone();
            if track.state != TrackState::Lost {
                track.mark_lost();
                lost_stracks.push(track);
            }
        }

        // Unconfirmed tracks, usually tracks with only their starting frame
        let detections_rem: Vec<STrack> = unmatched_detections
            .into_iter()
            .map(|idx| detections[idx].clone())
            .collect();

        let mut dist_unconfirmed = matching::iou_distance(&rects(&unconfirmed), &rects(&detections_rem));
        matching::fuse_score(&mut dist_unconfirmed, &scores(&detections_rem));

        let AssignmentResult {
            matches: matches_unconfirmed,
            unmatched_detections: unmatched_new,
            ..
        } = matching::linear_assignment(&dist_unconfirmed, UNCONFIRMED_MATCH_THRESH);

        for (itracked, idet) in matches_unconfirmed {
            unconfirmed[itracked].update(&detections_rem[idet], &self.kalman_filter, self.frame_id);
            activated_stracks.push(unconfirmed[itracked].clone());
        }
        // unmatched unconfirmed tracks are dropped here

        // New tracks
        for idx in unmatched_new {
            let mut track = detections_rem[idx].clone();
            if track.score < self.config.track_thresh + NEW_TRACK_MARGIN {
                continue;
            }
            let id = self.next_track_id();
            track.activate(&self.kalman_filter, self.frame_id, id);
            activated_stracks.push(track);
        }

        // Age out lost tracks
        for mut track in self.lost_stracks.drain(..) {
            if self.frame_id - track.end_frame() > self.max_time_lost {
                track.mark_removed();
                trace!(track_id = track.track_id, "track aged out");
            } else {
                lost_stracks.push(track);
            }
        }

        let tracked: Vec<STrack> = activated_stracks
            .into_iter()
            .chain(refind_stracks)
            .filter(|t| t.state == TrackState::Tracked)
            .collect();

        let lost = sub_stracks(lost_stracks, &tracked);
        let (tracked, lost) = remove_duplicate_stracks(tracked, lost);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;

        self.tracked_stracks.clone()
    }
}

fn rects(tracks: &[STrack]) -> Vec<Rect> {
    tracks.iter().map(STrack::rect).collect()
}

fn scores(tracks: &[STrack]) -> Vec<f32> {
    tracks.iter().map(|t| t.score).collect()
}

fn joint_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let mut exists: HashSet<TrackId> = tlista.iter().map(|t| t.track_id).collect();
    let mut res = tlista;
    for t in tlistb {
        if exists.insert(t.track_id) {
            res.push(t.clone());
        }
    }
    res
}

fn sub_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let b_ids: HashSet<TrackId> = tlistb.iter().map(|t| t.track_id).collect();
    tlista
        .into_iter()
        .filter(|t| !b_ids.contains(&t.track_id))
        .collect()
}

/// Drop the younger of each tracked/lost pair that overlaps almost entirely.
fn remove_duplicate_stracks(
    stracksa: Vec<STrack>,
    stracksb: Vec<STrack>,
) -> (Vec<STrack>, Vec<STrack>) {
    if stracksa.is_empty() || stracksb.is_empty() {
        return (stracksa, stracksb);
    }

    let ious = iou_batch(&rects(&stracksa), &rects(&stracksb));

    let mut dupa = vec![false; stracksa.len()];
    let mut dupb = vec![false; stracksb.len()];

    for ((i, j), &iou) in ious.indexed_iter() {
        if iou > DUPLICATE_IOU {
            let age_a = stracksa[i].frame_id - stracksa[i].start_frame;
            let age_b = stracksb[j].frame_id - stracksb[j].start_frame;
            if age_a > age_b {
                dupb[j] = true;
            } else {
                dupa[i] = true;
            }
        }
    }

    let keep = |tracks: Vec<STrack>, dup: &[bool]| -> Vec<STrack> {
        tracks
            .into_iter()
            .zip(dup)
            .filter(|(_, d)| !**d)
            .map(|(t, _)| t)
            .collect()
    };

    (keep(stracksa, &dupa), keep(stracksb, &dupb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, score: f32) -> Detection {
        Detection::new(x, 100.0, x + 50.0, 200.0, score, "car")
    }

    #[test]
    fn ids_are_per_tracker() {
        let mut a = BYTETracker::new(TrackerConfig::default());
        let mut b = BYTETracker::new(TrackerConfig::default());
        let ta = a.update(vec![det(0.0, 0.9)]);
        let tb = b.update(vec![det(0.0, 0.9)]);
        assert_eq!(ta[0].track_id, 1);
        assert_eq!(tb[0].track_id, 1);
    }

    #[test]
    fn new_track_after_first_frame_starts_unconfirmed() {
        let mut tracker = BYTETracker::new(TrackerConfig::default());
        tracker.update(vec![det(0.0, 0.9)]);

        let tracks = tracker.update(vec![det(2.0, 0.9), det(400.0, 0.9)]);
        assert_eq!(tracks.len(), 2);
        let fresh = tracks.iter().find(|t| t.track_id == 2).unwrap();
        assert!(!fresh.is_confirmed());
        assert_eq!(fresh.label, "car");

        let tracks = tracker.update(vec![det(4.0, 0.9), det(402.0, 0.9)]);
        assert!(tracks.iter().all(STrack::is_confirmed));
    }

    #[test]
    fn lost_track_is_removed_after_max_age() {
        let config = TrackerConfig {
            max_age: 3,
            ..TrackerConfig::default()
        };
        let mut tracker = BYTETracker::new(config);
        assert_eq!(tracker.max_time_lost(), 3);

        tracker.update(vec![det(0.0, 0.9)]);
        for _ in 0..4 {
            assert!(tracker.update(vec![]).is_empty());
        }
        let tracks = tracker.update(vec![det(0.0, 0.9)]);
        assert_eq!(tracks.len(), 1);
        assert_ne!(tracks[0].track_id, 1);
    }

    #[test]
    fn duplicate_removal_keeps_older_track() {
        let kf = KalmanFilter::new();
        let mut old = STrack::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0.9, "car");
        old.activate(&kf, 1, 1);
        old.frame_id = 10;
        let mut young = STrack::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0.9, "car");
        young.activate(&kf, 9, 2);
        young.frame_id = 10;

        let (a, b) = remove_duplicate_stracks(vec![young], vec![old]);
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].track_id, 1);
    }
}
