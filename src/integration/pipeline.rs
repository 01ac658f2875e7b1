//! Per-frame pipeline: detect, optionally track and estimate speed, annotate.

use std::collections::HashSet;
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::detector::{DetectionSource, FrameDetector};
use crate::annotate::{Annotation, Annotator};
use crate::config::PipelineConfig;
use crate::detection::Detection;
use crate::error::Result;
use crate::kinematics::{FrameClock, KinematicsEstimator};
use crate::tracker::{BYTETracker, Rect, TrackId, TrackerConfig};
use crate::video::{Frame, FrameSink, FrameSource};

/// Frames between progress log lines.
const PROGRESS_EVERY: u64 = 100;

/// What a run computes, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Boxes and class labels only.
    #[default]
    Detection,
    /// Tracked boxes with per-track speed estimates.
    Speed,
}

enum Stage {
    Detection,
    Speed {
        tracker: BYTETracker,
        estimator: KinematicsEstimator,
        clock: FrameClock,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub track_id: TrackId,
    pub label: String,
    pub bbox: Rect,
    pub speed_kmh: f64,
}

/// What one frame produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub detections: Vec<Detection>,
    /// Confirmed tracks; empty in detection mode.
    pub tracks: Vec<TrackReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub distinct_tracks: usize,
    pub max_speed_kmh: f64,
}

/// Runs a [`DetectionSource`] over a stream, one frame at a time.
///
/// Owns all per-run state (tracker, speed store). Build one per video.
pub struct Pipeline<D: DetectionSource> {
    detector: FrameDetector<D>,
    stage: Stage,
    annotator: Annotator,
}

impl<D: DetectionSource> Pipeline<D> {
    /// `fps` is the stream's frame rate; it drives the speed time base and
    /// the tracker's aging window.
    pub fn new(detector: D, mode: PipelineMode, config: &PipelineConfig, annotator: Annotator, fps: f64) -> Self {
        let stage = match mode {
            PipelineMode::Detection => Stage::Detection,
            PipelineMode::Speed => {
                let clock = FrameClock::new(fps);
                let tracker_config = TrackerConfig {
                    frame_rate: clock.fps() as f32,
                    ..config.tracker.clone()
                };
                Stage::Speed {
                    tracker: BYTETracker::new(tracker_config),
                    estimator: KinematicsEstimator::new(&config.speed),
                    clock,
                }
            }
        };

        Self {
            detector: FrameDetector::new(detector, &config.detector),
            stage,
            annotator,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        match self.stage {
            Stage::Detection => PipelineMode::Detection,
            Stage::Speed { .. } => PipelineMode::Speed,
        }
    }

    pub fn detector(&self) -> &FrameDetector<D> {
        &self.detector
    }

    /// Speed store, present in speed mode.
    pub fn estimator(&self) -> Option<&KinematicsEstimator> {
        match &self.stage {
            Stage::Detection => None,
            Stage::Speed { estimator, .. } => Some(estimator),
        }
    }

    /// Process one frame in place. Frames must arrive in stream order.
    pub fn process_frame(&mut self, frame: &mut Frame) -> Result<FrameReport> {
        let detections = self.detector.detect(frame)?;

        let (annotations, tracks) = match &mut self.stage {
            Stage::Detection => {
                let annotations: Vec<Annotation> = detections
                    .iter()
                    .map(|d| Annotation {
                        bbox: d.bbox,
                        class_label: d.label.clone(),
                        caption: format!("{} {:.2}", d.label, d.score),
                        color: None,
                    })
                    .collect();
                (annotations, Vec::new())
            }
            Stage::Speed {
                tracker,
                estimator,
                clock,
            } => {
                let now = clock.timestamp(frame.index);
                let tracks: Vec<TrackReport> = tracker
                    .update(detections.clone())
                    .into_iter()
                    .filter(|t| t.is_confirmed())
                    .map(|t| {
                        let bbox = t.rect();
                        let speed_kmh = estimator.observe(t.track_id, bbox.centroid(), now);
                        TrackReport {
                            track_id: t.track_id,
                            label: t.label,
                            bbox,
                            speed_kmh,
                        }
                    })
                    .collect();

                let evicted = estimator.evict_stale(frame.index, tracker.max_time_lost());
                if evicted > 0 {
                    debug!(frame = frame.index, evicted, "dropped expired speed state");
                }

                let annotator = &self.annotator;
                let annotations: Vec<Annotation> = tracks
                    .iter()
                    .map(|t| Annotation {
                        bbox: t.bbox,
                        class_label: t.label.clone(),
                        caption: format!("{} | ID {} | {:.1} km/h", t.label, t.track_id, t.speed_kmh),
                        // hazards keep the hazard color
                        color: (!annotator.is_hazard(&t.label)).then(|| annotator.speed_color()),
                    })
                    .collect();
                (annotations, tracks)
            }
        };

        self.annotator.draw(&mut frame.image, &annotations);
        debug!(
            frame = frame.index,
            detections = detections.len(),
            tracks = tracks.len(),
            "frame processed"
        );

        Ok(FrameReport {
            frame: frame.index,
            detections,
            tracks,
        })
    }

    /// Drain `source` into `sink`, annotating every frame.
    ///
    /// Each frame is fully written before the next is read. The first
    /// error aborts the run. When `report` is given, one JSON line per
    /// frame is written to it.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, mut report: Option<&mut dyn Write>) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        let mut seen: HashSet<TrackId> = HashSet::new();

        info!(mode = ?self.mode(), info = ?source.info(), "run started");

        while let Some(mut frame) = source.next_frame()? {
            let frame_report = self.process_frame(&mut frame)?;
            sink.write_frame(&frame)?;

            if let Some(out) = report.as_mut() {
                serde_json::to_writer(&mut **out, &frame_report).map_err(std::io::Error::from)?;
                out.write_all(b"\n")?;
            }

            summary.frames += 1;
            summary.detections += frame_report.detections.len() as u64;
            for track in &frame_report.tracks {
                seen.insert(track.track_id);
                summary.max_speed_kmh = summary.max_speed_kmh.max(track.speed_kmh);
            }

            if summary.frames % PROGRESS_EVERY == 0 {
                info!(frames = summary.frames, "progress");
            }
        }

        sink.finish()?;
        summary.distinct_tracks = seen.len();
        info!(
            frames = summary.frames,
            detections = summary.detections,
            tracks = summary.distinct_tracks,
            max_speed_kmh = summary.max_speed_kmh,
            "run finished"
        );
        Ok(summary)
    }
}
