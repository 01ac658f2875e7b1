use std::fs;
use std::path::PathBuf;

use image::{Rgb, RgbImage};
use roadeye::PipelineConfig;
use roadeye::annotate::{AnnotationConfig, Annotator};
use roadeye::integration::{Pipeline, PipelineMode, ReplayDetector};
use roadeye::video::{Frame, FrameSink, FrameSource, ImageSequenceReader, ImageSequenceWriter, VideoInfo};

const W: u32 = 160;
const H: u32 = 120;
const BACKGROUND: Rgb<u8> = Rgb([30, 30, 30]);

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roadeye-it-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Plain frames at 10 fps.
fn write_input(dir: &PathBuf, frames: u64) {
    let info = VideoInfo {
        width: W,
        height: H,
        fps: 10.0,
    };
    let mut writer = ImageSequenceWriter::create(dir, info).unwrap();
    for index in 0..frames {
        writer
            .write_frame(&Frame {
                index,
                image: RgbImage::from_pixel(W, H, BACKGROUND),
            })
            .unwrap();
    }
    writer.finish().unwrap();
}

/// A car driving down 5 px per frame, plus a stationary accident from frame 2.
fn dump(frames: u64) -> String {
    let mut lines = vec![r#"{"names": ["car", "accident"]}"#.to_string()];
    for i in 0..frames {
        let y = 10.0 + 5.0 * i as f32;
        let mut rows = format!("[20, {y}, 60, {}, 0.9, 0]", y + 30.0);
        if i >= 2 {
            rows.push_str(", [100, 60, 140, 100, 0.8, 1]");
        }
        lines.push(format!(r#"{{"frame": {i}, "rows": [{rows}]}}"#));
    }
    lines.join("\n")
}

fn run(mode: PipelineMode, name: &str) -> (PathBuf, roadeye::integration::RunSummary, String) {
    let input_dir = scratch(&format!("{name}-in"));
    let output_dir = scratch(&format!("{name}-out"));
    write_input(&input_dir, 8);

    let mut input = ImageSequenceReader::open(&input_dir, None).unwrap();
    let info = input.info();
    assert_eq!(info.fps, 10.0);
    let mut output = ImageSequenceWriter::create(&output_dir, info).unwrap();

    let detector = ReplayDetector::parse(&dump(8)).unwrap();
    let annotator = Annotator::with_font(AnnotationConfig::default(), None);
    let mut pipeline = Pipeline::new(detector, mode, &PipelineConfig::default(), annotator, info.fps);

    let mut report = Vec::new();
    let summary = pipeline.run(&mut input, &mut output, Some(&mut report)).unwrap();
    (output_dir, summary, String::from_utf8(report).unwrap())
}

#[test]
fn detection_mode_annotates_every_frame() {
    let (out, summary, report) = run(PipelineMode::Detection, "det");

    assert_eq!(summary.frames, 8);
    assert_eq!(summary.detections, 8 + 6);
    assert_eq!(summary.distinct_tracks, 0);
    assert_eq!(report.lines().count(), 8);

    let reader = ImageSequenceReader::open(&out, None).unwrap();
    assert_eq!(reader.len(), 8);
    assert_eq!(reader.info().fps, 10.0);

    let first = image::open(out.join("frame_000000.png")).unwrap().to_rgb8();
    assert_eq!(*first.get_pixel(20, 10), Rgb([0, 0, 255]));
    assert_eq!(*first.get_pixel(100, 60), BACKGROUND);

    let third = image::open(out.join("frame_000002.png")).unwrap().to_rgb8();
    assert_eq!(*third.get_pixel(100, 60), Rgb([255, 0, 0]));
}

#[test]
fn speed_mode_tracks_and_measures() {
    let (_, summary, report) = run(PipelineMode::Speed, "speed");

    assert_eq!(summary.frames, 8);
    assert_eq!(summary.distinct_tracks, 2);
    // 5 px/frame at 0.05 m/px and 10 fps is 9 km/h
    assert!(summary.max_speed_kmh > 6.0 && summary.max_speed_kmh < 12.0);

    let last: serde_json::Value = serde_json::from_str(report.lines().last().unwrap()).unwrap();
    let tracks = last["tracks"].as_array().unwrap();
    assert_eq!(tracks.len(), 2);

    let car = tracks.iter().find(|t| t["label"] == "car").unwrap();
    assert_eq!(car["track_id"], 1);
    let accident = tracks.iter().find(|t| t["label"] == "accident").unwrap();
    assert!(accident["speed_kmh"].as_f64().unwrap() < 1.0);
}

#[test]
fn empty_input_directory_fails_before_processing() {
    let dir = scratch("empty");
    assert!(matches!(
        ImageSequenceReader::open(&dir, None),
        Err(roadeye::Error::Input { .. })
    ));
}
