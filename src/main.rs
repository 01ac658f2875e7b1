use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roadeye::PipelineConfig;
use roadeye::annotate::Annotator;
use roadeye::integration::{ClassNames, DetectionSource, Pipeline, PipelineMode, ReplayDetector};
use roadeye::video::{FrameSink, FrameSource, ImageSequenceReader, ImageSequenceWriter, VideoInfo, is_video_file};

/// Annotate a traffic video with detections, tracks and speeds.
///
/// Input and output are video files (with the `video` feature) or
/// directories of numbered frames. A frame directory may carry its rate
/// in a `video.json` beside the frames.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video file or directory of frames
    #[arg(short, long)]
    input: PathBuf,

    /// Output video file (.mp4, ...) or directory for annotated frames
    #[arg(short, long)]
    output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = PipelineMode::Detection)]
    mode: PipelineMode,

    /// Recorded detections, JSON lines
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// YOLOv8 ONNX export
    #[cfg(feature = "onnx")]
    #[arg(long, conflicts_with = "detections")]
    model: Option<PathBuf>,

    /// Class names, JSON array or one per line
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Frame rate, overriding the sequence metadata
    #[arg(long)]
    fps: Option<f64>,

    /// JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TrueType font for captions
    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long)]
    meters_per_pixel: Option<f64>,

    #[arg(long)]
    conf_threshold: Option<f32>,

    /// Write one JSON line per frame to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roadeye=info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(font) = &args.font {
        config.annotation.font_path = Some(font.clone());
    }
    if let Some(mpp) = args.meters_per_pixel {
        config.speed.meters_per_pixel = mpp;
    }
    if let Some(conf) = args.conf_threshold {
        config.detector.conf_threshold = conf;
    }

    let labels = args
        .labels
        .as_ref()
        .map(ClassNames::from_file)
        .transpose()
        .context("loading class names")?;

    #[cfg(feature = "onnx")]
    if let Some(model) = &args.model {
        let names = labels.unwrap_or_default();
        let detector = roadeye::integration::OnnxDetector::open(model, names, &config.detector)?;
        return annotate(detector, &args, &config);
    }

    let Some(dump) = &args.detections else {
        bail!("no detector given: pass --detections or, with the onnx feature, --model");
    };
    let mut detector = ReplayDetector::open(dump)?;
    if let Some(names) = labels {
        detector = detector.with_names(names);
    }
    annotate(detector, &args, &config)
}

fn annotate<D: DetectionSource>(detector: D, args: &Args, config: &PipelineConfig) -> Result<()> {
    let mut input = open_input(args)?;
    let info = input.info();
    let mut output = create_output(&args.output, info)?;
    let annotator = Annotator::new(config.annotation.clone())?;

    let mut report = match &args.report {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating report {}", path.display()))?,
        )),
        None => None,
    };

    let mut pipeline = Pipeline::new(detector, args.mode, config, annotator, info.fps);
    let summary = pipeline.run(
        input.as_mut(),
        output.as_mut(),
        report.as_mut().map(|w| w as &mut dyn Write),
    )?;
    if let Some(mut w) = report {
        w.flush().context("flushing report")?;
    }

    info!(
        frames = summary.frames,
        tracks = summary.distinct_tracks,
        output = %args.output.display(),
        "done"
    );
    Ok(())
}

fn open_input(args: &Args) -> Result<Box<dyn FrameSource>> {
    if args.input.is_dir() {
        return Ok(Box::new(ImageSequenceReader::open(&args.input, args.fps)?));
    }
    open_video(&args.input, args.fps)
}

#[cfg(feature = "video")]
fn open_video(path: &Path, fps: Option<f64>) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(roadeye::video::VideoFileReader::open(path, fps)?))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path, _fps: Option<f64>) -> Result<Box<dyn FrameSource>> {
    bail!(
        "{} is not a frame directory; reading video files needs the `video` feature",
        path.display()
    )
}

fn create_output(path: &Path, info: VideoInfo) -> Result<Box<dyn FrameSink>> {
    if is_video_file(path) {
        return create_video(path, info);
    }
    Ok(Box::new(ImageSequenceWriter::create(path, info)?))
}

#[cfg(feature = "video")]
fn create_video(path: &Path, info: VideoInfo) -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(roadeye::video::VideoFileWriter::create(path, info)?))
}

#[cfg(not(feature = "video"))]
fn create_video(path: &Path, _info: VideoInfo) -> Result<Box<dyn FrameSink>> {
    bail!("writing {} needs the `video` feature", path.display())
}
