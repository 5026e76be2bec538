//! `camera-calib` command line: calibrate, locate, rectify and check coverage.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camera_calib::config::{CalibConfig, ConfigError};
use camera_calib::core::{CameraModel, CameraModelError};
use camera_calib::detect::{self, DetectError};
use camera_calib::feedback::{CoverageReport, HistogramError, ViewCoverage};
use camera_calib::rectify::{RectificationMode, Rectifier, RectifyError, RectifyOptions, WorldRect};
use camera_calib::solver::{
    CalibError, CalibrationSession, PoseError, PoseEstimator, PoseResult, ViewId,
};
use clap::{Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to open image {path}: {source}")]
    OpenImage {
        path: String,
        source: image::ImageError,
    },
    #[error("failed to save image {path}: {source}")]
    SaveImage {
        path: String,
        source: image::ImageError,
    },
    #[error("image {path} is {got:?}, expected {expected:?}")]
    ImageSize {
        path: String,
        got: [u32; 2],
        expected: [u32; 2],
    },
    #[error("no checkerboard found in {0}")]
    NoBoard(String),
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error("calibration failed: {0}")]
    Calib(#[from] CalibError),
    #[error("pose estimation failed: {0}")]
    Pose(#[from] PoseError),
    #[error("rectification failed: {0}")]
    Rectify(#[from] RectifyError),
    #[error("invalid coverage ranges: {0}")]
    Coverage(#[from] HistogramError),
    #[error(transparent)]
    Detect(#[from] DetectError),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "camera-calib")]
#[command(about = "Checkerboard camera calibration, pose estimation and image rectification")]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace); defaults to
    /// CAMERA_CALIB_LOG or info.
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Emit tracing events as JSON lines (needs the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Calibrate intrinsics and distortion from checkerboard images.
    Calibrate(CalibrateArgs),
    /// Estimate the camera pose against a board lying on the world plane.
    Pose(PoseArgs),
    /// Undistort, untilt or align an image.
    Rectify(RectifyArgs),
    /// Histogram area, tilt and distance coverage of a capture set.
    Coverage(CoverageArgs),
}

#[derive(Args)]
struct CalibrateArgs {
    /// JSON configuration (board, detector and solver settings).
    #[arg(long)]
    config: PathBuf,

    /// Write the calibrated camera model here (JSON).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Drop views whose RMS reprojection error exceeds this many pixels,
    /// then recalibrate.
    #[arg(long)]
    prune: Option<f64>,

    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Args)]
struct PoseArgs {
    /// Camera model JSON written by `calibrate`.
    #[arg(long)]
    camera: PathBuf,

    #[arg(long)]
    config: PathBuf,

    /// Write the pose here (JSON).
    #[arg(long)]
    output: Option<PathBuf>,

    image: PathBuf,
}

#[derive(Args)]
struct RectifyArgs {
    #[arg(long)]
    camera: PathBuf,

    #[arg(long)]
    mode: RectificationMode,

    /// Pose JSON written by `pose` (untilt and align).
    #[arg(long)]
    pose: Option<PathBuf>,

    /// Optional configuration; only its `rectify` section is used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// World rectangle for align, as `x,y,width,height`.
    #[arg(long, value_parser = parse_rect)]
    rect: Option<WorldRect>,

    /// World units per output pixel.
    #[arg(long)]
    scale: Option<f64>,

    #[arg(long)]
    output: PathBuf,

    image: PathBuf,
}

#[derive(Args)]
struct CoverageArgs {
    #[arg(long)]
    camera: PathBuf,

    #[arg(long)]
    config: PathBuf,

    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn parse_rect(s: &str) -> Result<WorldRect, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{s}': {e}"))?;
    match values[..] {
        [x, y, w, h] => Ok(WorldRect::new(x, y, w, h)),
        _ => Err(format!("expected x,y,width,height, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Command::Calibrate(args) => run_calibrate(args),
        Command::Pose(args) => run_pose(args),
        Command::Rectify(args) => run_rectify(args),
        Command::Coverage(args) => run_coverage(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    if cli.log_json || cli.log_level.is_none() {
        camera_calib::core::init_tracing(cli.log_json);
        return;
    }
    init_log_facade(cli.log_level);
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    init_log_facade(cli.log_level);
    if cli.log_json {
        warn!("--log-json needs the `tracing` feature; using plain logs");
    }
}

fn init_log_facade(level: Option<LevelFilter>) {
    let res = match level {
        Some(level) => camera_calib::core::init_with_level(level),
        None => camera_calib::core::init_from_env(LevelFilter::Info),
    };
    if let Err(err) = res {
        eprintln!("warning: logger already installed: {err}");
    }
}

// ── helpers ─────────────────────────────────────────────────────────────

fn read_text(path: &Path) -> CliResult<String> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn write_text(path: &Path, text: &str) -> CliResult<()> {
    std::fs::write(path, text).map_err(|source| CliError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!("wrote {}", path.display());
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    serde_json::from_str(&read_text(path)?).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn load_camera(path: &Path) -> CliResult<CameraModel> {
    let camera: CameraModel = load_json(path)?;
    camera.validate()?;
    Ok(camera)
}

fn load_gray(path: &Path) -> CliResult<image::GrayImage> {
    let img = image::open(path).map_err(|source| CliError::OpenImage {
        path: path.display().to_string(),
        source,
    })?;
    Ok(img.to_luma8())
}

fn print_json<T: Serialize>(value: &T) -> CliResult<String> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(json)
}

/// Board detection plus the checks every command shares.
fn detect_board(
    cfg: &CalibConfig,
    path: &Path,
    expected_size: Option<[u32; 2]>,
) -> CliResult<(image::GrayImage, Option<camera_calib::TargetDetection>)> {
    let img = load_gray(path)?;
    let size = [img.width(), img.height()];
    if let Some(expected) = expected_size {
        if size != expected {
            return Err(CliError::ImageSize {
                path: path.display().to_string(),
                got: size,
                expected,
            });
        }
    }
    let chess = cfg.chess.to_chess_config();
    let det = detect::detect_chessboard(&img, &chess, cfg.chessboard_params())?;
    match &det {
        Some(d) => info!(
            "{}: {} corners ({:.0}% of the board)",
            path.display(),
            d.detection.corners.len(),
            100.0 * d.completeness
        ),
        None => warn!("{}: no checkerboard found", path.display()),
    }
    Ok((img, det.map(|d| d.detection)))
}

// ── calibrate ───────────────────────────────────────────────────────────

fn run_calibrate(args: &CalibrateArgs) -> CliResult<()> {
    let cfg = CalibConfig::load(&args.config)?;
    let mut session: Option<CalibrationSession> = None;
    let mut sources: Vec<(ViewId, &Path)> = Vec::new();

    for path in &args.images {
        let expected = session.as_ref().map(|s| s.image_size());
        let (img, det) = detect_board(&cfg, path, expected)?;
        let session = session.get_or_insert_with(|| {
            CalibrationSession::new(cfg.board, [img.width(), img.height()], cfg.calibration)
        });
        let Some(det) = det else { continue };
        match session.add_view(&det) {
            Ok(id) => sources.push((id, path.as_path())),
            Err(reason) => warn!("{}: view rejected: {reason}", path.display()),
        }
    }

    let Some(mut session) = session else {
        return Err(CliError::Calib(CalibError::NotEnoughViews {
            need: cfg.calibration.min_views.max(3),
            got: 0,
        }));
    };
    let mut result = session.calibrate()?;

    if let Some(max_rms) = args.prune {
        let removed = session.prune_views(max_rms);
        if !removed.is_empty() {
            for id in &removed {
                if let Some((_, path)) = sources.iter().find(|(v, _)| v == id) {
                    info!("pruned {} (rms above {max_rms} px)", path.display());
                }
            }
            result = session.calibrate()?;
        }
    }

    for (id, rms) in result.view_ids.iter().zip(&result.per_view_rms) {
        if let Some((_, path)) = sources.iter().find(|(v, _)| v == id) {
            info!("{}: rms {rms:.3} px", path.display());
        }
    }
    info!(
        "calibrated from {} views: rms {:.3} px, max {:.3} px",
        result.view_ids.len(),
        result.rms,
        result.max_error
    );

    print_json(&result)?;
    if let Some(out) = &args.output {
        write_text(out, &result.camera.to_json()?)?;
    }
    Ok(())
}

// ── pose ────────────────────────────────────────────────────────────────

fn run_pose(args: &PoseArgs) -> CliResult<()> {
    let camera = load_camera(&args.camera)?;
    let cfg = CalibConfig::load(&args.config)?;
    let estimator = PoseEstimator::with_options(camera, cfg.pose)?;

    let (_, det) = detect_board(&cfg, &args.image, Some(camera.image_size))?;
    let det = det.ok_or_else(|| CliError::NoBoard(args.image.display().to_string()))?;
    let pose = estimator.estimate_from_detection(&det, &cfg.board)?;
    info!(
        "tilt {:.2} deg, distance {:.1}, rms {:.3} px",
        pose.tilt_deg, pose.distance, pose.rms
    );

    let json = print_json(&pose)?;
    if let Some(out) = &args.output {
        write_text(out, &json)?;
    }
    Ok(())
}

// ── rectify ─────────────────────────────────────────────────────────────

fn run_rectify(args: &RectifyArgs) -> CliResult<()> {
    let camera = load_camera(&args.camera)?;
    let mut options = match &args.config {
        Some(path) => CalibConfig::load(path)?.rectify,
        None => RectifyOptions::default(),
    };
    if args.rect.is_some() {
        options.rect = args.rect;
    }
    if args.scale.is_some() {
        options.scale = args.scale;
    }

    let pose = match &args.pose {
        Some(path) => Some(load_json::<PoseResult>(path)?.world_to_camera),
        None => None,
    };
    if pose.is_some() && !args.mode.needs_pose() {
        warn!("--pose is ignored for {:?}", args.mode);
    }

    let img = load_gray(&args.image)?;
    let rectifier = Rectifier::new(camera, args.mode, pose, &options)?;
    let out = rectifier.apply(&detect::gray_view(&img));
    let [w, h] = rectifier.output_size();
    info!("{:?}: {}x{} -> {w}x{h}", args.mode, img.width(), img.height());

    detect::to_image(&out)?
        .save(&args.output)
        .map_err(|source| CliError::SaveImage {
            path: args.output.display().to_string(),
            source,
        })?;
    info!("wrote {}", args.output.display());
    Ok(())
}

// ── coverage ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CoverageOutput {
    views: Vec<CoverageEntry>,
    report: CoverageReport,
}

#[derive(Serialize)]
struct CoverageEntry {
    image: String,
    #[serde(flatten)]
    coverage: ViewCoverage,
}

fn run_coverage(args: &CoverageArgs) -> CliResult<()> {
    let camera = load_camera(&args.camera)?;
    let cfg = CalibConfig::load(&args.config)?;
    let estimator = PoseEstimator::with_options(camera, cfg.pose)?;

    let mut views = Vec::new();
    for path in &args.images {
        let (_, det) = detect_board(&cfg, path, Some(camera.image_size))?;
        let Some(det) = det else { continue };
        let pose = match estimator.estimate_from_detection(&det, &cfg.board) {
            Ok(pose) => pose,
            Err(err) => {
                warn!("{}: no pose: {err}", path.display());
                continue;
            }
        };
        if let Some(coverage) = ViewCoverage::from_detection(&det, camera.image_size, &pose) {
            views.push(CoverageEntry {
                image: path.display().to_string(),
                coverage,
            });
        }
    }

    let coverages: Vec<ViewCoverage> = views.iter().map(|v| v.coverage).collect();
    let report = CoverageReport::from_views(&coverages, &cfg.coverage)?;
    print_json(&CoverageOutput { views, report })?;
    Ok(())
}
