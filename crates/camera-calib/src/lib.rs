//! Facade crate for the `camera-calib-*` workspace.
//!
//! - re-exports of the geometry, detection, solver, rectification and
//!   feedback crates
//! - [`config::CalibConfig`], the JSON configuration shared by the CLI
//! - (feature `image`) end-to-end detection helpers from `image::GrayImage`
//!
//! ## Quickstart
//!
//! ```no_run
//! use camera_calib::detect;
//! use camera_calib::solver::{CalibrationOptions, CalibrationSession, CheckerboardSpec};
//! use camera_calib::ChessboardParams;
//! use image::ImageReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let board = CheckerboardSpec::new(6, 9, 25.0);
//! let chess_cfg = detect::default_chess_config();
//! let mut session = CalibrationSession::new(board, [1280, 720], CalibrationOptions::default());
//! for path in ["a.png", "b.png", "c.png"] {
//!     let img = ImageReader::open(path)?.decode()?.to_luma8();
//!     let params = ChessboardParams::for_board(board.rows, board.cols);
//!     if let Some(det) = detect::detect_chessboard(&img, &chess_cfg, params)? {
//!         session.add_view(&det.detection)?;
//!     }
//! }
//! let result = session.calibrate()?;
//! println!("{}", result.camera.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `camera_calib::core`: images, homographies, camera model, logging.
//! - `camera_calib::chessboard`: checkerboard grid from ChESS corners.
//! - `camera_calib::solver`: calibration session and pose estimation.
//! - `camera_calib::rectify`: undistort, untilt and align.
//! - `camera_calib::feedback`: coverage histograms and plot polylines.
//! - `camera_calib::detect` (feature `image`): helpers from `image::GrayImage`.

pub use camera_calib_chessboard as chessboard;
pub use camera_calib_core as core;
pub use camera_calib_feedback as feedback;
pub use camera_calib_rectify as rectify;
pub use camera_calib_solver as solver;

pub use camera_calib_chessboard::ChessboardParams;
pub use camera_calib_core::{
    BrownConrady, CameraIntrinsics, CameraModel, Corner, GridCoords, LabeledCorner,
    TargetDetection, TargetKind,
};
pub use camera_calib_rectify::{RectificationMode, Rectifier, RectifyOptions, WorldRect};
pub use camera_calib_solver::{
    CalibrationOptions, CalibrationResult, CalibrationSession, CheckerboardSpec, PoseEstimator,
    PoseResult,
};

pub mod config;

#[cfg(feature = "image")]
pub mod detect;
