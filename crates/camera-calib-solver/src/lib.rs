//! Multi-view planar camera calibration and pose estimation.
//!
//! ## Calibration
//!
//! 1. Every accepted view gets a board-to-image homography.
//! 2. Closed-form intrinsics from all homographies ([`estimate_intrinsics`]).
//! 3. Linear distortion fit from homography residuals ([`fit_distortion`]),
//!    alternated with step 2 on undistorted corners for a few rounds.
//! 4. Per-view poses from homography decomposition
//!    ([`pose_from_homography`]).
//! 5. Joint Levenberg-Marquardt refinement of intrinsics, distortion and
//!    poses ([`refine_calibration`]).
//!
//! ```no_run
//! use camera_calib_solver::{CalibrationOptions, CalibrationSession, CheckerboardSpec};
//! # fn detections() -> Vec<camera_calib_core::TargetDetection> { Vec::new() }
//!
//! let board = CheckerboardSpec::new(6, 9, 25.0);
//! let mut session = CalibrationSession::new(board, [1280, 720], CalibrationOptions::default());
//! for det in detections() {
//!     if let Err(reason) = session.add_view(&det) {
//!         eprintln!("view rejected: {reason}");
//!     }
//! }
//! let result = session.calibrate()?;
//! println!("rms {:.3} px", result.rms);
//! # Ok::<(), camera_calib_solver::CalibError>(())
//! ```
//!
//! ## Pose
//!
//! [`PoseEstimator`] locates a calibrated camera relative to a planar world
//! reference and maps pixels to the plane and back.

mod board;
mod distortion_fit;
mod lm;
mod planar_pose;
mod pose;
mod refine;
mod session;
mod zhang;

pub use board::{CalibrationView, CheckerboardSpec};
pub use distortion_fit::{fit_distortion, DistortionFitError, DistortionFitOptions};
pub use lm::{minimize, numeric_jacobian, DynProblem, LmOptions, LmReport};
pub use planar_pose::{nearest_rotation, pose_from_homography};
pub use pose::{PoseError, PoseEstimator, PoseOptions, PoseResult};
pub use refine::{refine_calibration, reprojection_errors, RefineFlags, RefineOutput};
pub use session::{
    CalibError, CalibrationOptions, CalibrationResult, CalibrationSession, SessionView, ViewId,
    ViewRejection,
};
pub use zhang::{estimate_intrinsics, ZhangError};
