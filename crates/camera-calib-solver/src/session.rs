use camera_calib_core::{
    estimate_homography, BrownConrady, CameraIntrinsics, CameraModel, TargetDetection,
};
use log::{debug, info, warn};
use nalgebra::{Isometry3, Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::distortion_fit::{fit_distortion, DistortionFitError, DistortionFitOptions};
use crate::lm::LmOptions;
use crate::planar_pose::pose_from_homography;
use crate::refine::{refine_calibration, reprojection_errors, RefineFlags};
use crate::zhang::{estimate_intrinsics, ZhangError};
use crate::{CalibrationView, CheckerboardSpec};

/// Rounds of "intrinsics, distortion, undistort corners" before refinement.
const INIT_ROUNDS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    /// Minimum number of accepted views before `calibrate` runs (at least 3).
    pub min_views: usize,
    pub min_corners_per_view: usize,
    pub zero_skew: bool,
    pub fix_k3: bool,
    pub fix_tangential: bool,
    pub fix_aspect_ratio: bool,
    pub max_iterations: usize,
    pub ftol: f64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            min_views: 3,
            min_corners_per_view: 8,
            zero_skew: true,
            fix_k3: true,
            fix_tangential: false,
            fix_aspect_ratio: false,
            max_iterations: 100,
            ftol: 1e-10,
        }
    }
}

impl CalibrationOptions {
    fn refine_flags(&self) -> RefineFlags {
        RefineFlags {
            zero_skew: self.zero_skew,
            fix_k3: self.fix_k3,
            fix_tangential: self.fix_tangential,
            fix_aspect_ratio: self.fix_aspect_ratio,
        }
    }

    fn lm_options(&self) -> LmOptions {
        LmOptions {
            max_iterations: self.max_iterations,
            ftol: self.ftol,
            ..LmOptions::default()
        }
    }
}

/// Stable handle of a view inside a [`CalibrationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewId(pub u64);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRejection {
    #[error("view has {found} usable corners, need at least {need}")]
    TooFewCorners { found: usize, need: usize },
    #[error("{board} board points but {pixels} pixels")]
    LengthMismatch { board: usize, pixels: usize },
    #[error("corners do not define a valid homography")]
    DegenerateHomography,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    #[error("need at least {need} views, have {got}")]
    NotEnoughViews { need: usize, got: usize },
    #[error("invalid image size {0:?}")]
    InvalidImageSize([u32; 2]),
    #[error("intrinsics initialisation failed: {0}")]
    Zhang(#[from] ZhangError),
    #[error("distortion initialisation failed: {0}")]
    Distortion(#[from] DistortionFitError),
    #[error("could not initialise the pose of view {0:?}")]
    PoseInit(ViewId),
    #[error("non-linear refinement failed")]
    RefinementFailed,
}

/// A view accepted by the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: ViewId,
    pub view: CalibrationView,
    /// Board-to-image homography fitted to the raw corners.
    pub homography: Matrix3<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub camera: CameraModel,
    /// `cam_from_board` for every view, parallel to `view_ids`.
    pub poses: Vec<Isometry3<f64>>,
    pub view_ids: Vec<ViewId>,
    /// Per-view RMS reprojection error in pixels.
    pub per_view_rms: Vec<f64>,
    pub rms: f64,
    pub max_error: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Multi-shot checkerboard calibration.
///
/// Views are added one by one as the board is moved in front of the camera;
/// `calibrate` can be called at any time once enough views are collected.
pub struct CalibrationSession {
    board: CheckerboardSpec,
    image_size: [u32; 2],
    options: CalibrationOptions,
    views: Vec<SessionView>,
    next_id: u64,
    last_rms: Vec<(ViewId, f64)>,
}

impl CalibrationSession {
    pub fn new(board: CheckerboardSpec, image_size: [u32; 2], options: CalibrationOptions) -> Self {
        Self {
            board,
            image_size,
            options,
            views: Vec::new(),
            next_id: 0,
            last_rms: Vec::new(),
        }
    }

    pub fn board(&self) -> &CheckerboardSpec {
        &self.board
    }

    pub fn image_size(&self) -> [u32; 2] {
        self.image_size
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Add the labelled corners of one checkerboard detection.
    pub fn add_view(&mut self, detection: &TargetDetection) -> Result<ViewId, ViewRejection> {
        self.add_correspondences(CalibrationView::from_detection(detection, &self.board))
    }

    /// Add a view given directly as board/pixel correspondences.
    pub fn add_correspondences(&mut self, view: CalibrationView) -> Result<ViewId, ViewRejection> {
        if view.pixels.len() != view.board.len() {
            return Err(ViewRejection::LengthMismatch {
                board: view.board.len(),
                pixels: view.pixels.len(),
            });
        }
        let need = self.options.min_corners_per_view.max(4);
        if view.len() < need {
            debug!("rejecting view with {} corners", view.len());
            return Err(ViewRejection::TooFewCorners {
                found: view.len(),
                need,
            });
        }

        let homography = estimate_homography(&view.board, &view.pixels)
            .ok_or(ViewRejection::DegenerateHomography)?;
        if !homography.h.iter().all(|v| v.is_finite()) {
            return Err(ViewRejection::DegenerateHomography);
        }

        let id = ViewId(self.next_id);
        self.next_id += 1;
        self.views.push(SessionView {
            id,
            view,
            homography: homography.h,
        });
        debug!("accepted view {:?} ({} views)", id, self.views.len());
        Ok(id)
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> &[SessionView] {
        &self.views
    }

    pub fn remove_view(&mut self, id: ViewId) -> bool {
        let before = self.views.len();
        self.views.retain(|v| v.id != id);
        self.last_rms.retain(|(v, _)| *v != id);
        self.views.len() != before
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.last_rms.clear();
    }

    /// Drop views whose RMS error in the last calibration exceeds `max_rms`.
    ///
    /// Returns the removed ids; nothing is removed before the first
    /// successful `calibrate`.
    pub fn prune_views(&mut self, max_rms: f64) -> Vec<ViewId> {
        let bad: Vec<ViewId> = self
            .last_rms
            .iter()
            .filter(|(_, rms)| rms.is_nan() || *rms > max_rms)
            .map(|(id, _)| *id)
            .collect();
        for id in &bad {
            self.remove_view(*id);
        }
        if !bad.is_empty() {
            info!("pruned {} views above {:.3} px RMS", bad.len(), max_rms);
        }
        bad
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(num_views = self.views.len()))
    )]
    pub fn calibrate(&mut self) -> Result<CalibrationResult, CalibError> {
        let need = self.options.min_views.max(3);
        if self.views.len() < need {
            return Err(CalibError::NotEnoughViews {
                need,
                got: self.views.len(),
            });
        }
        if self.image_size[0] == 0 || self.image_size[1] == 0 {
            return Err(CalibError::InvalidImageSize(self.image_size));
        }

        let views: Vec<CalibrationView> = self.views.iter().map(|v| v.view.clone()).collect();
        let (intrinsics, distortion) = self.initialise()?;
        let camera = CameraModel::new(intrinsics, distortion, self.image_size);
        debug!("initial intrinsics {:?}, distortion {:?}", intrinsics, distortion);

        let poses = self.initial_poses(&camera)?;
        let refined = refine_calibration(
            &camera,
            &poses,
            &views,
            self.options.refine_flags(),
            &self.options.lm_options(),
        )
        .ok_or(CalibError::RefinementFailed)?;

        let mut per_view_rms = Vec::with_capacity(views.len());
        let mut sum_sq = 0.0;
        let mut count = 0usize;
        let mut max_error: f64 = 0.0;
        for (pose, view) in refined.poses.iter().zip(&views) {
            let errs = reprojection_errors(&refined.camera, pose, view)
                .ok_or(CalibError::RefinementFailed)?;
            let view_sq: f64 = errs.iter().map(|e| e * e).sum();
            per_view_rms.push((view_sq / errs.len().max(1) as f64).sqrt());
            sum_sq += view_sq;
            count += errs.len();
            max_error = errs.iter().copied().fold(max_error, f64::max);
        }
        let rms = (sum_sq / count.max(1) as f64).sqrt();
        if !rms.is_finite() {
            return Err(CalibError::RefinementFailed);
        }
        if !refined.report.converged {
            warn!(
                "refinement stopped after {} iterations without converging",
                refined.report.iterations
            );
        }

        let view_ids: Vec<ViewId> = self.views.iter().map(|v| v.id).collect();
        self.last_rms = view_ids.iter().copied().zip(per_view_rms.iter().copied()).collect();

        info!(
            "calibrated {} views: fx {:.2} fy {:.2} cx {:.2} cy {:.2}, rms {:.4} px",
            views.len(),
            refined.camera.intrinsics.fx,
            refined.camera.intrinsics.fy,
            refined.camera.intrinsics.cx,
            refined.camera.intrinsics.cy,
            rms
        );

        Ok(CalibrationResult {
            camera: refined.camera,
            poses: refined.poses,
            view_ids,
            per_view_rms,
            rms,
            max_error,
            iterations: refined.report.iterations,
            converged: refined.report.converged,
        })
    }

    /// Alternate closed-form intrinsics and a linear distortion fit, each
    /// round re-fitting homographies to corners undistorted with the last
    /// estimate.
    fn initialise(&self) -> Result<(CameraIntrinsics, BrownConrady), CalibError> {
        let fit_opts = DistortionFitOptions {
            fix_k3: self.options.fix_k3,
            fix_tangential: self.options.fix_tangential,
        };
        let mut homographies: Vec<Matrix3<f64>> = self.views.iter().map(|v| v.homography).collect();
        let mut intrinsics =
            estimate_intrinsics(&homographies, self.image_size, self.options.zero_skew)?;
        let mut distortion = BrownConrady::default();

        for round in 0..INIT_ROUNDS {
            let pairs: Vec<_> = homographies
                .iter()
                .copied()
                .zip(self.views.iter().map(|v| &v.view))
                .collect();
            distortion = fit_distortion(&intrinsics, &pairs, fit_opts)?;

            let model = CameraModel::new(intrinsics, distortion, self.image_size);
            let mut rebuilt = Vec::with_capacity(self.views.len());
            for v in &self.views {
                let undistorted: Vec<Point2<f64>> = v
                    .view
                    .pixels
                    .iter()
                    .map(|p| model.undistort_pixel(*p))
                    .collect();
                match estimate_homography(&v.view.board, &undistorted) {
                    Some(h) => rebuilt.push(h.h),
                    None => rebuilt.push(v.homography),
                }
            }

            match estimate_intrinsics(&rebuilt, self.image_size, self.options.zero_skew) {
                Ok(k) => {
                    intrinsics = k;
                    homographies = rebuilt;
                }
                Err(e) => {
                    debug!("init round {round}: keeping previous intrinsics ({e})");
                    break;
                }
            }
        }

        Ok((intrinsics, distortion))
    }

    fn initial_poses(&self, camera: &CameraModel) -> Result<Vec<Isometry3<f64>>, CalibError> {
        let k = camera.intrinsics.k_matrix();
        self.views
            .iter()
            .map(|v| {
                let undistorted: Vec<Point2<f64>> = v
                    .view
                    .pixels
                    .iter()
                    .map(|p| camera.undistort_pixel(*p))
                    .collect();
                let h = estimate_homography(&v.view.board, &undistorted)
                    .map(|h| h.h)
                    .unwrap_or(v.homography);
                pose_from_homography(&k, &h).ok_or(CalibError::PoseInit(v.id))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_calib_core::{GridCoords, LabeledCorner, TargetKind};
    use nalgebra::Vector3;

    fn detection(
        camera: &CameraModel,
        board: &CheckerboardSpec,
        pose: &Isometry3<f64>,
    ) -> TargetDetection {
        let mut corners = Vec::new();
        for j in 0..board.rows as i32 {
            for i in 0..board.cols as i32 {
                let g = GridCoords { i, j };
                let p = camera
                    .project_from(pose, &board.board_point3(g))
                    .expect("visible");
                corners.push(LabeledCorner {
                    position: Point2::new(p.x as f32, p.y as f32),
                    grid: Some(g),
                    id: None,
                    confidence: 1.0,
                });
            }
        }
        TargetDetection {
            kind: TargetKind::Chessboard,
            corners,
        }
    }

    fn camera() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0),
            BrownConrady::default(),
            [640, 480],
        )
    }

    #[test]
    fn rejects_sparse_views() {
        let board = CheckerboardSpec::new(6, 8, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());
        let pose = Isometry3::new(Vector3::new(-100.0, -70.0, 600.0), Vector3::zeros());
        let mut det = detection(&camera(), &board, &pose);
        det.corners.truncate(5);
        assert_eq!(
            session.add_view(&det),
            Err(ViewRejection::TooFewCorners { found: 5, need: 8 })
        );
        assert_eq!(session.view_count(), 0);
    }

    #[test]
    fn rejects_mismatched_correspondences() {
        let board = CheckerboardSpec::new(6, 8, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());
        let mut view = CalibrationView::default();
        for k in 0..10 {
            view.board.push(Point2::new(k as f64, (k % 3) as f64));
            view.pixels.push(Point2::new(10.0 * k as f64, 5.0 * (k % 3) as f64));
        }
        view.pixels.pop();
        assert_eq!(
            session.add_correspondences(view),
            Err(ViewRejection::LengthMismatch {
                board: 10,
                pixels: 9
            })
        );
        assert_eq!(session.view_count(), 0);
    }

    #[test]
    fn rejects_collinear_corners() {
        let board = CheckerboardSpec::new(6, 9, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());

        // One row of the board seen at a slant.
        let mut view = CalibrationView::default();
        for i in 0..9 {
            view.board.push(Point2::new(i as f64 * 30.0, 0.0));
            view.pixels.push(Point2::new(100.0 + i as f64 * 41.0, 200.0 + i as f64 * 3.0));
        }
        assert_eq!(session.add_correspondences(view), Err(ViewRejection::DegenerateHomography));

        // The same through a labelled detection.
        let pose = Isometry3::new(Vector3::new(-100.0, -70.0, 600.0), Vector3::new(0.2, 0.0, 0.0));
        let mut det = detection(&camera(), &board, &pose);
        det.corners.retain(|c| c.grid.is_some_and(|g| g.j == 2));
        assert_eq!(det.corners.len(), 9);
        assert_eq!(session.add_view(&det), Err(ViewRejection::DegenerateHomography));
        assert_eq!(session.view_count(), 0);
    }

    #[test]
    fn calibrate_requires_min_views() {
        let board = CheckerboardSpec::new(6, 8, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());
        let pose = Isometry3::new(Vector3::new(-100.0, -70.0, 600.0), Vector3::new(0.2, 0.0, 0.0));
        session.add_view(&detection(&camera(), &board, &pose)).expect("view");
        assert!(matches!(
            session.calibrate(),
            Err(CalibError::NotEnoughViews { need: 3, got: 1 })
        ));
    }

    #[test]
    fn remove_and_clear_views() {
        let board = CheckerboardSpec::new(6, 8, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());
        let cam = camera();
        let pa = Isometry3::new(Vector3::new(-100.0, -70.0, 600.0), Vector3::new(0.2, 0.0, 0.0));
        let pb = Isometry3::new(Vector3::new(-90.0, -80.0, 650.0), Vector3::new(0.0, 0.2, 0.0));
        let a = session.add_view(&detection(&cam, &board, &pa)).expect("view");
        let b = session.add_view(&detection(&cam, &board, &pb)).expect("view");
        assert_ne!(a, b);
        assert!(session.remove_view(a));
        assert!(!session.remove_view(a));
        assert_eq!(session.views()[0].id, b);
        session.clear();
        assert_eq!(session.view_count(), 0);
    }

    #[test]
    fn prune_is_noop_before_calibration() {
        let board = CheckerboardSpec::new(6, 8, 30.0);
        let mut session = CalibrationSession::new(board, [640, 480], CalibrationOptions::default());
        assert!(session.prune_views(0.0).is_empty());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: CalibrationOptions =
            serde_json::from_str(r#"{ "fix_k3": false, "min_views": 5 }"#).expect("parse");
        assert!(!opts.fix_k3);
        assert_eq!(opts.min_views, 5);
        assert_eq!(opts.min_corners_per_view, 8);
        assert!(opts.zero_skew);
    }
}
