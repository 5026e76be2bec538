use camera_calib_core::{estimate_homography, CameraModel, CameraModelError, TargetDetection};
use levenberg_marquardt::LeastSquaresProblem;
use log::debug;
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dyn, Isometry3, Matrix3, Point2, Point3, Vector3,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::lm::{self, numeric_jacobian, LmOptions};
use crate::planar_pose::pose_from_homography;
use crate::refine::{pose_from_params, pose_to_params, POSE_PARAMS};
use crate::{CalibrationView, CheckerboardSpec};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseOptions {
    pub min_points: usize,
    pub max_iterations: usize,
    pub ftol: f64,
}

impl Default for PoseOptions {
    fn default() -> Self {
        Self {
            min_points: 4,
            max_iterations: 50,
            ftol: 1e-12,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PoseError {
    #[error("invalid camera: {0}")]
    Camera(#[from] CameraModelError),
    #[error("{world} world points but {pixels} pixels")]
    LengthMismatch { world: usize, pixels: usize },
    #[error("need at least {need} points, got {got}")]
    TooFewPoints { need: usize, got: usize },
    #[error("points do not define a valid homography")]
    DegenerateHomography,
    #[error("homography does not decompose into a pose")]
    Decomposition,
    #[error("pose refinement failed")]
    Refinement,
}

/// Pose of the camera relative to a planar world reference (`Z = 0`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    pub world_to_camera: Isometry3<f64>,
    pub camera_position_world: Point3<f64>,
    /// Angle between the optical axis and the plane normal, degrees.
    pub tilt_deg: f64,
    /// Distance from the camera centre to the world origin.
    pub distance: f64,
    /// RMS reprojection error in pixels.
    pub rms: f64,
}

impl PoseResult {
    pub fn from_isometry(world_to_camera: Isometry3<f64>, rms: f64) -> Self {
        let camera_position_world = Point3::from(world_to_camera.inverse().translation.vector);
        // Optical axis in world coordinates is the third row of R.
        let axis_z = world_to_camera.rotation.inverse() * Vector3::z();
        let tilt_deg = axis_z.z.abs().clamp(0.0, 1.0).acos().to_degrees();
        Self {
            world_to_camera,
            camera_position_world,
            tilt_deg,
            distance: camera_position_world.coords.norm(),
            rms,
        }
    }
}

/// Estimates camera pose against a planar world reference for a calibrated
/// camera.
pub struct PoseEstimator {
    camera: CameraModel,
    options: PoseOptions,
}

struct PoseProblem<'a> {
    camera: &'a CameraModel,
    world: &'a [Point2<f64>],
    pixels: &'a [Point2<f64>],
    params: DVector<f64>,
}

impl PoseProblem<'_> {
    fn residuals_at(&self, params: &DVector<f64>) -> Option<DVector<f64>> {
        let pose = pose_from_params(params.as_slice());
        let mut r = DVector::zeros(2 * self.world.len());
        for (k, (w, px)) in self.world.iter().zip(self.pixels).enumerate() {
            let proj = self.camera.project_from(&pose, &Point3::new(w.x, w.y, 0.0))?;
            r[2 * k] = proj.x - px.x;
            r[2 * k + 1] = proj.y - px.y;
        }
        Some(r)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals_at(&self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        numeric_jacobian(|p| self.residuals_at(p), &self.params, 2 * self.world.len())
    }
}

impl PoseEstimator {
    pub fn new(camera: CameraModel) -> Result<Self, PoseError> {
        Self::with_options(camera, PoseOptions::default())
    }

    pub fn with_options(camera: CameraModel, options: PoseOptions) -> Result<Self, PoseError> {
        camera.validate()?;
        Ok(Self { camera, options })
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Pose from planar world points (`Z = 0`) and their observed pixels.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, world, pixels), fields(n = world.len()))
    )]
    pub fn estimate(
        &self,
        world: &[Point2<f64>],
        pixels: &[Point2<f64>],
    ) -> Result<PoseResult, PoseError> {
        if world.len() != pixels.len() {
            return Err(PoseError::LengthMismatch {
                world: world.len(),
                pixels: pixels.len(),
            });
        }
        let need = self.options.min_points.max(4);
        if world.len() < need {
            return Err(PoseError::TooFewPoints {
                need,
                got: world.len(),
            });
        }

        // Homography world -> normalized image plane, so K drops out.
        let normalized: Vec<Point2<f64>> = pixels
            .iter()
            .map(|p| Point2::from(self.camera.pixel_to_normalized(*p)))
            .collect();
        let h = estimate_homography(world, &normalized).ok_or(PoseError::DegenerateHomography)?;
        let init =
            pose_from_homography(&Matrix3::identity(), &h.h).ok_or(PoseError::Decomposition)?;

        let problem = PoseProblem {
            camera: &self.camera,
            world,
            pixels,
            params: DVector::from_row_slice(&pose_to_params(&init)),
        };
        let opts = LmOptions {
            max_iterations: self.options.max_iterations,
            ftol: self.options.ftol,
            ..LmOptions::default()
        };
        let (problem, report) = lm::minimize(problem, &opts).ok_or(PoseError::Refinement)?;
        let pose = pose_from_params(problem.params.as_slice());

        let rms = (2.0 * report.final_cost / world.len() as f64).sqrt();
        if !rms.is_finite() {
            return Err(PoseError::Refinement);
        }
        debug!(
            "pose: {} iterations, rms {:.4} px, converged {}",
            report.iterations, rms, report.converged
        );
        Ok(PoseResult::from_isometry(pose, rms))
    }

    /// Pose from a labelled checkerboard detection.
    pub fn estimate_from_detection(
        &self,
        detection: &TargetDetection,
        board: &CheckerboardSpec,
    ) -> Result<PoseResult, PoseError> {
        let view = CalibrationView::from_detection(detection, board);
        self.estimate(&view.board, &view.pixels)
    }

    /// Pixel where a world point appears; `None` behind the camera.
    pub fn world_to_pixel(&self, pose: &PoseResult, world: &Point3<f64>) -> Option<Point2<f64>> {
        self.camera.project_from(&pose.world_to_camera, world)
    }

    /// World plane point (`Z = 0`) seen at `pixel`.
    ///
    /// `None` when the viewing ray is parallel to the plane or points away
    /// from it.
    pub fn pixel_to_world(&self, pose: &PoseResult, pixel: Point2<f64>) -> Option<Point2<f64>> {
        self.camera.pixel_to_plane(&pose.world_to_camera, pixel)
    }
}
