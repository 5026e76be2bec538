//! Joint non-linear refinement of intrinsics, distortion and view poses.
//!
//! Parameter layout: the free subset of
//! `[fx, fy, cx, cy, skew, k1, k2, p1, p2, k3]` followed by six pose
//! parameters per view (`axis-angle`, `translation`). Each view's residuals
//! only depend on the intrinsic block and its own pose block, which the
//! Jacobian assembly exploits.

use camera_calib_core::{BrownConrady, CameraIntrinsics, CameraModel};
use levenberg_marquardt::LeastSquaresProblem;
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Isometry3, Point3, Vector3};

use crate::lm::{self, diff_step, LmOptions, LmReport};
use crate::CalibrationView;

const NUM_INTRINSICS: usize = 10;
const FX: usize = 0;
const FY: usize = 1;
const SKEW: usize = 4;
const P1: usize = 7;
const P2: usize = 8;
const K3: usize = 9;
pub(crate) const POSE_PARAMS: usize = 6;

/// Parameters held constant during refinement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefineFlags {
    pub zero_skew: bool,
    pub fix_k3: bool,
    pub fix_tangential: bool,
    pub fix_aspect_ratio: bool,
}

#[derive(Clone, Debug)]
pub struct RefineOutput {
    pub camera: CameraModel,
    pub poses: Vec<Isometry3<f64>>,
    pub report: LmReport,
}

pub(crate) fn pose_to_params(pose: &Isometry3<f64>) -> [f64; POSE_PARAMS] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub(crate) fn pose_from_params(p: &[f64]) -> Isometry3<f64> {
    Isometry3::new(
        Vector3::new(p[3], p[4], p[5]),
        Vector3::new(p[0], p[1], p[2]),
    )
}

fn intrinsics_to_array(cam: &CameraModel) -> [f64; NUM_INTRINSICS] {
    let k = &cam.intrinsics;
    let d = &cam.distortion;
    [k.fx, k.fy, k.cx, k.cy, k.skew, d.k1, d.k2, d.p1, d.p2, d.k3]
}

fn camera_from_array(a: &[f64; NUM_INTRINSICS], image_size: [u32; 2]) -> CameraModel {
    CameraModel::new(
        CameraIntrinsics {
            fx: a[0],
            fy: a[1],
            cx: a[2],
            cy: a[3],
            skew: a[4],
        },
        BrownConrady {
            k1: a[5],
            k2: a[6],
            p1: a[7],
            p2: a[8],
            k3: a[9],
        },
        image_size,
    )
}

/// Pixel residuals `projected - observed`, two per point.
fn view_residuals(
    camera: &CameraModel,
    pose: &Isometry3<f64>,
    view: &CalibrationView,
    out: &mut [f64],
) -> Option<()> {
    for (k, (b, px)) in view.board.iter().zip(&view.pixels).enumerate() {
        let proj = camera.project_from(pose, &Point3::new(b.x, b.y, 0.0))?;
        out[2 * k] = proj.x - px.x;
        out[2 * k + 1] = proj.y - px.y;
    }
    Some(())
}

/// Euclidean reprojection error of every point of `view`, in pixels.
pub fn reprojection_errors(
    camera: &CameraModel,
    pose: &Isometry3<f64>,
    view: &CalibrationView,
) -> Option<Vec<f64>> {
    let mut r = vec![0.0; 2 * view.len()];
    view_residuals(camera, pose, view, &mut r)?;
    Some(r.chunks_exact(2).map(|c| c[0].hypot(c[1])).collect())
}

struct CalibrationProblem<'a> {
    views: &'a [CalibrationView],
    image_size: [u32; 2],
    template: [f64; NUM_INTRINSICS],
    free: Vec<usize>,
    aspect: Option<f64>,
    offsets: Vec<usize>,
    num_residuals: usize,
    params: DVector<f64>,
}

impl<'a> CalibrationProblem<'a> {
    fn new(views: &'a [CalibrationView], camera: &CameraModel, flags: RefineFlags) -> Self {
        let mut template = intrinsics_to_array(camera);
        let mut fixed = [false; NUM_INTRINSICS];
        if flags.zero_skew {
            fixed[SKEW] = true;
            template[SKEW] = 0.0;
        }
        if flags.fix_k3 {
            fixed[K3] = true;
        }
        if flags.fix_tangential {
            fixed[P1] = true;
            fixed[P2] = true;
        }
        let aspect = if flags.fix_aspect_ratio && template[FX].abs() > 0.0 {
            fixed[FY] = true;
            Some(template[FY] / template[FX])
        } else {
            None
        };
        let free = (0..NUM_INTRINSICS).filter(|&i| !fixed[i]).collect();

        let mut offsets = Vec::with_capacity(views.len());
        let mut acc = 0;
        for v in views {
            offsets.push(acc);
            acc += 2 * v.len();
        }

        Self {
            views,
            image_size: camera.image_size,
            template,
            free,
            aspect,
            offsets,
            num_residuals: acc,
            params: DVector::zeros(0),
        }
    }

    fn intrinsic_block(&self) -> usize {
        self.free.len()
    }

    fn num_params(&self) -> usize {
        self.intrinsic_block() + POSE_PARAMS * self.views.len()
    }

    fn pack(&self, camera: &CameraModel, poses: &[Isometry3<f64>]) -> DVector<f64> {
        let full = intrinsics_to_array(camera);
        let mut p = DVector::zeros(self.num_params());
        for (k, &i) in self.free.iter().enumerate() {
            p[k] = full[i];
        }
        for (v, pose) in poses.iter().enumerate() {
            let base = self.intrinsic_block() + POSE_PARAMS * v;
            p.rows_mut(base, POSE_PARAMS)
                .copy_from_slice(&pose_to_params(pose));
        }
        p
    }

    fn camera(&self, p: &DVector<f64>) -> CameraModel {
        let mut full = self.template;
        for (k, &i) in self.free.iter().enumerate() {
            full[i] = p[k];
        }
        if let Some(aspect) = self.aspect {
            full[FY] = full[FX] * aspect;
        }
        camera_from_array(&full, self.image_size)
    }

    fn pose(&self, p: &DVector<f64>, view: usize) -> Isometry3<f64> {
        let base = self.intrinsic_block() + POSE_PARAMS * view;
        pose_from_params(&p.as_slice()[base..base + POSE_PARAMS])
    }

    fn unpack(&self, p: &DVector<f64>) -> (CameraModel, Vec<Isometry3<f64>>) {
        let poses = (0..self.views.len()).map(|v| self.pose(p, v)).collect();
        (self.camera(p), poses)
    }

    fn single_view_residuals(
        &self,
        p: &DVector<f64>,
        view: usize,
        out: &mut [f64],
    ) -> Option<()> {
        view_residuals(&self.camera(p), &self.pose(p, view), &self.views[view], out)
    }

    fn residuals_at(&self, p: &DVector<f64>) -> Option<DVector<f64>> {
        let camera = self.camera(p);
        let mut r = DVector::zeros(self.num_residuals);
        for (v, view) in self.views.iter().enumerate() {
            let rows = 2 * view.len();
            let out = &mut r.as_mut_slice()[self.offsets[v]..self.offsets[v] + rows];
            view_residuals(&camera, &self.pose(p, v), view, out)?;
        }
        Some(r)
    }

    /// Central-difference Jacobian, filled block by block.
    fn jacobian_at(&self, p: &DVector<f64>) -> Option<DMatrix<f64>> {
        let mut j = DMatrix::zeros(self.num_residuals, self.num_params());
        let mut q = p.clone();

        // Intrinsic columns touch every residual.
        for c in 0..self.intrinsic_block() {
            let h = diff_step(p[c]);
            q[c] = p[c] + h;
            let plus = self.residuals_at(&q)?;
            q[c] = p[c] - h;
            let minus = self.residuals_at(&q)?;
            q[c] = p[c];
            j.set_column(c, &((plus - minus) / (2.0 * h)));
        }

        // Pose columns only touch their own view.
        for (v, view) in self.views.iter().enumerate() {
            let rows = 2 * view.len();
            let row0 = self.offsets[v];
            let mut plus = vec![0.0; rows];
            let mut minus = vec![0.0; rows];
            for k in 0..POSE_PARAMS {
                let c = self.intrinsic_block() + POSE_PARAMS * v + k;
                let h = diff_step(p[c]);
                q[c] = p[c] + h;
                self.single_view_residuals(&q, v, &mut plus)?;
                q[c] = p[c] - h;
                self.single_view_residuals(&q, v, &mut minus)?;
                q[c] = p[c];
                for row in 0..rows {
                    j[(row0 + row, c)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            }
        }
        Some(j)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CalibrationProblem<'_> {
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
        self.jacobian_at(&self.params)
    }
}

/// Refine `camera` and `poses` (one per view) by minimising pixel
/// reprojection error over all views.
pub fn refine_calibration(
    camera: &CameraModel,
    poses: &[Isometry3<f64>],
    views: &[CalibrationView],
    flags: RefineFlags,
    opts: &LmOptions,
) -> Option<RefineOutput> {
    if poses.len() != views.len() {
        return None;
    }
    let mut problem = CalibrationProblem::new(views, camera, flags);
    problem.params = problem.pack(camera, poses);
    let (problem, report) = lm::minimize(problem, opts)?;
    debug!(
        "refinement: {} iterations, cost {:.4e} -> {:.4e}, converged {}",
        report.iterations, report.initial_cost, report.final_cost, report.converged
    );

    let (camera, poses) = problem.unpack(&problem.params);
    Some(RefineOutput {
        camera,
        poses,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn truth() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics::new(820.0, 815.0, 330.0, 245.0),
            BrownConrady {
                k1: -0.15,
                k2: 0.04,
                ..BrownConrady::default()
            },
            [640, 480],
        )
    }

    fn views(cam: &CameraModel, poses: &[Isometry3<f64>]) -> Vec<CalibrationView> {
        poses
            .iter()
            .map(|pose| {
                let mut v = CalibrationView::default();
                for j in 0..6 {
                    for i in 0..8 {
                        let b = Point2::new(i as f64 * 0.025, j as f64 * 0.025);
                        let px = cam
                            .project_from(pose, &Point3::new(b.x, b.y, 0.0))
                            .expect("visible");
                        v.board.push(b);
                        v.pixels.push(px);
                    }
                }
                v
            })
            .collect()
    }

    fn poses() -> Vec<Isometry3<f64>> {
        vec![
            Isometry3::new(Vector3::new(-0.09, -0.06, 0.5), Vector3::new(0.2, 0.0, 0.0)),
            Isometry3::new(Vector3::new(-0.08, -0.07, 0.45), Vector3::new(0.0, -0.25, 0.1)),
            Isometry3::new(Vector3::new(-0.1, -0.05, 0.55), Vector3::new(-0.15, 0.2, -0.05)),
            Isometry3::new(Vector3::new(-0.07, -0.08, 0.4), Vector3::new(0.1, 0.3, 0.0)),
        ]
    }

    #[test]
    fn pose_params_round_trip() {
        let pose = Isometry3::new(Vector3::new(1.0, -2.0, 3.0), Vector3::new(0.3, -0.2, 0.1));
        let back = pose_from_params(&pose_to_params(&pose));
        assert!((back.translation.vector - pose.translation.vector).norm() < 1e-12);
        assert!(back.rotation.angle_to(&pose.rotation) < 1e-12);
    }

    #[test]
    fn converges_from_perturbed_start() {
        let cam = truth();
        let gt = poses();
        let obs = views(&cam, &gt);

        let mut start = cam;
        start.intrinsics.fx *= 1.03;
        start.intrinsics.fy *= 0.98;
        start.intrinsics.cx += 6.0;
        start.distortion = BrownConrady::default();
        let init: Vec<_> = gt
            .iter()
            .map(|p| {
                let mut q = *p;
                q.translation.vector.z *= 1.02;
                q
            })
            .collect();

        let flags = RefineFlags {
            zero_skew: true,
            fix_k3: true,
            fix_tangential: true,
            fix_aspect_ratio: false,
        };
        let out = refine_calibration(&start, &init, &obs, flags, &LmOptions::default())
            .expect("refine");
        assert!(out.report.final_cost < out.report.initial_cost);
        assert!((out.camera.intrinsics.fx - 820.0).abs() < 0.1);
        assert!((out.camera.intrinsics.cy - 245.0).abs() < 0.1);
        assert!((out.camera.distortion.k1 + 0.15).abs() < 1e-3);
        assert_eq!(out.camera.intrinsics.skew, 0.0);
        assert_eq!(out.camera.distortion.p1, 0.0);
    }

    #[test]
    fn fixed_aspect_ratio_is_preserved() {
        let cam = truth();
        let gt = poses();
        let obs = views(&cam, &gt);

        let mut start = cam;
        start.intrinsics.fx = 800.0;
        start.intrinsics.fy = 800.0;
        let flags = RefineFlags {
            fix_aspect_ratio: true,
            ..RefineFlags::default()
        };
        let out =
            refine_calibration(&start, &gt, &obs, flags, &LmOptions::default()).expect("refine");
        let k = out.camera.intrinsics;
        assert!((k.fy / k.fx - 1.0).abs() < 1e-12);
    }

    #[test]
    fn block_jacobian_matches_dense_differences() {
        let cam = truth();
        let gt = &poses()[..2];
        let obs = views(&cam, gt);
        let mut problem = CalibrationProblem::new(&obs, &cam, RefineFlags::default());
        problem.params = problem.pack(&cam, gt);

        let block = problem.jacobian().expect("jacobian");
        let dense = lm::numeric_jacobian(
            |p| problem.residuals_at(p),
            &problem.params,
            problem.num_residuals,
        )
        .expect("jacobian");
        assert_eq!(block.shape(), (2 * 48 * 2, 10 + 2 * POSE_PARAMS));
        assert!((block - dense).amax() < 1e-9);
    }

    #[test]
    fn reprojection_errors_vanish_at_truth() {
        let cam = truth();
        let gt = poses();
        let obs = views(&cam, &gt);
        let errs = reprojection_errors(&cam, &gt[0], &obs[0]).expect("visible");
        assert_eq!(errs.len(), 48);
        assert!(errs.iter().all(|e| *e < 1e-9));
    }
}
