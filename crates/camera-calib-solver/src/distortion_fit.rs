//! Linear Brown-Conrady initialisation from homography residuals.
//!
//! With intrinsics `K` and a board-to-image homography `H` fitted to the
//! distorted corners, `K^-1 H X` is taken as the ideal (undistorted)
//! normalized point and `K^-1 x` as the observed one. Their difference is
//! linear in the distortion coefficients, so one least-squares solve gives a
//! starting point for the non-linear refinement.

use camera_calib_core::{BrownConrady, CameraIntrinsics};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Vector3};

use crate::CalibrationView;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum DistortionFitError {
    #[error("need at least {need} points, got {got}")]
    NotEnoughPoints { need: usize, got: usize },
    #[error("intrinsics are not invertible")]
    InvalidIntrinsics,
    #[error("distortion system is singular")]
    Singular,
}

/// Which coefficients take part in the linear fit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistortionFitOptions {
    pub fix_k3: bool,
    pub fix_tangential: bool,
}

impl DistortionFitOptions {
    fn num_unknowns(&self) -> usize {
        2 + usize::from(!self.fix_k3) + if self.fix_tangential { 0 } else { 2 }
    }
}

/// Fit distortion coefficients to all views at once.
///
/// `views` pairs each observation with its board-to-image homography.
pub fn fit_distortion(
    intrinsics: &CameraIntrinsics,
    views: &[(Matrix3<f64>, &CalibrationView)],
    opts: DistortionFitOptions,
) -> Result<BrownConrady, DistortionFitError> {
    let k_inv = intrinsics
        .k_matrix()
        .try_inverse()
        .ok_or(DistortionFitError::InvalidIntrinsics)?;

    let n_unknowns = opts.num_unknowns();
    let total: usize = views.iter().map(|(_, v)| v.len()).sum();
    if 2 * total < n_unknowns {
        return Err(DistortionFitError::NotEnoughPoints {
            need: n_unknowns.div_ceil(2),
            got: total,
        });
    }

    let mut a = DMatrix::<f64>::zeros(2 * total, n_unknowns);
    let mut b = DVector::<f64>::zeros(2 * total);
    let mut row = 0;

    for (h, view) in views {
        let ideal_from_board = k_inv * h;
        for (board, pixel) in view.board.iter().zip(&view.pixels) {
            let Some(ideal) = dehomogenize(ideal_from_board * Vector3::new(board.x, board.y, 1.0))
            else {
                continue;
            };
            let Some(observed) = dehomogenize(k_inv * Vector3::new(pixel.x, pixel.y, 1.0)) else {
                continue;
            };

            let (x, y) = (ideal.x, ideal.y);
            let r2 = x * x + y * y;
            let mut col = 0;
            let mut put = |ax: f64, ay: f64, a: &mut DMatrix<f64>| {
                a[(row, col)] = ax;
                a[(row + 1, col)] = ay;
                col += 1;
            };
            put(x * r2, y * r2, &mut a);
            put(x * r2 * r2, y * r2 * r2, &mut a);
            if !opts.fix_k3 {
                put(x * r2 * r2 * r2, y * r2 * r2 * r2, &mut a);
            }
            if !opts.fix_tangential {
                put(2.0 * x * y, r2 + 2.0 * y * y, &mut a);
                put(r2 + 2.0 * x * x, 2.0 * x * y, &mut a);
            }

            b[row] = observed.x - x;
            b[row + 1] = observed.y - y;
            row += 2;
        }
    }

    let a = a.rows(0, row).into_owned();
    let b = b.rows(0, row).into_owned();
    let sol = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|_| DistortionFitError::Singular)?;
    if !sol.iter().all(|v| v.is_finite()) {
        return Err(DistortionFitError::Singular);
    }

    let mut it = sol.iter().copied();
    let mut next = || it.next().unwrap_or(0.0);
    let k1 = next();
    let k2 = next();
    let k3 = if opts.fix_k3 { 0.0 } else { next() };
    let (p1, p2) = if opts.fix_tangential {
        (0.0, 0.0)
    } else {
        (next(), next())
    };

    Ok(BrownConrady { k1, k2, p1, p2, k3 })
}

fn dehomogenize(v: Vector3<f64>) -> Option<Point2<f64>> {
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}
