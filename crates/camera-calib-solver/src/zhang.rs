//! Closed-form intrinsics from plane homographies (Zhang, PAMI 2000).
//!
//! Each homography `H = K [r1 r2 t]` gives two linear constraints on the
//! symmetric matrix `B = K^-T K^-1`:
//!
//! ```text
//! h1^T B h2 = 0
//! h1^T B h1 - h2^T B h2 = 0
//! ```
//!
//! `B` is recovered as the null vector of the stacked constraints and `K` is
//! read off in closed form. Pixel coordinates are pre-conditioned with an
//! affine normalisation so the system stays well scaled.

use camera_calib_core::CameraIntrinsics;
use nalgebra::{DMatrix, Matrix3, SVector};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum ZhangError {
    #[error("need at least {need} homographies, got {got}")]
    NotEnoughViews { need: usize, got: usize },
    #[error("svd failed while solving for the image of the absolute conic")]
    SvdFailed,
    #[error("degenerate view configuration (views too similar or fronto-parallel)")]
    Degenerate,
}

/// Build the 6-vector `v_ij(H)` in Zhang's notation.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);

    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Affine pixel normalisation for an image of the given size.
fn conditioning(image_size: [u32; 2]) -> Matrix3<f64> {
    let w = image_size[0].max(1) as f64;
    let h = image_size[1].max(1) as f64;
    let s = 2.0 / w.max(h);
    Matrix3::new(s, 0.0, -s * w * 0.5, 0.0, s, -s * h * 0.5, 0.0, 0.0, 1.0)
}

/// Estimate `K` from board-to-image homographies.
///
/// With `zero_skew` the skew term is constrained to zero inside the linear
/// system, which also makes two views sufficient.
pub fn estimate_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: [u32; 2],
    zero_skew: bool,
) -> Result<CameraIntrinsics, ZhangError> {
    let need = if zero_skew { 2 } else { 3 };
    if homographies.len() < need {
        return Err(ZhangError::NotEnoughViews {
            need,
            got: homographies.len(),
        });
    }

    let n = conditioning(image_size);
    let conditioned: Vec<Matrix3<f64>> = homographies
        .iter()
        .map(|h| {
            let hn = n * h;
            hn / hn.norm()
        })
        .collect();

    let b = solve_b(&conditioned, zero_skew)?;
    let k_norm = k_from_b(&b)?;
    let n_inv = n.try_inverse().ok_or(ZhangError::Degenerate)?;
    let mut intr = CameraIntrinsics::from_k_matrix(&(n_inv * k_norm.k_matrix()))
        .ok_or(ZhangError::Degenerate)?;
    if zero_skew {
        intr.skew = 0.0;
    }
    Ok(intr)
}

fn solve_b(hs: &[Matrix3<f64>], zero_skew: bool) -> Result<[f64; 6], ZhangError> {
    let m = hs.len();
    let cols: &[usize] = if zero_skew {
        &[0, 2, 3, 4, 5]
    } else {
        &[0, 1, 2, 3, 4, 5]
    };
    // Padding keeps the thin SVD square so the null vector is always present.
    let mut vmtx = DMatrix::<f64>::zeros((2 * m).max(cols.len()), cols.len());

    for (k, h) in hs.iter().enumerate() {
        let v12 = v_ij(h, 0, 1);
        let v11_22 = v_ij(h, 0, 0) - v_ij(h, 1, 1);
        for (c, &src) in cols.iter().enumerate() {
            vmtx[(2 * k, c)] = v12[src];
            vmtx[(2 * k + 1, c)] = v11_22[src];
        }
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(ZhangError::SvdFailed)?;
    let sv = &svd.singular_values;
    let (min_idx, _) = sv
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(ZhangError::SvdFailed)?;

    // A second near-zero singular value means the null space is not unique.
    let max_sv = sv.max();
    let second = sv
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != min_idx)
        .map(|(_, v)| *v)
        .fold(f64::INFINITY, f64::min);
    if max_sv <= 0.0 || second / max_sv < 1e-9 {
        return Err(ZhangError::Degenerate);
    }

    let row = v_t.row(min_idx);
    let mut b = [0.0; 6];
    for (c, &dst) in cols.iter().enumerate() {
        b[dst] = row[c];
    }
    Ok(b)
}

fn k_from_b(b: &[f64; 6]) -> Result<CameraIntrinsics, ZhangError> {
    // B is positive definite; fix the arbitrary sign of the null vector.
    let sign = if b[0] < 0.0 { -1.0 } else { 1.0 };
    let [b11, b12, b22, b13, b23, b33] = b.map(|v| v * sign);

    let denom = b11 * b22 - b12 * b12;
    if b11 <= 0.0 || denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) {
        return Err(ZhangError::Degenerate);
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 || denom <= 0.0 {
        return Err(ZhangError::Degenerate);
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let intr = CameraIntrinsics {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
        skew: gamma,
    };
    if [intr.fx, intr.fy, intr.cx, intr.cy, intr.skew]
        .iter()
        .all(|v| v.is_finite())
    {
        Ok(intr)
    } else {
        Err(ZhangError::Degenerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Vector3};

    fn kmtx() -> Matrix3<f64> {
        CameraIntrinsics::new(900.0, 880.0, 640.0, 360.0).k_matrix()
    }

    fn synthetic_homography(
        k: &Matrix3<f64>,
        axisangle: Vector3<f64>,
        t: Vector3<f64>,
    ) -> Matrix3<f64> {
        let iso = Isometry3::new(t, axisangle);
        let r = iso.rotation.to_rotation_matrix();
        let mut h = Matrix3::zeros();
        h.set_column(0, &(k * r.matrix().column(0)));
        h.set_column(1, &(k * r.matrix().column(1)));
        h.set_column(2, &(k * t));
        h
    }

    fn views() -> Vec<Matrix3<f64>> {
        let k = kmtx();
        vec![
            synthetic_homography(
                &k,
                Vector3::new(0.3, 0.0, 0.05),
                Vector3::new(0.1, -0.05, 1.0),
            ),
            synthetic_homography(
                &k,
                Vector3::new(-0.05, 0.35, -0.1),
                Vector3::new(-0.05, 0.1, 1.2),
            ),
            synthetic_homography(
                &k,
                Vector3::new(0.2, -0.25, 0.0),
                Vector3::new(0.0, 0.0, 0.9),
            ),
        ]
    }

    #[test]
    fn recovers_intrinsics_from_three_views() {
        let intr = estimate_intrinsics(&views(), [1280, 720], false).expect("intrinsics");
        assert!((intr.fx - 900.0).abs() < 1e-2, "fx {}", intr.fx);
        assert!((intr.fy - 880.0).abs() < 1e-2, "fy {}", intr.fy);
        assert!((intr.cx - 640.0).abs() < 1e-2, "cx {}", intr.cx);
        assert!((intr.cy - 360.0).abs() < 1e-2, "cy {}", intr.cy);
        assert!(intr.skew.abs() < 1e-3);
    }

    #[test]
    fn zero_skew_works_with_two_views() {
        let hs = views();
        let intr = estimate_intrinsics(&hs[..2], [1280, 720], true).expect("intrinsics");
        assert!((intr.fx - 900.0).abs() < 1e-2);
        assert!((intr.cy - 360.0).abs() < 1e-2);
        assert_eq!(intr.skew, 0.0);
    }

    #[test]
    fn too_few_views_is_an_error() {
        let hs = views();
        assert_eq!(
            estimate_intrinsics(&hs[..2], [1280, 720], false),
            Err(ZhangError::NotEnoughViews { need: 3, got: 2 })
        );
    }

    #[test]
    fn fronto_parallel_views_are_degenerate() {
        let k = kmtx();
        let hs: Vec<_> = (0..4)
            .map(|i| {
                synthetic_homography(
                    &k,
                    Vector3::zeros(),
                    Vector3::new(0.05 * i as f64, 0.0, 1.0 + 0.1 * i as f64),
                )
            })
            .collect();
        assert!(estimate_intrinsics(&hs, [1280, 720], false).is_err());
    }
}
