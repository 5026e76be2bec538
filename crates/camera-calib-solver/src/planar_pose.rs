//! Pose of a plane from its homography.
//!
//! For a plane `Z = 0` seen by a camera with intrinsics `K`,
//! `H ~ K [r1 r2 t]`. Removing `K`, normalising by `|r1|` and projecting the
//! rotation onto SO(3) gives `cam_from_plane`.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Decompose `h` (plane to image) into `cam_from_plane`.
///
/// Returns `None` for a singular `k` or a degenerate homography. The sign of
/// `H` is chosen so that the plane lies in front of the camera.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let k_inv = k.try_inverse()?;
    let a = k_inv * h;

    let a1: Vector3<f64> = a.column(0).into_owned();
    let a2: Vector3<f64> = a.column(1).into_owned();
    let a3: Vector3<f64> = a.column(2).into_owned();

    let n1 = a1.norm();
    let n2 = a2.norm();
    if n1 < 1e-12 || n2 < 1e-12 {
        return None;
    }
    // Scale by the geometric mean of both column norms.
    let mut lambda = 1.0 / (n1 * n2).sqrt();
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = a1 * lambda;
    let r2 = a2 * lambda;
    let r3 = r1.cross(&r2);
    let t = a3 * lambda;

    let r_approx = Matrix3::from_columns(&[r1, r2, r3]);
    let rot = nearest_rotation(&r_approx)?;
    if !t.iter().all(|v| v.is_finite()) {
        return None;
    }

    Some(Isometry3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rot),
    ))
}

/// Closest rotation in the Frobenius sense (`U V^T` from the SVD).
pub fn nearest_rotation(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use camera_calib_core::CameraIntrinsics;

    fn homography_of(k: &Matrix3<f64>, pose: &Isometry3<f64>) -> Matrix3<f64> {
        let r = pose.rotation.to_rotation_matrix();
        let m = Matrix3::from_columns(&[
            r.matrix().column(0).into_owned(),
            r.matrix().column(1).into_owned(),
            pose.translation.vector,
        ]);
        k * m
    }

    #[test]
    fn recovers_pose_up_to_homography_scale() {
        let k = CameraIntrinsics::new(700.0, 710.0, 320.0, 240.0).k_matrix();
        let pose = Isometry3::new(Vector3::new(0.1, -0.2, 1.5), Vector3::new(0.25, -0.1, 0.3));
        for scale in [1.0, -3.5, 0.01] {
            let h = homography_of(&k, &pose) * scale;
            let est = pose_from_homography(&k, &h).expect("pose");
            assert_relative_eq!(
                est.translation.vector,
                pose.translation.vector,
                epsilon = 1e-9
            );
            assert!(est.rotation.angle_to(&pose.rotation) < 1e-9);
        }
    }

    #[test]
    fn degenerate_homography_yields_none() {
        let k = Matrix3::identity();
        assert!(pose_from_homography(&k, &Matrix3::zeros()).is_none());
    }

    #[test]
    fn nearest_rotation_is_orthonormal() {
        let m = Matrix3::new(1.0, 0.1, 0.0, -0.05, 0.98, 0.02, 0.01, 0.0, 1.03);
        let r = nearest_rotation(&m).expect("svd");
        assert_relative_eq!(
            r.matrix() * r.matrix().transpose(),
            Matrix3::identity(),
            epsilon = 1e-12
        );
        assert!((r.matrix().determinant() - 1.0).abs() < 1e-12);
    }
}
