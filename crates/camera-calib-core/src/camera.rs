//! Pinhole camera with Brown-Conrady lens distortion.
//!
//! Conventions:
//! - camera frame: +Z along the optical axis, +X right, +Y down;
//! - integer pixel coordinates address pixel centres;
//! - "normalized" coordinates are `(X/Z, Y/Z)` before distortion.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Number of fixed-point iterations used by [`BrownConrady::undistort`].
pub const DEFAULT_UNDISTORT_ITERS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read intrinsics from an upper-triangular K (normalised so `K[2,2] == 1`).
    pub fn from_k_matrix(k: &Matrix3<f64>) -> Option<Self> {
        let s = k[(2, 2)];
        if s.abs() < 1e-12 {
            return None;
        }
        let k = k / s;
        Some(Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        })
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Vector2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }
}

/// Brown-Conrady radial (k1, k2, k3) and tangential (p1, p2) distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    #[serde(default)]
    pub k3: f64,
}

impl BrownConrady {
    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    /// Coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    #[inline]
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    pub fn undistort(&self, d: Vector2<f64>) -> Vector2<f64> {
        self.undistort_with(d, DEFAULT_UNDISTORT_ITERS)
    }

    /// Invert [`BrownConrady::distort`] by fixed-point iteration.
    pub fn undistort_with(&self, d: Vector2<f64>, iters: usize) -> Vector2<f64> {
        if self.is_zero() {
            return d;
        }
        let mut x = d.x;
        let mut y = d.y;
        for _ in 0..iters {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (d.x - dx) / radial;
            y = (d.y - dy) / radial;
        }
        Vector2::new(x, y)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("invalid camera model: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Calibrated camera: intrinsics, distortion, and the image size they apply to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: BrownConrady,
    /// `[width, height]` in pixels.
    pub image_size: [u32; 2],
}

impl CameraModel {
    pub fn new(
        intrinsics: CameraIntrinsics,
        distortion: BrownConrady,
        image_size: [u32; 2],
    ) -> Self {
        Self {
            intrinsics,
            distortion,
            image_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.image_size[0]
    }

    pub fn height(&self) -> u32 {
        self.image_size[1]
    }

    /// Project a camera-frame point; `None` when it lies behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        Some(self.intrinsics.normalized_to_pixel(self.distortion.distort(n)))
    }

    /// Project a point given in a frame related to the camera by `cam_from_frame`.
    pub fn project_from(
        &self,
        cam_from_frame: &Isometry3<f64>,
        p: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        self.project(&(cam_from_frame * p))
    }

    /// Undistorted normalized coordinates of an observed (distorted) pixel.
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Vector2<f64> {
        self.distortion.undistort(self.intrinsics.pixel_to_normalized(p))
    }

    /// Pixel where `p` would appear under the same intrinsics without distortion.
    pub fn undistort_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        self.intrinsics
            .normalized_to_pixel(self.pixel_to_normalized(p))
    }

    /// Inverse of [`CameraModel::undistort_pixel`].
    pub fn distort_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        let n = self.intrinsics.pixel_to_normalized(p);
        self.intrinsics.normalized_to_pixel(self.distortion.distort(n))
    }

    /// Unit viewing ray through an observed pixel, in the camera frame.
    pub fn pixel_ray(&self, p: Point2<f64>) -> Vector3<f64> {
        let n = self.pixel_to_normalized(p);
        Vector3::new(n.x, n.y, 1.0).normalize()
    }

    /// Intersect the viewing ray of an observed pixel with the plane `Z = 0`
    /// of the frame related to the camera by `cam_from_plane`.
    ///
    /// Returns `None` when the ray is parallel to the plane or hits it behind
    /// the camera.
    pub fn pixel_to_plane(
        &self,
        cam_from_plane: &Isometry3<f64>,
        p: Point2<f64>,
    ) -> Option<Point2<f64>> {
        let plane_from_cam = cam_from_plane.inverse();
        let origin = plane_from_cam.translation.vector;
        let dir = plane_from_cam.rotation * self.pixel_ray(p);
        if dir.z.abs() < 1e-12 {
            return None;
        }
        let s = -origin.z / dir.z;
        if s <= 0.0 {
            return None;
        }
        let hit = origin + dir * s;
        Some(Point2::new(hit.x, hit.y))
    }

    pub fn validate(&self) -> Result<(), CameraModelError> {
        let k = &self.intrinsics;
        if !(k.fx.is_finite() && k.fy.is_finite() && k.fx > 0.0 && k.fy > 0.0) {
            return Err(CameraModelError::Invalid("focal lengths must be positive"));
        }
        if !(k.cx.is_finite() && k.cy.is_finite() && k.skew.is_finite()) {
            return Err(CameraModelError::Invalid("principal point must be finite"));
        }
        if self.image_size[0] == 0 || self.image_size[1] == 0 {
            return Err(CameraModelError::Invalid("image size must be non-zero"));
        }
        if !self.distortion.to_array().iter().all(|c| c.is_finite()) {
            return Err(CameraModelError::Invalid("distortion must be finite"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, CameraModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, CameraModelError> {
        let model: Self = serde_json::from_str(s)?;
        model.validate()?;
        Ok(model)
    }
}
