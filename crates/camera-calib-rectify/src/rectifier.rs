use camera_calib_core::{CameraModel, CameraModelError, GrayImage, GrayImageView};
use log::{debug, warn};
use nalgebra::{Isometry3, Point2, Point3};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::map::RectifyMap;
use crate::params::{RectificationMode, RectifyOptions, WorldRect};

#[derive(thiserror::Error, Debug)]
pub enum RectifyError {
    #[error("invalid camera: {0}")]
    Camera(#[from] CameraModelError),
    #[error("{0:?} rectification needs a camera pose")]
    MissingPose(RectificationMode),
    #[error("align rectification needs a world rectangle")]
    MissingRect,
    #[error("invalid world rectangle {0:?}")]
    InvalidRect(WorldRect),
    #[error("invalid scale {0} (world units per pixel must be positive)")]
    InvalidScale(f64),
    #[error("world plane is not visible from the camera")]
    PlaneNotVisible,
    #[error("output of {width}x{height} exceeds the {max} pixel limit")]
    OutputTooLarge { width: u64, height: u64, max: u32 },
}

/// Mapping between output pixels and the world plane (Untilt / Align).
#[derive(Clone, Copy, Debug, PartialEq)]
struct PlaneGrid {
    /// World point of output pixel (0, 0).
    origin: Point2<f64>,
    /// World units per output pixel.
    scale: f64,
}

impl PlaneGrid {
    fn to_world(self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.origin.x + p.x * self.scale,
            self.origin.y + p.y * self.scale,
        )
    }

    fn to_rect(self, w: Point2<f64>) -> Point2<f64> {
        Point2::new(
            (w.x - self.origin.x) / self.scale,
            (w.y - self.origin.y) / self.scale,
        )
    }
}

/// Precomputed rectification of images from one calibrated camera.
pub struct Rectifier {
    camera: CameraModel,
    mode: RectificationMode,
    pose: Option<Isometry3<f64>>,
    grid: Option<PlaneGrid>,
    fill: u8,
    map: RectifyMap,
}

impl Rectifier {
    /// `pose` is `cam_from_world` for the world plane `Z = 0`; required for
    /// Untilt and Align, ignored for Undistort.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(mode = ?mode))
    )]
    pub fn new(
        camera: CameraModel,
        mode: RectificationMode,
        pose: Option<Isometry3<f64>>,
        options: &RectifyOptions,
    ) -> Result<Self, RectifyError> {
        camera.validate()?;
        if let Some(s) = options.scale {
            if !(s.is_finite() && s > 0.0) {
                return Err(RectifyError::InvalidScale(s));
            }
        }

        let (pose, grid, size) = match mode {
            RectificationMode::Undistort => (None, None, camera.image_size),
            RectificationMode::Untilt => {
                let pose = pose.ok_or(RectifyError::MissingPose(mode))?;
                let (grid, size) = untilt_grid(&camera, &pose, options)?;
                (Some(pose), Some(grid), size)
            }
            RectificationMode::Align => {
                let pose = pose.ok_or(RectifyError::MissingPose(mode))?;
                let rect = options.rect.ok_or(RectifyError::MissingRect)?;
                if !rect.is_valid() {
                    return Err(RectifyError::InvalidRect(rect));
                }
                let scale = match options.scale {
                    Some(s) => s,
                    None => centre_scale(&camera, &pose)?,
                };
                let width = (rect.width / scale).round().max(1.0);
                let height = (rect.height / scale).round().max(1.0);
                let size = checked_size(width, height, options.max_output_size)?;
                let grid = PlaneGrid {
                    origin: Point2::new(rect.x, rect.y),
                    scale,
                };
                (Some(pose), Some(grid), size)
            }
        };

        let mut rectifier = Self {
            camera,
            mode,
            pose,
            grid,
            fill: options.fill,
            map: RectifyMap {
                width: 0,
                height: 0,
                xs: Vec::new(),
                ys: Vec::new(),
            },
        };
        let (w, h) = (camera.width() as f64, camera.height() as f64);
        let map = RectifyMap::build(size[0] as usize, size[1] as usize, |p| {
            rectifier
                .rect_to_img(p)
                .filter(|s| s.x >= -0.5 && s.y >= -0.5 && s.x <= w - 0.5 && s.y <= h - 0.5)
        });
        rectifier.map = map;

        let valid = rectifier.map.valid_fraction();
        debug!(
            "{:?} rectifier {}x{}, {:.1}% of output covered",
            mode,
            size[0],
            size[1],
            100.0 * valid
        );
        if valid == 0.0 {
            warn!("{mode:?} rectification maps no output pixel into the image");
        }
        Ok(rectifier)
    }

    pub fn mode(&self) -> RectificationMode {
        self.mode
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Output `[width, height]`.
    pub fn output_size(&self) -> [u32; 2] {
        [self.map.width as u32, self.map.height as u32]
    }

    pub fn map(&self) -> &RectifyMap {
        &self.map
    }

    /// World units per output pixel (Untilt / Align).
    pub fn scale(&self) -> Option<f64> {
        self.grid.map(|g| g.scale)
    }

    pub fn apply(&self, src: &GrayImageView<'_>) -> GrayImage {
        if [src.width as u32, src.height as u32] != self.camera.image_size {
            warn!(
                "rectifying a {}x{} image with a {}x{} camera model",
                src.width,
                src.height,
                self.camera.width(),
                self.camera.height()
            );
        }
        self.map.remap(src, self.fill)
    }

    /// World plane point of an output pixel; `None` for Undistort.
    pub fn rect_to_world(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        self.grid.map(|g| g.to_world(p))
    }

    /// Output pixel of a world plane point; `None` for Undistort.
    pub fn world_to_rect(&self, w: Point2<f64>) -> Option<Point2<f64>> {
        self.grid.map(|g| g.to_rect(w))
    }

    /// Source image pixel seen at output pixel `p`, whether or not it lies
    /// inside the image.
    pub fn rect_to_img(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        match (self.grid, self.pose) {
            (Some(grid), Some(pose)) => {
                let w = grid.to_world(p);
                self.camera.project_from(&pose, &Point3::new(w.x, w.y, 0.0))
            }
            _ => Some(self.camera.distort_pixel(p)),
        }
    }

    /// Output pixel showing source image pixel `p`.
    pub fn img_to_rect(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        match (self.grid, self.pose) {
            (Some(grid), Some(pose)) => self
                .camera
                .pixel_to_plane(&pose, p)
                .map(|w| grid.to_rect(w)),
            _ => Some(self.camera.undistort_pixel(p)),
        }
    }
}

/// World units per pixel at the image centre: the finer of the two pixel
/// footprints, so the output never undersamples there.
fn centre_scale(camera: &CameraModel, pose: &Isometry3<f64>) -> Result<f64, RectifyError> {
    let c = Point2::new(
        (camera.width() as f64 - 1.0) * 0.5,
        (camera.height() as f64 - 1.0) * 0.5,
    );
    let hit = |p: Point2<f64>| camera.pixel_to_plane(pose, p).ok_or(RectifyError::PlaneNotVisible);
    let w0 = hit(c)?;
    let wx = hit(Point2::new(c.x + 1.0, c.y))?;
    let wy = hit(Point2::new(c.x, c.y + 1.0))?;
    let scale = (wx - w0).norm().min((wy - w0).norm());
    if scale.is_finite() && scale > 0.0 {
        Ok(scale)
    } else {
        Err(RectifyError::PlaneNotVisible)
    }
}

/// Bounding box of the plane region visible through the image border.
fn untilt_grid(
    camera: &CameraModel,
    pose: &Isometry3<f64>,
    options: &RectifyOptions,
) -> Result<(PlaneGrid, [u32; 2]), RectifyError> {
    let scale = match options.scale {
        Some(s) => s,
        None => centre_scale(camera, pose)?,
    };

    let (w, h) = (camera.width() as f64 - 1.0, camera.height() as f64 - 1.0);
    let n = options.border_samples.max(2);
    let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut missed = 0usize;
    for k in 0..n {
        let t = k as f64 / (n - 1) as f64;
        for p in [
            Point2::new(t * w, 0.0),
            Point2::new(t * w, h),
            Point2::new(0.0, t * h),
            Point2::new(w, t * h),
        ] {
            match camera.pixel_to_plane(pose, p) {
                Some(q) => {
                    min = min.inf(&q);
                    max = max.sup(&q);
                }
                None => missed += 1,
            }
        }
    }
    if !(min.x.is_finite() && max.x.is_finite()) {
        return Err(RectifyError::PlaneNotVisible);
    }
    if missed > 0 {
        debug!("{missed} border rays miss the world plane");
    }

    // Tolerance keeps exact multiples of the scale from rounding up.
    let width = ((max.x - min.x) / scale - 1e-6).ceil() + 1.0;
    let height = ((max.y - min.y) / scale - 1e-6).ceil() + 1.0;
    let size = checked_size(width, height, options.max_output_size)?;
    Ok((PlaneGrid { origin: min, scale }, size))
}

fn checked_size(width: f64, height: f64, max: u32) -> Result<[u32; 2], RectifyError> {
    if !(width.is_finite() && height.is_finite()) || width > max as f64 || height > max as f64 {
        return Err(RectifyError::OutputTooLarge {
            width: if width.is_finite() { width as u64 } else { u64::MAX },
            height: if height.is_finite() { height as u64 } else { u64::MAX },
            max,
        });
    }
    Ok([width as u32, height as u32])
}
