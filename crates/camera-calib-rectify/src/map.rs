use camera_calib_core::{sample_bilinear_u8, GrayImage, GrayImageView};
use nalgebra::Point2;

/// Source pixel for every output pixel, NaN where there is none.
#[derive(Clone, Debug, PartialEq)]
pub struct RectifyMap {
    pub width: usize,
    pub height: usize,
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
}

impl RectifyMap {
    /// Fill a `width x height` map from `f(output pixel) -> source pixel`.
    pub fn build<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(Point2<f64>) -> Option<Point2<f64>>,
    {
        let mut xs = vec![f32::NAN; width * height];
        let mut ys = vec![f32::NAN; width * height];
        for y in 0..height {
            for x in 0..width {
                if let Some(src) = f(Point2::new(x as f64, y as f64)) {
                    xs[y * width + x] = src.x as f32;
                    ys[y * width + x] = src.y as f32;
                }
            }
        }
        Self {
            width,
            height,
            xs,
            ys,
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Point2<f32>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y * self.width + x;
        let (sx, sy) = (self.xs[i], self.ys[i]);
        (sx.is_finite() && sy.is_finite()).then(|| Point2::new(sx, sy))
    }

    /// Share of output pixels that have a source.
    pub fn valid_fraction(&self) -> f64 {
        if self.xs.is_empty() {
            return 0.0;
        }
        let valid = self.xs.iter().filter(|v| v.is_finite()).count();
        valid as f64 / self.xs.len() as f64
    }

    /// Bilinear remap of `src`; pixels without a source get `fill`.
    pub fn remap(&self, src: &GrayImageView<'_>, fill: u8) -> GrayImage {
        let mut out = GrayImage::new(self.width, self.height);
        for (i, px) in out.data.iter_mut().enumerate() {
            let (sx, sy) = (self.xs[i], self.ys[i]);
            *px = if sx.is_finite() && sy.is_finite() {
                sample_bilinear_u8(src, sx, sy)
            } else {
                fill
            };
        }
        out
    }
}
