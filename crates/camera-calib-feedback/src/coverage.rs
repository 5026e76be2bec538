use camera_calib_core::TargetDetection;
use camera_calib_solver::PoseResult;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::histogram::{Histogram, HistogramError};
use crate::hull::{convex_hull, polygon_area};

/// What one accepted view contributes to the capture set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewCoverage {
    /// Convex hull area of the detected corners over the image area.
    pub area_fraction: f64,
    pub tilt_deg: f64,
    pub distance: f64,
    /// Corner centroid in pixels.
    pub center: Point2<f64>,
}

impl ViewCoverage {
    /// `None` when the detection has fewer than three corners or the image
    /// size is empty.
    pub fn from_detection(
        detection: &TargetDetection,
        image_size: [u32; 2],
        pose: &PoseResult,
    ) -> Option<Self> {
        let image_area = image_size[0] as f64 * image_size[1] as f64;
        if detection.corners.len() < 3 || image_area <= 0.0 {
            return None;
        }
        let pts: Vec<Point2<f64>> = detection
            .corners
            .iter()
            .map(|c| Point2::new(c.position.x as f64, c.position.y as f64))
            .collect();
        let sum = pts.iter().fold(Point2::origin(), |acc: Point2<f64>, p| {
            acc + p.coords
        });
        let center = sum / pts.len() as f64;
        let area_fraction = (polygon_area(&convex_hull(&pts)) / image_area).min(1.0);
        Some(Self {
            area_fraction,
            tilt_deg: pose.tilt_deg,
            distance: pose.distance,
            center,
        })
    }
}

/// Closed value range with a bin count.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub bins: usize,
}

impl ValueRange {
    pub fn new(min: f64, max: f64, bins: usize) -> Self {
        Self { min, max, bins }
    }

    fn histogram(&self) -> Result<Histogram, HistogramError> {
        Histogram::new(self.min, self.max, self.bins)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageParams {
    pub area: ValueRange,
    /// Degrees.
    pub tilt: ValueRange,
    /// World units, same as the board square size.
    pub distance: ValueRange,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            area: ValueRange::new(0.0, 1.0, 10),
            tilt: ValueRange::new(0.0, 60.0, 12),
            distance: ValueRange::new(0.0, 2000.0, 10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub views: usize,
    pub area: Histogram,
    pub tilt: Histogram,
    pub distance: Histogram,
}

impl CoverageReport {
    pub fn from_views(
        views: &[ViewCoverage],
        params: &CoverageParams,
    ) -> Result<Self, HistogramError> {
        let mut report = Self {
            views: 0,
            area: params.area.histogram()?,
            tilt: params.tilt.histogram()?,
            distance: params.distance.histogram()?,
        };
        for v in views {
            report.add(v);
        }
        debug!(
            "coverage over {} views: empty bins area {}, tilt {}, distance {}",
            report.views,
            report.area.empty_bins().len(),
            report.tilt.empty_bins().len(),
            report.distance.empty_bins().len()
        );
        Ok(report)
    }

    pub fn add(&mut self, view: &ViewCoverage) {
        self.views += 1;
        self.area.add(view.area_fraction);
        self.tilt.add(view.tilt_deg);
        self.distance.add(view.distance);
    }
}
