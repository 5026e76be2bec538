//! Coverage statistics over calibration views.
//!
//! Good intrinsic calibration needs the board seen at a spread of image
//! coverages, tilts and distances. This crate measures each view, bins the
//! measurements, and produces polylines for drawing the histograms with a
//! ruler underneath.

mod coverage;
mod histogram;
mod hull;
mod plot;

pub use coverage::{CoverageParams, CoverageReport, ValueRange, ViewCoverage};
pub use histogram::{Histogram, HistogramError};
pub use hull::{convex_hull, polygon_area};
pub use plot::{histogram_polyline, ruler_polyline, PlotRect, Polyline};
