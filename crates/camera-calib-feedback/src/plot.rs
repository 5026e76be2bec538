use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::Histogram;

pub type Polyline = Vec<Point2<f64>>;

/// Target rectangle in image coordinates (y down).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlotRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PlotRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }
}

/// Step outline of `hist` inside `rect`: bins left to right, the fullest bin
/// reaching the top edge. Starts and ends on the bottom edge.
pub fn histogram_polyline(hist: &Histogram, rect: PlotRect) -> Polyline {
    let n = hist.bins();
    let peak = hist.max_count();
    let bin_w = rect.width / n as f64;
    let level = |count: u32| {
        if peak == 0 {
            rect.bottom()
        } else {
            rect.bottom() - rect.height * count as f64 / peak as f64
        }
    };

    let mut line = Vec::with_capacity(2 * n + 2);
    line.push(Point2::new(rect.x, rect.bottom()));
    for (i, &c) in hist.counts().iter().enumerate() {
        let y = level(c);
        line.push(Point2::new(rect.x + bin_w * i as f64, y));
        line.push(Point2::new(rect.x + bin_w * (i + 1) as f64, y));
    }
    line.push(Point2::new(rect.right(), rect.bottom()));
    line
}

/// Ruler along the bottom edge of `rect`: the baseline first, then one
/// segment per tick. `ticks` marks split the width evenly (both ends
/// included); every `major_every`-th tick spans the full height, others half.
pub fn ruler_polyline(rect: PlotRect, ticks: usize, major_every: usize) -> Vec<Polyline> {
    let base = rect.bottom();
    let mut lines = vec![vec![Point2::new(rect.x, base), Point2::new(rect.right(), base)]];
    if ticks == 0 {
        return lines;
    }
    let step = if ticks > 1 {
        rect.width / (ticks - 1) as f64
    } else {
        0.0
    };
    for k in 0..ticks {
        let major = major_every > 0 && k % major_every == 0;
        let len = if major { rect.height } else { rect.height * 0.5 };
        let x = rect.x + step * k as f64;
        lines.push(vec![Point2::new(x, base), Point2::new(x, base - len)]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_outline_scales_to_rect() {
        let mut h = Histogram::new(0.0, 3.0, 3).expect("histogram");
        for v in [0.5, 1.5, 1.6, 2.5, 2.6, 2.7, 2.8] {
            h.add(v);
        }
        let rect = PlotRect::new(10.0, 20.0, 30.0, 40.0);
        let line = histogram_polyline(&h, rect);
        assert_eq!(line.len(), 8);
        assert_eq!(line[0], Point2::new(10.0, 60.0));
        assert_eq!(line[1], Point2::new(10.0, 50.0));
        assert_eq!(line[2], Point2::new(20.0, 50.0));
        assert_eq!(line[3], Point2::new(20.0, 40.0));
        // Fullest bin touches the top edge.
        assert_eq!(line[5], Point2::new(30.0, 20.0));
        assert_eq!(line[6], Point2::new(40.0, 20.0));
        assert_eq!(line[7], Point2::new(40.0, 60.0));
    }

    #[test]
    fn empty_histogram_is_flat() {
        let h = Histogram::new(0.0, 1.0, 4).expect("histogram");
        let line = histogram_polyline(&h, PlotRect::new(0.0, 0.0, 8.0, 5.0));
        assert!(line.iter().all(|p| p.y == 5.0));
    }

    #[test]
    fn ruler_has_major_and_minor_ticks() {
        let rect = PlotRect::new(0.0, 0.0, 100.0, 10.0);
        let lines = ruler_polyline(rect, 11, 5);
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], vec![Point2::new(0.0, 10.0), Point2::new(100.0, 10.0)]);
        assert_eq!(lines[1][1], Point2::new(0.0, 0.0));
        assert_eq!(lines[2][1], Point2::new(10.0, 5.0));
        assert_eq!(lines[6][1], Point2::new(50.0, 0.0));
        assert_eq!(lines[11][0], Point2::new(100.0, 10.0));
    }
}
