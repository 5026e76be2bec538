use camera_calib_core::{GridCoords, TargetDetection};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Planar checkerboard target with known square size.
///
/// `rows` and `cols` count *inner* corners. Board coordinates place corner
/// `(i, j)` at `(i * square_size, j * square_size, 0)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerboardSpec {
    pub rows: u32,
    pub cols: u32,
    /// Square edge length in world units (e.g. millimetres).
    pub square_size: f64,
}

impl CheckerboardSpec {
    pub fn new(rows: u32, cols: u32, square_size: f64) -> Self {
        Self {
            rows,
            cols,
            square_size,
        }
    }

    pub fn num_corners(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn contains(&self, g: GridCoords) -> bool {
        g.i >= 0 && g.j >= 0 && (g.i as u32) < self.cols && (g.j as u32) < self.rows
    }

    pub fn board_point(&self, g: GridCoords) -> Point2<f64> {
        Point2::new(g.i as f64 * self.square_size, g.j as f64 * self.square_size)
    }

    pub fn board_point3(&self, g: GridCoords) -> Point3<f64> {
        let p = self.board_point(g);
        Point3::new(p.x, p.y, 0.0)
    }

    /// Board extent `[width, height]` spanned by the inner corners.
    pub fn extent(&self) -> [f64; 2] {
        [
            self.cols.saturating_sub(1) as f64 * self.square_size,
            self.rows.saturating_sub(1) as f64 * self.square_size,
        ]
    }
}

/// One observation of a planar target: board points (on `Z = 0`) and the
/// pixels where they were seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationView {
    pub board: Vec<Point2<f64>>,
    pub pixels: Vec<Point2<f64>>,
}

impl CalibrationView {
    /// Pair every gridded corner of `detection` with its board point.
    ///
    /// Corners outside the board and duplicated grid cells are skipped.
    pub fn from_detection(detection: &TargetDetection, board: &CheckerboardSpec) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut out = Self::default();
        for (g, p) in detection.gridded() {
            if !board.contains(g) || !seen.insert(g) {
                continue;
            }
            out.board.push(board.board_point(g));
            out.pixels.push(Point2::new(p.x as f64, p.y as f64));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.board.len()
    }

    pub fn is_empty(&self) -> bool {
        self.board.is_empty()
    }
}
