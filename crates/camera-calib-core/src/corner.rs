use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Canonical 2D corner fed to the checkerboard detector.
///
/// This is what you obtain by adapting the output of a ChESS corner detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Dominant diagonal orientation at the corner, in radians, defined modulo π.
    pub orientation: f32,

    /// Strength / response of the corner detector.
    pub strength: f32,
}

impl Corner {
    pub fn as_vec2(&self) -> Vector2<f32> {
        Vector2::new(self.position.x, self.position.y)
    }
}

/// Integer grid coordinates (i, j) in board space; `i` runs along board X.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TargetKind {
    Chessboard,
}

/// A corner that is part of a detected target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LabeledCorner {
    pub position: Point2<f32>,

    /// Integer grid coordinates, when known.
    pub grid: Option<GridCoords>,

    /// Optional logical ID (row-major index for full checkerboards).
    pub id: Option<u32>,

    /// Detection confidence in [0, 1].
    pub confidence: f32,
}

/// One detected target instance in an image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetDetection {
    pub kind: TargetKind,
    pub corners: Vec<LabeledCorner>,
}

impl TargetDetection {
    /// Corners that carry grid coordinates.
    pub fn gridded(&self) -> impl Iterator<Item = (GridCoords, Point2<f32>)> + '_ {
        self.corners.iter().filter_map(|c| Some((c.grid?, c.position)))
    }
}
