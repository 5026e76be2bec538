//! Checkerboard detector built on top of `camera-calib-core`.
//!
//! ## Quickstart
//!
//! ```
//! use camera_calib_chessboard::{ChessboardDetector, ChessboardParams};
//! use camera_calib_core::Corner;
//!
//! let detector = ChessboardDetector::new(ChessboardParams::for_board(6, 9));
//! let corners: Vec<Corner> = Vec::new();
//! assert!(detector.detect_from_corners(&corners).is_none());
//! ```
//!
//! Algorithm (graph-based, perspective-tolerant):
//! 1. Filter ChESS corners by strength.
//! 2. For each corner, query the k nearest corners and keep up to 4
//!    neighbours (right/left/up/down) whose diagonal orientation is
//!    orthogonal, whose distance lies in the spacing window and whose edge
//!    runs at ~45° to both diagonals.
//! 3. Split the graph into connected components.
//! 4. BFS each component and assign integer coordinates (i, j).
//! 5. Keep the largest component that fits the expected inner-corner count
//!    (up to a quarter turn) with sufficient completeness.

mod detector;
mod geom;
mod gridgraph;
mod params;

pub use detector::{ChessboardDetectionResult, ChessboardDetector};
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams};
