use crate::gridgraph::GridGraph;
use crate::params::ChessboardParams;
use camera_calib_core::{Corner, GridCoords, LabeledCorner, TargetDetection, TargetKind};
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Checkerboard found in a corner cloud.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChessboardDetectionResult {
    /// Labelled corners sorted row-major by grid coordinates.
    pub detection: TargetDetection,
    /// Indices into the input corner slice, parallel to `detection.corners`.
    pub inliers: Vec<usize>,
    /// Grid extent used for `id` assignment (inner corners).
    pub cols: u32,
    pub rows: u32,
    /// `#corners / (cols * rows)`.
    pub completeness: f32,
}

/// Checkerboard detector over ChESS corners.
///
/// Grid coordinates are normalised so the minimum `i` and `j` are zero, `i`
/// increases roughly along image +x and `j` along image +y. When the found
/// grid only fits the expected size rotated by 90°, it is rotated (never
/// mirrored) so the board frame keeps its handedness.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

struct Candidate {
    labels: Vec<(usize, GridCoords)>,
    cols: u32,
    rows: u32,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find the best checkerboard in a cloud of ChESS corners.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, corners), fields(num_corners = corners.len()))
    )]
    pub fn detect_from_corners(&self, corners: &[Corner]) -> Option<ChessboardDetectionResult> {
        let strong_idx: Vec<usize> = corners
            .iter()
            .enumerate()
            .filter(|(_, c)| c.strength >= self.params.min_strength)
            .map(|(i, _)| i)
            .collect();
        debug!(
            "{} of {} corners pass the strength filter",
            strong_idx.len(),
            corners.len()
        );
        if strong_idx.len() < self.params.min_corners.max(4) {
            return None;
        }

        let strong: Vec<Corner> = strong_idx.iter().map(|&i| corners[i].clone()).collect();
        let graph = GridGraph::new(&strong, &self.params.graph);

        let mut best: Option<Candidate> = None;
        for component in graph.connected_components() {
            if component.len() < self.params.min_corners.max(4) {
                break;
            }
            let labels = graph.assign_grid_coordinates(&component);
            let Some(candidate) = self.fit_expected(normalize(labels)) else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|b| candidate.labels.len() > b.labels.len())
            {
                best = Some(candidate);
            }
        }

        let Candidate {
            mut labels,
            cols,
            rows,
        } = best?;

        labels.sort_by_key(|(_, g)| (g.j, g.i));
        let mut detection = TargetDetection {
            kind: TargetKind::Chessboard,
            corners: Vec::with_capacity(labels.len()),
        };
        let mut inliers = Vec::with_capacity(labels.len());
        for (node, g) in &labels {
            let src = strong_idx[*node];
            detection.corners.push(LabeledCorner {
                position: corners[src].position,
                grid: Some(*g),
                id: (g.j as u32)
                    .checked_mul(cols)
                    .and_then(|v| v.checked_add(g.i as u32)),
                confidence: 1.0,
            });
            inliers.push(src);
        }

        let completeness = labels.len() as f32 / (cols as f32 * rows as f32);
        info!(
            "checkerboard {}x{} with {} corners (completeness {:.2})",
            cols,
            rows,
            labels.len(),
            completeness
        );

        Some(ChessboardDetectionResult {
            detection,
            inliers,
            cols,
            rows,
            completeness,
        })
    }

    /// Match a normalised labelling against the expected board size.
    fn fit_expected(&self, labels: Vec<(usize, GridCoords)>) -> Option<Candidate> {
        if labels.len() < self.params.min_corners.max(4) {
            return None;
        }
        let (w, h) = extent(&labels);

        let (Some(rows), Some(cols)) = (self.params.expected_rows, self.params.expected_cols) else {
            return Some(Candidate { labels, cols: w, rows: h });
        };

        let labels = if w <= cols && h <= rows {
            labels
        } else if h <= cols && w <= rows {
            // Quarter turn: (i, j) -> (j, w - 1 - i) keeps the orientation.
            labels
                .into_iter()
                .map(|(n, g)| {
                    (
                        n,
                        GridCoords {
                            i: g.j,
                            j: w as i32 - 1 - g.i,
                        },
                    )
                })
                .collect()
        } else {
            debug!("component {w}x{h} does not fit the expected {cols}x{rows} board");
            return None;
        };

        let completeness = labels.len() as f32 / (rows as f32 * cols as f32);
        if completeness < self.params.completeness_threshold {
            debug!(
                "component with {} corners below completeness threshold ({completeness:.2})",
                labels.len()
            );
            return None;
        }

        Some(Candidate { labels, cols, rows })
    }
}

fn extent(labels: &[(usize, GridCoords)]) -> (u32, u32) {
    let max_i = labels.iter().map(|(_, g)| g.i).max().unwrap_or(0);
    let max_j = labels.iter().map(|(_, g)| g.j).max().unwrap_or(0);
    (max_i as u32 + 1, max_j as u32 + 1)
}

fn normalize(mut labels: Vec<(usize, GridCoords)>) -> Vec<(usize, GridCoords)> {
    let min_i = labels.iter().map(|(_, g)| g.i).min().unwrap_or(0);
    let min_j = labels.iter().map(|(_, g)| g.j).min().unwrap_or(0);
    for (_, g) in &mut labels {
        g.i -= min_i;
        g.j -= min_j;
    }
    labels
}
