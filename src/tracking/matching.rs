//! Association helpers: IoU cost matrices and assignment.

use crate::detection::BBox;
use ndarray::Array2;

/// Cost `1 - IoU` between every track box (rows) and detection box (columns)
pub fn iou_distance(tracks: &[BBox], detections: &[BBox]) -> Array2<f32> {
    let mut dists = Array2::zeros((tracks.len(), detections.len()));
    for (i, t) in tracks.iter().enumerate() {
        for (j, d) in detections.iter().enumerate() {
            dists[[i, j]] = 1.0 - t.iou(d);
        }
    }
    dists
}

/// Weight IoU similarity by detection score
pub fn fuse_score(cost_matrix: &mut Array2<f32>, scores: &[f32]) {
    for ((_, j), cost) in cost_matrix.indexed_iter_mut() {
        let sim = (1.0 - *cost) * scores[j];
        *cost = 1.0 - sim;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost assignment where pairs costing more than `thresh` never match
///
/// The square matrix handed to LAPJV is extended with a dummy column per
/// track and a dummy row per detection, each at `thresh / 2`, so leaving a
/// track and a detection both unmatched costs exactly `thresh`.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> Assignment {
    let (rows, cols) = cost_matrix.dim();

    if rows == 0 || cols == 0 {
        return Assignment {
            matches: Vec::new(),
            unmatched_tracks: (0..rows).collect(),
            unmatched_detections: (0..cols).collect(),
        };
    }

    let size = rows + cols;
    let half_limit = f64::from(thresh) / 2.0;
    let mut extended = Array2::<f64>::zeros((size, size));
    for ((i, j), cell) in extended.indexed_iter_mut() {
        *cell = match (i < rows, j < cols) {
            (true, true) => f64::from(cost_matrix[[i, j]]),
            (true, false) | (false, true) => half_limit,
            (false, false) => 0.0,
        };
    }

    let mut matches = Vec::new();
    let mut row_used = vec![false; rows];
    let mut col_used = vec![false; cols];

    match lapjv::lapjv(&extended) {
        Ok((row_to_col, _)) => {
            for (i, &j) in row_to_col.iter().enumerate().take(rows) {
                if j < cols && cost_matrix[[i, j]] <= thresh {
                    row_used[i] = true;
                    col_used[j] = true;
                    matches.push((i, j));
                }
            }
        }
        Err(err) => tracing::warn!("Assignment solver failed, leaving all unmatched: {err:?}"),
    }

    Assignment {
        matches,
        unmatched_tracks: (0..rows).filter(|&i| !row_used[i]).collect(),
        unmatched_detections: (0..cols).filter(|&j| !col_used[j]).collect(),
    }
}
