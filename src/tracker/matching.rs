//! Cost matrices and assignment for track/detection association.

use ndarray::Array2;
use tracing::warn;

use crate::tracker::rect::{Rect, iou_batch};

/// Cost of pairing a padded row or column; larger than any real cost.
const PAD_COST: f64 = 1e6;

/// `1 - IoU` for every (track, detection) pair.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    iou_batch(track_boxes, det_boxes).mapv(|iou| 1.0 - iou)
}

/// Weight IoU similarity by detection confidence, in place.
pub fn fuse_score(cost_matrix: &mut Array2<f32>, det_scores: &[f32]) {
    for ((_, j), cost) in cost_matrix.indexed_iter_mut() {
        let fused_sim = (1.0 - *cost) * det_scores[j];
        *cost = 1.0 - fused_sim;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost assignment, rejecting pairs whose cost exceeds `thresh`.
///
/// The matrix is padded to square so LAPJV can solve it; rows or columns
/// assigned to padding come back unmatched.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    let size = num_rows.max(num_cols);
    let padded = Array2::from_shape_fn((size, size), |(i, j)| {
        if i < num_rows && j < num_cols {
            cost_matrix[[i, j]] as f64
        } else {
            PAD_COST
        }
    });

    let mut result = AssignmentResult::default();
    let mut det_matched = vec![false; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                if col < num_cols && cost_matrix[[row, col]] <= thresh {
                    result.matches.push((row, col));
                    det_matched[col] = true;
                } else {
                    result.unmatched_tracks.push(row);
                }
            }
        }
        Err(err) => {
            warn!(?err, rows = num_rows, cols = num_cols, "assignment failed, leaving all unmatched");
            result.unmatched_tracks = (0..num_rows).collect();
        }
    }

    result.unmatched_detections = det_matched
        .iter()
        .enumerate()
        .filter_map(|(j, &matched)| (!matched).then_some(j))
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sides_are_all_unmatched() {
        let r = linear_assignment(&Array2::zeros((0, 3)), 0.8);
        assert!(r.matches.is_empty());
        assert_eq!(r.unmatched_detections, vec![0, 1, 2]);

        let r = linear_assignment(&Array2::zeros((2, 0)), 0.8);
        assert_eq!(r.unmatched_tracks, vec![0, 1]);
    }

    #[test]
    fn picks_cheapest_pairs_under_threshold() {
        let a = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(100.0, 0.0, 10.0, 10.0)];
        let b = [
            Rect::new(101.0, 0.0, 10.0, 10.0),
            Rect::new(1.0, 0.0, 10.0, 10.0),
            Rect::new(300.0, 300.0, 10.0, 10.0),
        ];
        let cost = iou_distance(&a, &b);
        let mut r = linear_assignment(&cost, 0.8);
        r.matches.sort();
        assert_eq!(r.matches, vec![(0, 1), (1, 0)]);
        assert!(r.unmatched_tracks.is_empty());
        assert_eq!(r.unmatched_detections, vec![2]);
    }

    #[test]
    fn fuse_score_scales_similarity() {
        let mut cost = Array2::from_elem((1, 2), 0.2_f32);
        fuse_score(&mut cost, &[1.0, 0.5]);
        assert!((cost[[0, 0]] - 0.2).abs() < 1e-6);
        assert!((cost[[0, 1]] - 0.6).abs() < 1e-6);
    }
}
