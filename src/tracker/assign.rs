//! Nearest-roller spatial match between defect boxes and tracked ids.

use crate::models::{BBox, Detection};

/// Detections of one frame split into roller boxes and defect boxes, each
/// sorted left to right by `x1`.
#[derive(Debug, Default, Clone)]
pub struct FramePartition {
    pub rollers: Vec<Detection>,
    pub defects: Vec<Detection>,
}

impl FramePartition {
    /// Roller boxes need `roller_label` and a confidence strictly above
    /// `roller_min_confidence`; low-confidence rollers are discarded rather
    /// than treated as defects. Everything else is a defect.
    pub fn split(detections: Vec<Detection>, roller_label: &str, roller_min_confidence: f32) -> Self {
        let mut partition = FramePartition::default();
        for detection in detections {
            if detection.label == roller_label {
                if detection.confidence > roller_min_confidence {
                    partition.rollers.push(detection);
                }
            } else {
                partition.defects.push(detection);
            }
        }

        partition
            .rollers
            .sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1));
        partition
            .defects
            .sort_by(|a, b| a.bbox.x1.total_cmp(&b.bbox.x1));
        partition
    }
}

/// Finds the roller id a defect box belongs to.
///
/// The `i`-th roller box from the left is paired with id `newest_id - i`:
/// the line moves so that the most recently counted roller is left-most in
/// frame. Only the first `min(depth, rollers, newest_id)` pairs are
/// considered and the first box holding a corner of `defect` wins.
pub fn match_defect(defect: &BBox, rollers: &[Detection], newest_id: u64, depth: usize) -> Option<u64> {
    let window = depth
        .min(rollers.len())
        .min(usize::try_from(newest_id).unwrap_or(usize::MAX));

    rollers
        .iter()
        .take(window)
        .enumerate()
        .find(|(_, roller)| roller.bbox.holds_corner_of(defect))
        .map(|(offset, _)| newest_id - offset as u64)
}
