use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::StationConfig;
use crate::models::{Detection, EdgeDetector, RollerRecord, Station};

use super::assign::{match_defect, FramePartition};

/// What one frame of detections did to the pending rollers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOutcome {
    pub rollers_seen: usize,
    pub defects_seen: usize,
    /// `(roller id, defect label)` for every defect attributed to a roller.
    pub attributed: Vec<(u64, String)>,
    /// Defects with no roller box around them, or whose roller already left.
    pub dropped: usize,
}

impl FrameOutcome {
    pub fn has_defects(&self) -> bool {
        self.defects_seen > 0
    }
}

/// Per-station roller bookkeeping.
///
/// Ids come from a local counter bumped once per rising edge of the
/// presence sensor. Pending rollers are kept in id order and always leave
/// oldest first.
#[derive(Debug, Clone)]
pub struct RollerTracker {
    station: Station,
    search_depth: usize,
    roller_label: String,
    roller_min_confidence: f32,
    counter: u64,
    pending: VecDeque<RollerRecord>,
    presence: EdgeDetector,
    head: EdgeDetector,
    already_handled: bool,
}

impl RollerTracker {
    pub fn new(station: Station, config: &StationConfig) -> Self {
        Self {
            station,
            search_depth: config.search_depth.max(1),
            roller_label: config.roller_label.trim().to_lowercase(),
            roller_min_confidence: config.roller_min_confidence,
            counter: 0,
            pending: VecDeque::new(),
            presence: EdgeDetector::new(),
            head: EdgeDetector::new(),
            already_handled: false,
        }
    }

    pub fn station(&self) -> Station {
        self.station
    }

    /// Last id handed out; 0 before the first roller.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn newest_id(&self) -> Option<u64> {
        self.pending.back().map(|record| record.id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &RollerRecord> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn record(&self, id: u64) -> Option<&RollerRecord> {
        self.pending.iter().find(|record| record.id == id)
    }

    /// Feeds the presence sensor level. A rising edge starts tracking a new
    /// roller and returns its id.
    pub fn observe_presence(&mut self, level: bool) -> Option<u64> {
        if self.presence.rising(level) {
            Some(self.begin_roller())
        } else {
            None
        }
    }

    pub fn presence_level(&self) -> bool {
        self.presence.level()
    }

    fn begin_roller(&mut self) -> u64 {
        self.counter += 1;
        self.pending.push_back(RollerRecord::new(self.counter));
        self.counter
    }

    /// Attributes the defect boxes of one frame to pending rollers.
    pub fn apply_detections(&mut self, detections: Vec<Detection>) -> FrameOutcome {
        let partition =
            FramePartition::split(detections, &self.roller_label, self.roller_min_confidence);
        let mut outcome = FrameOutcome {
            rollers_seen: partition.rollers.len(),
            defects_seen: partition.defects.len(),
            ..FrameOutcome::default()
        };

        for defect in partition.defects {
            let target = match_defect(
                &defect.bbox,
                &partition.rollers,
                self.counter,
                self.search_depth,
            );
            let record = target.and_then(|id| self.pending.iter_mut().find(|r| r.id == id));

            match record {
                Some(record) => {
                    record.mark_defect(defect.label.clone());
                    outcome.attributed.push((record.id, defect.label));
                }
                None => outcome.dropped += 1,
            }
        }

        outcome
    }

    /// Feeds the head-classify sensor level; true on a rising edge.
    pub fn observe_head(&mut self, level: bool) -> bool {
        self.head.rising(level)
    }

    /// Marks the newest pending roller defective with `name`. Returns the id
    /// it was applied to, if any roller is pending.
    pub fn mark_newest(&mut self, name: &str) -> Option<u64> {
        let record = self.pending.back_mut()?;
        record.mark_defect(name);
        Some(record.id)
    }

    /// Feeds the level of the signal that gates finalization. While it is
    /// high the oldest pending roller is released once; the latch clears
    /// when the signal drops.
    pub fn observe_finalize_gate(&mut self, level: bool) -> Option<RollerRecord> {
        if !level {
            self.already_handled = false;
            return None;
        }
        if self.already_handled || self.pending.is_empty() {
            return None;
        }

        self.already_handled = true;
        self.pending.pop_front()
    }
}
