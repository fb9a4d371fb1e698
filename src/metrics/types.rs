use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StationCounters {
    pub inspected: u64,
    pub defective: u64,
    pub good: u64,
    /// Occurrences of each defect label across finalized rollers.
    pub defect_breakdown: BTreeMap<String, u64>,
    pub frames_inferred: u64,
    pub inference_failures: u64,
    pub unattributed_defects: u64,
    pub head_checks: u64,
    pub head_failures: u64,
    /// OD verdicts not forwarded because Bigface already rejected the roller.
    pub upstream_skips: u64,
    pub handoff_violations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub bigface: StationCounters,
    pub od: StationCounters,
    pub pulses_issued: u64,
    pub pulses_failed: u64,
    pub total_inspected: u64,
    pub total_defective: u64,
    /// Defective share of inspected rollers across both stations, 0.0 when
    /// nothing has been inspected.
    pub defect_proportion: f64,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            bigface: StationCounters::default(),
            od: StationCounters::default(),
            pulses_issued: 0,
            pulses_failed: 0,
            total_inspected: 0,
            total_defective: 0,
            defect_proportion: 0.0,
        }
    }
}
