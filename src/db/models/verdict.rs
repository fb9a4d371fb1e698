use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Station;

/// What happened to a finalized verdict on its way to the slot controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VerdictOutcome {
    Forwarded,
    /// OD verdict withheld because Bigface already rejected the roller.
    SkippedUpstreamReject,
    /// OD verdict with no matching Bigface entry; forwarded anyway.
    HandoffViolation,
}

impl VerdictOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictOutcome::Forwarded => "Forwarded",
            VerdictOutcome::SkippedUpstreamReject => "SkippedUpstreamReject",
            VerdictOutcome::HandoffViolation => "HandoffViolation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub station: Station,
    pub roller_id: u64,
    pub defective: bool,
    pub defect_names: Vec<String>,
    pub outcome: VerdictOutcome,
    pub finalized_at: DateTime<Utc>,
}
