use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Action, Station};

/// One actuator pulse as issued to the PLC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub station: Station,
    pub action: Action,
    pub roller_id: u64,
    pub success: bool,
    pub error: Option<String>,
    pub issued_at: DateTime<Utc>,
}
