use serde::{Deserialize, Serialize};

use super::Station;

pub const NO_DEFECT: &str = "No defect";

/// Evidence gathered for one physical roller at one station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollerRecord {
    pub id: u64,
    pub defective: bool,
    pub defect_names: Vec<String>,
}

impl RollerRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            defective: false,
            defect_names: vec![NO_DEFECT.to_string()],
        }
    }

    pub fn mark_defect(&mut self, name: impl Into<String>) {
        self.defective = true;
        self.defect_names.push(name.into());
    }

    /// Defect names without the initial placeholder.
    pub fn defects(&self) -> impl Iterator<Item = &str> {
        self.defect_names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != NO_DEFECT)
    }
}

/// Final decision for one roller at one station, queued for the slot
/// controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub station: Station,
    pub roller_id: u64,
    pub defective: bool,
    pub defect_names: Vec<String>,
}

impl Verdict {
    pub fn from_record(station: Station, record: RollerRecord) -> Self {
        Self {
            station,
            roller_id: record.id,
            defective: record.defective,
            defect_names: record.defect_names,
        }
    }
}
