use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Station {
    Bigface,
    Od,
}

impl Station {
    pub const ALL: [Station; 2] = [Station::Bigface, Station::Od];

    pub fn as_str(&self) -> &'static str {
        match self {
            Station::Bigface => "bigface",
            Station::Od => "od",
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Accept,
    Reject,
}

impl Action {
    pub fn for_verdict(defective: bool) -> Self {
        if defective {
            Action::Reject
        } else {
            Action::Accept
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Reject => "reject",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to pulse one actuator. Produced by a slot controller, consumed
/// exactly once by the command dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub target: Station,
    pub action: Action,
    pub roller_id: u64,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{} (roller {})", self.action, self.target, self.roller_id)
    }
}
