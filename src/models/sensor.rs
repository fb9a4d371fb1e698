use serde::{Deserialize, Serialize};

/// The five PLC inputs the line reacts to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Signal {
    BigfacePresence,
    BigfaceSlot,
    OdPresence,
    OdSlot,
    HeadClassify,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::BigfacePresence,
        Signal::BigfaceSlot,
        Signal::OdPresence,
        Signal::OdSlot,
        Signal::HeadClassify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::BigfacePresence => "bigfacePresence",
            Signal::BigfaceSlot => "bigfaceSlot",
            Signal::OdPresence => "odPresence",
            Signal::OdSlot => "odSlot",
            Signal::HeadClassify => "headClassify",
        }
    }
}

/// Latest decoded sensor byte range. Written only by the PLC gateway and
/// handed out whole, so readers never see a mix of two poll cycles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub bigface_presence: bool,
    pub bigface_slot: bool,
    pub od_presence: bool,
    pub od_slot: bool,
    pub head_classify: bool,
}

impl SensorSnapshot {
    pub fn get(&self, signal: Signal) -> bool {
        match signal {
            Signal::BigfacePresence => self.bigface_presence,
            Signal::BigfaceSlot => self.bigface_slot,
            Signal::OdPresence => self.od_presence,
            Signal::OdSlot => self.od_slot,
            Signal::HeadClassify => self.head_classify,
        }
    }

    pub fn set(&mut self, signal: Signal, value: bool) {
        match signal {
            Signal::BigfacePresence => self.bigface_presence = value,
            Signal::BigfaceSlot => self.bigface_slot = value,
            Signal::OdPresence => self.od_presence = value,
            Signal::OdSlot => self.od_slot = value,
            Signal::HeadClassify => self.head_classify = value,
        }
    }

    pub fn with(mut self, signal: Signal, value: bool) -> Self {
        self.set(signal, value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Steady,
}

/// Remembers the previous level of one boolean so that a sustained high
/// level yields exactly one `Rising` edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, current: bool) -> Edge {
        let edge = match (self.previous, current) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            _ => Edge::Steady,
        };
        self.previous = current;
        edge
    }

    pub fn rising(&mut self, current: bool) -> bool {
        self.update(current) == Edge::Rising
    }

    pub fn level(&self) -> bool {
        self.previous
    }
}
