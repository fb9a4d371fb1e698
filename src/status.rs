//! Readiness flags behind the operator's "ready / not ready" indicators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::Station;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StationStatus {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub bigface: StationStatus,
    pub od: StationStatus,
    pub plc_connected: bool,
}

#[derive(Default)]
struct Flags {
    bigface_loaded: AtomicBool,
    head_loaded: AtomicBool,
    od_loaded: AtomicBool,
    plc_connected: AtomicBool,
}

#[derive(Clone, Default)]
pub struct Readiness {
    flags: Arc<Flags>,
    head_required: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new(head_required: bool) -> Self {
        Self {
            flags: Arc::default(),
            head_required: Arc::new(AtomicBool::new(head_required)),
        }
    }

    pub fn set_model_loaded(&self, station: Station, loaded: bool) {
        let flag = match station {
            Station::Bigface => &self.flags.bigface_loaded,
            Station::Od => &self.flags.od_loaded,
        };
        flag.store(loaded, Ordering::SeqCst);
    }

    pub fn set_head_loaded(&self, loaded: bool) {
        self.flags.head_loaded.store(loaded, Ordering::SeqCst);
    }

    pub fn set_plc_connected(&self, connected: bool) {
        self.flags.plc_connected.store(connected, Ordering::SeqCst);
    }

    pub fn plc_connected(&self) -> bool {
        self.flags.plc_connected.load(Ordering::SeqCst)
    }

    /// Every model this station needs is loaded.
    pub fn models_loaded(&self, station: Station) -> bool {
        match station {
            Station::Bigface => {
                self.flags.bigface_loaded.load(Ordering::SeqCst)
                    && (!self.head_required.load(Ordering::SeqCst)
                        || self.flags.head_loaded.load(Ordering::SeqCst))
            }
            Station::Od => self.flags.od_loaded.load(Ordering::SeqCst),
        }
    }

    pub fn all_models_loaded(&self) -> bool {
        Station::ALL.iter().all(|station| self.models_loaded(*station))
    }

    pub fn station_status(&self, station: Station) -> StationStatus {
        if self.models_loaded(station) && self.plc_connected() {
            StationStatus::Ready
        } else {
            StationStatus::NotReady
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            bigface: self.station_status(Station::Bigface),
            od: self.station_status(Station::Od),
            plc_connected: self.plc_connected(),
        }
    }

    pub fn clear(&self) {
        for station in Station::ALL {
            self.set_model_loaded(station, false);
        }
        self.set_head_loaded(false);
        self.set_plc_connected(false);
    }
}
