//! Slot controllers: turn queued verdicts into actuator intents at the
//! moment a roller reaches its accept/reject gate.

mod loop_worker;

pub use loop_worker::slot_loop;

use tokio::sync::mpsc;

use crate::models::{Action, Intent, Station, Verdict};

/// Consumer of one station's verdict queue, fired once per high period of
/// the slot sensor.
pub struct SlotGate {
    station: Station,
    latched: bool,
    waits_for_verdict: bool,
    verdicts: mpsc::UnboundedReceiver<Verdict>,
}

impl SlotGate {
    pub fn new(station: Station, verdicts: mpsc::UnboundedReceiver<Verdict>) -> Self {
        Self {
            station,
            latched: false,
            waits_for_verdict: false,
            verdicts,
        }
    }

    /// Keeps an empty-queue high period open: a verdict that arrives while
    /// the sensor is still high fires on that same period.
    pub fn waiting_for_verdict(mut self, waits: bool) -> Self {
        self.waits_for_verdict = waits;
        self
    }

    pub fn station(&self) -> Station {
        self.station
    }

    /// Feeds the slot sensor level. The first high sample of a period pops
    /// one verdict and returns its intent. With an empty queue the period is
    /// used up unless the gate waits for a verdict. A low sample re-arms.
    pub fn observe(&mut self, level: bool) -> Option<(Intent, Verdict)> {
        if !level {
            self.latched = false;
            return None;
        }
        if self.latched {
            return None;
        }

        let Ok(verdict) = self.verdicts.try_recv() else {
            self.latched = !self.waits_for_verdict;
            return None;
        };
        self.latched = true;
        let intent = Intent {
            target: self.station,
            action: Action::for_verdict(verdict.defective),
            roller_id: verdict.roller_id,
        };
        Some((intent, verdict))
    }
}
