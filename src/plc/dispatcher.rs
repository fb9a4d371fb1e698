use tokio::sync::mpsc;

use crate::db::Journal;
use crate::metrics::InspectionStats;
use crate::models::Intent;

use super::{write_bit, BitAddress, PlcBitMap, PlcClient, PlcError};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "plc";

use crate::{log_error, log_info};

/// Result of one attempted pulse, sent to the async side for counters and
/// the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseReport {
    pub intent: Intent,
    pub error: Option<String>,
}

/// Sole consumer of the intent queue. Runs inside the gateway thread and
/// turns each intent into one actuator pulse.
pub struct CommandDispatcher {
    db: u16,
    bits: PlcBitMap,
    intents: mpsc::UnboundedReceiver<Intent>,
    reports: Option<mpsc::UnboundedSender<PulseReport>>,
}

impl CommandDispatcher {
    pub fn new(
        db: u16,
        bits: PlcBitMap,
        intents: mpsc::UnboundedReceiver<Intent>,
        reports: Option<mpsc::UnboundedSender<PulseReport>>,
    ) -> Self {
        Self {
            db,
            bits,
            intents,
            reports,
        }
    }

    /// Writes the bit high then low. A failure of either write fails the
    /// pulse; it is not retried.
    pub fn pulse(&self, client: &mut dyn PlcClient, address: BitAddress) -> Result<(), PlcError> {
        write_bit(client, self.db, address, true)?;
        write_bit(client, self.db, address, false)
    }

    /// Pulses every queued intent. Returns how many were taken off the
    /// queue.
    pub fn drain(&mut self, client: &mut dyn PlcClient) -> usize {
        let mut handled = 0;
        while let Ok(intent) = self.intents.try_recv() {
            handled += 1;
            let address = self.bits.actuator(intent.target, intent.action);
            let error = match self.pulse(client, address) {
                Ok(()) => {
                    log_info!("pulsed {intent}");
                    None
                }
                Err(err) => {
                    log_error!("pulse {intent} failed, not retried: {err}");
                    Some(err.to_string())
                }
            };
            self.report(intent, error);
        }
        handled
    }

    /// Empties the queue without touching the PLC. Used while the link is
    /// down so stale intents never reach an actuator after a reconnect.
    pub fn discard(&mut self, reason: &str) -> usize {
        let mut discarded = 0;
        while let Ok(intent) = self.intents.try_recv() {
            discarded += 1;
            log_error!("dropping {intent}: {reason}");
            self.report(intent, Some(reason.to_string()));
        }
        discarded
    }

    fn report(&self, intent: Intent, error: Option<String>) {
        if let Some(reports) = &self.reports {
            let _ = reports.send(PulseReport { intent, error });
        }
    }
}

/// Folds pulse reports into the counters and the journal until the
/// dispatcher goes away.
pub async fn report_loop(
    mut reports: mpsc::UnboundedReceiver<PulseReport>,
    stats: InspectionStats,
    journal: Option<Journal>,
) {
    while let Some(report) = reports.recv().await {
        stats.record_pulse(report.error.is_none()).await;
        if let Some(journal) = &journal {
            journal.record_command(&report.intent, report.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Station};
    use crate::plc::MemoryPlc;

    fn intent(target: Station, action: Action, roller_id: u64) -> Intent {
        Intent {
            target,
            action,
            roller_id,
        }
    }

    #[test]
    fn each_intent_is_pulsed_once() {
        let plc = MemoryPlc::new(86, 3);
        let bits = PlcBitMap::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let mut dispatcher = CommandDispatcher::new(86, bits.clone(), rx, Some(report_tx));

        tx.send(intent(Station::Bigface, Action::Reject, 1)).unwrap();
        tx.send(intent(Station::Od, Action::Accept, 1)).unwrap();

        let mut client = plc.client();
        assert_eq!(dispatcher.drain(&mut client), 2);
        assert_eq!(dispatcher.drain(&mut client), 0);

        assert_eq!(plc.pulse_count(bits.reject_bigface), 1);
        assert_eq!(plc.pulse_count(bits.accept_od), 1);
        assert_eq!(plc.pulse_count(bits.accept_bigface), 0);
        assert_eq!(plc.byte(1), 0);
        assert!(report_rx.try_recv().unwrap().error.is_none());
    }

    #[test]
    fn failed_pulse_is_reported_not_retried() {
        let plc = MemoryPlc::new(86, 3);
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let mut dispatcher = CommandDispatcher::new(86, PlcBitMap::default(), rx, Some(report_tx));

        tx.send(intent(Station::Od, Action::Reject, 4)).unwrap();
        plc.fail_next_writes(1);
        let mut client = plc.client();
        assert_eq!(dispatcher.drain(&mut client), 1);

        assert!(plc.writes().is_empty());
        let report = report_rx.try_recv().unwrap();
        assert_eq!(report.intent.roller_id, 4);
        assert!(report.error.is_some());
        assert!(report_rx.try_recv().is_err());
    }

    #[test]
    fn discard_reports_every_intent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let mut dispatcher = CommandDispatcher::new(86, PlcBitMap::default(), rx, Some(report_tx));
        tx.send(intent(Station::Bigface, Action::Accept, 2)).unwrap();

        assert_eq!(dispatcher.discard("PLC not connected"), 1);
        assert_eq!(
            report_rx.try_recv().unwrap().error.as_deref(),
            Some("PLC not connected")
        );
    }
}
