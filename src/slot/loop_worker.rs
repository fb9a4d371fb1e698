use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::{Intent, SensorSnapshot, Signal};

use super::SlotGate;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "slot";

use crate::{log_error, log_info};

/// Polls the slot sensor every `tick` and forwards intents to the
/// dispatcher queue until cancelled.
pub async fn slot_loop(
    mut gate: SlotGate,
    slot: Signal,
    sensors: watch::Receiver<SensorSnapshot>,
    intents: mpsc::UnboundedSender<Intent>,
    tick: Duration,
    cancel_token: CancellationToken,
) {
    let station = gate.station();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log_info!("{station} slot controller watching {}", slot.as_str());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let level = sensors.borrow().get(slot);
                if let Some((intent, verdict)) = gate.observe(level) {
                    log_info!(
                        "{station} slot: roller {} -> {} ({})",
                        verdict.roller_id,
                        intent.action,
                        verdict.defect_names.join(", ")
                    );
                    if intents.send(intent).is_err() {
                        log_error!("{station} slot: dispatcher is gone, stopping");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("{station} slot controller shutting down");
                break;
            }
        }
    }
}
