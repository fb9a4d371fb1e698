use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::PlcConfig;
use crate::models::SensorSnapshot;
use crate::status::Readiness;
use crate::utils::RateLimiter;

use super::{decode_sensors, write_bit, CommandDispatcher, PlcClient, PlcConnector, PlcError};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "plc";

use crate::{log_debug, log_error, log_info, log_warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const READ_FAILURE_LOG_EVERY: u64 = 200;

/// Owns the PLC link for the lifetime of a run.
///
/// Every cycle it reads the sensor bytes into the shared snapshot and
/// drains the intent queue. It raises the lights and app-ready outputs once
/// every model is loaded and lowers them before disconnecting.
pub struct PlcGateway {
    config: PlcConfig,
    connector: Arc<dyn PlcConnector>,
    sensors: watch::Sender<SensorSnapshot>,
    dispatcher: CommandDispatcher,
    readiness: Readiness,
}

pub struct GatewayHandle {
    thread: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("PLC gateway thread panicked")),
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

struct Link {
    client: Option<Box<dyn PlcClient>>,
    consecutive_failures: u32,
    next_attempt: Instant,
    indicators_on: bool,
}

impl PlcGateway {
    pub fn new(
        config: PlcConfig,
        connector: Arc<dyn PlcConnector>,
        sensors: watch::Sender<SensorSnapshot>,
        dispatcher: CommandDispatcher,
        readiness: Readiness,
    ) -> Self {
        Self {
            config,
            connector,
            sensors,
            dispatcher,
            readiness,
        }
    }

    /// Starts polling on a dedicated thread with an already connected
    /// client. The thread exits once `cancel` fires.
    pub fn spawn(self, client: Box<dyn PlcClient>, cancel: CancellationToken) -> Result<GatewayHandle> {
        let thread = thread::Builder::new()
            .name("plc-gateway".into())
            .spawn(move || self.run(client, cancel))
            .context("failed to spawn PLC gateway thread")?;
        Ok(GatewayHandle {
            thread: Some(thread),
        })
    }

    fn run(mut self, client: Box<dyn PlcClient>, cancel: CancellationToken) {
        let (span_start, span_len) = self.config.bits.input_span();
        let poll_interval = self.config.poll_interval();
        let mut read_failures = RateLimiter::new(READ_FAILURE_LOG_EVERY);
        let mut link = Link {
            client: Some(client),
            consecutive_failures: 0,
            next_attempt: Instant::now(),
            indicators_on: false,
        };
        self.readiness.set_plc_connected(true);
        log_info!(
            "gateway polling DB{} bytes {}..{} every {:?}",
            self.config.db_number,
            span_start,
            span_start + span_len,
            poll_interval
        );

        while !cancel.is_cancelled() {
            let cycle_start = Instant::now();

            if link.client.is_none() {
                self.dispatcher.discard("PLC not connected");
                self.try_reconnect(&mut link);
            }

            if let Some(client) = link.client.as_mut() {
                let polled = client
                    .read_area(self.config.db_number, span_start, span_len)
                    .and_then(|bytes| decode_sensors(&self.config.bits, span_start, &bytes));

                match polled {
                    Ok(snapshot) => {
                        if link.consecutive_failures > 0 {
                            log_info!("PLC reads recovered after {} failures", link.consecutive_failures);
                        }
                        link.consecutive_failures = 0;
                        read_failures.reset();
                        self.sensors.send_replace(snapshot);
                    }
                    Err(err) => {
                        link.consecutive_failures += 1;
                        if read_failures.hit() {
                            log_warn!(
                                "PLC read failed ({} in a row): {err}",
                                link.consecutive_failures
                            );
                        }
                    }
                }
            }

            if link.consecutive_failures >= self.config.reconnect_after_failures.max(1) {
                self.drop_link(&mut link);
            }

            if let Some(client) = link.client.as_mut() {
                if !link.indicators_on && self.readiness.all_models_loaded() {
                    match self.set_indicators(client.as_mut(), true) {
                        Ok(()) => {
                            link.indicators_on = true;
                            log_info!("lights and app-ready raised");
                        }
                        Err(err) => log_warn!("failed to raise lights/app-ready: {err}"),
                    }
                }
                self.dispatcher.drain(client.as_mut());
            }

            let elapsed = cycle_start.elapsed();
            if elapsed < poll_interval {
                thread::sleep(poll_interval - elapsed);
            }
        }

        self.shutdown(link);
    }

    fn try_reconnect(&self, link: &mut Link) {
        if Instant::now() < link.next_attempt {
            return;
        }
        match self.connector.connect() {
            Ok(client) => {
                log_info!("PLC reconnected");
                link.client = Some(client);
                link.consecutive_failures = 0;
                link.indicators_on = false;
                self.readiness.set_plc_connected(true);
            }
            Err(err) => {
                log_debug!("PLC reconnect failed: {err}");
                link.next_attempt = Instant::now() + RECONNECT_DELAY;
            }
        }
    }

    fn drop_link(&self, link: &mut Link) {
        if let Some(mut client) = link.client.take() {
            log_error!(
                "dropping PLC link after {} consecutive read failures",
                link.consecutive_failures
            );
            client.disconnect();
        }
        link.consecutive_failures = 0;
        link.indicators_on = false;
        link.next_attempt = Instant::now();
        self.readiness.set_plc_connected(false);
    }

    fn set_indicators(&self, client: &mut dyn PlcClient, on: bool) -> Result<(), PlcError> {
        for address in self.config.bits.indicators() {
            write_bit(client, self.config.db_number, address, on)?;
        }
        Ok(())
    }

    fn shutdown(mut self, mut link: Link) {
        if let Some(mut client) = link.client.take() {
            // Drain first so nothing queued is lost silently.
            self.dispatcher.drain(client.as_mut());
            match self.set_indicators(client.as_mut(), false) {
                Ok(()) => log_info!("lights and app-ready lowered"),
                Err(err) => log_error!("failed to lower lights/app-ready: {err}"),
            }
            client.disconnect();
        } else {
            self.dispatcher.discard("PLC not connected");
        }
        self.readiness.set_plc_connected(false);
        log_info!("gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlcBitMap;
    use crate::models::{Action, Intent, Signal, Station};
    use crate::plc::{MemoryPlc, MemoryPlcConnector};
    use tokio::sync::mpsc;

    struct Rig {
        plc: MemoryPlc,
        connector: MemoryPlcConnector,
        sensors: watch::Receiver<SensorSnapshot>,
        intents: mpsc::UnboundedSender<Intent>,
        readiness: Readiness,
        handle: GatewayHandle,
        cancel: CancellationToken,
    }

    fn start(reconnect_after_failures: u32) -> Rig {
        let plc = MemoryPlc::new(86, 3);
        let connector = MemoryPlcConnector::new(plc.clone());
        let config = PlcConfig {
            poll_interval_ms: 1,
            reconnect_after_failures,
            ..PlcConfig::default()
        };
        let (sensor_tx, sensors) = watch::channel(SensorSnapshot::default());
        let (intents, intent_rx) = mpsc::unbounded_channel();
        let readiness = Readiness::new(false);
        let dispatcher = CommandDispatcher::new(86, config.bits.clone(), intent_rx, None);
        let gateway = PlcGateway::new(
            config,
            Arc::new(connector.clone()),
            sensor_tx,
            dispatcher,
            readiness.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = gateway
            .spawn(Box::new(plc.client()), cancel.clone())
            .unwrap();
        Rig {
            plc,
            connector,
            sensors,
            intents,
            readiness,
            handle,
            cancel,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..1500 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn publishes_sensors_and_pulses_intents() {
        let rig = start(50);
        let bits = PlcBitMap::default();

        rig.plc.set_bit(bits.od_presence, true);
        assert!(wait_until(|| rig.sensors.borrow().get(Signal::OdPresence)));

        rig.intents
            .send(Intent {
                target: Station::Od,
                action: Action::Reject,
                roller_id: 3,
            })
            .unwrap();
        assert!(wait_until(|| rig.plc.pulse_count(bits.reject_od) == 1));
        // input bit sharing the actuator byte survives the read-modify-write
        assert!(rig.plc.bit(bits.od_presence));

        rig.cancel.cancel();
        rig.handle.join().unwrap();
        assert!(!rig.readiness.plc_connected());
    }

    #[test]
    fn indicators_wait_for_models_and_drop_on_stop() {
        let rig = start(50);
        let bits = PlcBitMap::default();

        thread::sleep(Duration::from_millis(20));
        assert!(!rig.plc.bit(bits.lights));

        rig.readiness.set_model_loaded(Station::Bigface, true);
        rig.readiness.set_model_loaded(Station::Od, true);
        assert!(wait_until(|| rig.plc.bit(bits.lights) && rig.plc.bit(bits.app_ready)));

        rig.cancel.cancel();
        rig.handle.join().unwrap();
        assert!(!rig.plc.bit(bits.lights));
        assert!(!rig.plc.bit(bits.app_ready));
    }

    #[test]
    fn reconnects_after_repeated_read_failures() {
        let rig = start(3);
        assert!(wait_until(|| rig.readiness.plc_connected()));
        assert_eq!(rig.plc.connections(), 1);

        rig.connector.set_refuse(true);
        rig.plc.fail_next_reads(3);
        assert!(wait_until(|| !rig.readiness.plc_connected()));

        rig.connector.set_refuse(false);
        assert!(wait_until(|| rig.readiness.plc_connected()));
        assert_eq!(rig.plc.connections(), 2);

        rig.cancel.cancel();
        rig.handle.join().unwrap();
    }
}
