use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use image::RgbImage;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, StationConfig};
use crate::db::{Database, InspectionRun, Journal, RunStatus};
use crate::detector::{DetectorAdapter, DetectorLoader, HeadClassifier, SharedDetector};
use crate::frame::{spawn_capture, CameraOpener, FrameChannel, FrameSource};
use crate::handoff::HandoffTable;
use crate::metrics::{InspectionStats, StatsSnapshot};
use crate::models::{Intent, SensorSnapshot, Station};
use crate::plc::{report_loop, CommandDispatcher, GatewayHandle, PlcClient, PlcConnector, PlcGateway};
use crate::settings::SettingsStore;
use crate::slot::{slot_loop, SlotGate};
use crate::status::{Readiness, StatusSnapshot};
use crate::storage::ImageStore;
use crate::tracker::{station_loop, HandoffRole, HeadStage, StationContext};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "supervisor";

use crate::{log_error, log_info, log_warn};

/// External capabilities the controller plugs together.
#[derive(Clone)]
pub struct Backends {
    pub plc: Arc<dyn PlcConnector>,
    pub detectors: Arc<dyn DetectorLoader>,
    pub cameras: Arc<dyn CameraOpener>,
    pub images: Option<Arc<dyn ImageStore>>,
}

/// A station whose model and camera came up.
struct StationParts {
    station: Station,
    detector: SharedDetector,
    head: Option<HeadStage>,
    source: Box<dyn FrameSource>,
}

/// Workers spawned so far while the line comes up.
struct Started {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    captures: Vec<thread::JoinHandle<()>>,
    detectors: Vec<SharedDetector>,
}

/// Channel ends every station's workers share.
struct Lanes {
    sensors: watch::Receiver<SensorSnapshot>,
    intents: mpsc::UnboundedSender<Intent>,
    journal: Journal,
}

struct RunningLine {
    run_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    captures: Vec<thread::JoinHandle<()>>,
    gateway: GatewayHandle,
    reports: JoinHandle<()>,
    detectors: Vec<SharedDetector>,
}

/// Starts and stops every unit of the line as one run.
#[derive(Clone)]
pub struct InspectionController {
    config: Arc<AppConfig>,
    backends: Backends,
    db: Database,
    settings: Arc<SettingsStore>,
    stats: InspectionStats,
    readiness: Readiness,
    running: Arc<Mutex<Option<RunningLine>>>,
}

impl InspectionController {
    pub fn new(config: AppConfig, backends: Backends, db: Database, settings: Arc<SettingsStore>) -> Self {
        let readiness = Readiness::new(config.head.enabled);
        Self {
            config: Arc::new(config),
            backends,
            db,
            settings,
            stats: InspectionStats::new(),
            readiness,
            running: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn current_run_id(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|line| line.run_id.clone())
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.stats.get_snapshot().await
    }

    pub fn status(&self) -> StatusSnapshot {
        self.readiness.snapshot()
    }

    /// Brings the line up. Returns the id of the new run.
    pub async fn start(&self) -> Result<String> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            bail!("inspection already running");
        }
        self.readiness.clear();

        let connector = Arc::clone(&self.backends.plc);
        let client = tokio::task::spawn_blocking(move || connector.connect())
            .await
            .context("PLC connect worker join failed")?
            .map_err(|err| anyhow!(err))
            .with_context(|| {
                format!(
                    "failed to connect to PLC at {}:{}",
                    self.config.plc.address, self.config.plc.port
                )
            })?;
        self.readiness.set_plc_connected(true);
        log_info!("PLC connected at {}:{}", self.config.plc.address, self.config.plc.port);

        match self.launch(client).await {
            Ok(line) => {
                let run_id = line.run_id.clone();
                log_info!("inspection run {run_id} started");
                *running = Some(line);
                Ok(run_id)
            }
            Err(err) => {
                self.readiness.clear();
                Err(err)
            }
        }
    }

    async fn launch(&self, client: Box<dyn PlcClient>) -> Result<RunningLine> {
        let now = Utc::now();
        let stale = self.db.interrupt_running_runs(now).await?;
        if stale > 0 {
            log_warn!("marked {stale} unfinished run(s) as Interrupted");
        }
        let run = InspectionRun::start(now);
        self.db.insert_run(&run).await?;
        let journal = Journal::new(self.db.clone(), run.id.clone());
        self.stats.reset().await;

        let mut loaded = Vec::new();
        for station in Station::ALL {
            match self.prepare_station(station).await {
                Ok(parts) => {
                    self.readiness.set_model_loaded(station, true);
                    if parts.head.is_some() {
                        self.readiness.set_head_loaded(true);
                    }
                    loaded.push(parts);
                }
                Err(err) => log_error!("{station} station will not run: {err:#}"),
            }
        }

        if loaded.is_empty() {
            self.close_run(&run.id, RunStatus::Interrupted).await?;
            bail!("no station could load its detector");
        }

        let mut started = Started {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            captures: Vec::new(),
            detectors: loaded
                .iter()
                .flat_map(|parts| {
                    let head = parts.head.as_ref().map(|head| head.detector.clone());
                    std::iter::once(parts.detector.clone()).chain(head)
                })
                .collect(),
        };

        let (sensor_tx, sensor_rx) = watch::channel(SensorSnapshot::default());
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let lanes = Lanes {
            sensors: sensor_rx,
            intents: intent_tx,
            journal: journal.clone(),
        };

        if let Err(err) = self.spawn_stations(loaded, &lanes, &mut started) {
            self.abandon(started, &run.id).await;
            return Err(err);
        }
        drop(lanes);

        let dispatcher = CommandDispatcher::new(
            self.config.plc.db_number,
            self.config.plc.bits.clone(),
            intent_rx,
            Some(report_tx),
        );
        let gateway = PlcGateway::new(
            self.config.plc.clone(),
            Arc::clone(&self.backends.plc),
            sensor_tx,
            dispatcher,
            self.readiness.clone(),
        );
        let gateway = match gateway.spawn(client, started.cancel.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                self.abandon(started, &run.id).await;
                return Err(err);
            }
        };
        let reports = tokio::spawn(report_loop(report_rx, self.stats.clone(), Some(journal)));

        Ok(RunningLine {
            run_id: run.id,
            cancel: started.cancel,
            tasks: started.tasks,
            captures: started.captures,
            gateway,
            reports,
            detectors: started.detectors,
        })
    }

    /// Spawns capture, tracking and slot workers for every loaded station.
    fn spawn_stations(&self, loaded: Vec<StationParts>, lanes: &Lanes, started: &mut Started) -> Result<()> {
        let handoff = HandoffTable::new();
        let bigface_running = loaded.iter().any(|parts| parts.station == Station::Bigface);

        for parts in loaded {
            let station = parts.station;
            let config = self.config.station(station).clone();

            let frames = FrameChannel::new(self.config.camera.width, self.config.camera.height)?;
            let capture = spawn_capture(station, parts.source, frames.clone(), config.flip, started.cancel.clone())?;
            started.captures.push(capture);

            let handoff = match station {
                Station::Bigface => HandoffRole::Publish(handoff.clone()),
                Station::Od if bigface_running => HandoffRole::Consume(handoff.clone()),
                Station::Od => {
                    log_warn!("bigface is down, od verdicts are forwarded without handoff");
                    HandoffRole::Standalone
                }
            };

            let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();
            let gate = SlotGate::new(station, verdict_rx).waiting_for_verdict(config.slot_waits_for_verdict);
            let context = StationContext {
                station,
                config: config.clone(),
                sensors: lanes.sensors.clone(),
                frames,
                detector: parts.detector,
                head: parts.head,
                settings: Arc::clone(&self.settings),
                verdicts: verdict_tx,
                handoff,
                stats: self.stats.clone(),
                images: self.backends.images.clone(),
                journal: Some(lanes.journal.clone()),
            };
            started.tasks.push(tokio::spawn(station_loop(context, started.cancel.clone())));
            started.tasks.push(tokio::spawn(slot_loop(
                gate,
                config.slot,
                lanes.sensors.clone(),
                lanes.intents.clone(),
                config.tick(),
                started.cancel.clone(),
            )));
        }
        Ok(())
    }

    /// Tears down a half-started line and closes its run as interrupted.
    async fn abandon(&self, started: Started, run_id: &str) {
        started.cancel.cancel();
        for task in started.tasks {
            if let Err(err) = task.await {
                log_error!("worker task ended abnormally: {err}");
            }
        }

        let captures = started.captures;
        let joined = tokio::task::spawn_blocking(move || {
            for capture in captures {
                if capture.join().is_err() {
                    log_error!("capture thread panicked");
                }
            }
        })
        .await;
        if let Err(err) = joined {
            log_error!("capture join failed: {err}");
        }

        for detector in &started.detectors {
            detector.release();
        }
        if let Err(err) = self.close_run(run_id, RunStatus::Interrupted).await {
            log_error!("failed to close run {run_id}: {err:#}");
        }
    }

    /// Shuts the line down and closes the run. A no-op when idle.
    pub async fn stop(&self) -> Result<Option<StatsSnapshot>> {
        let Some(line) = self.running.lock().await.take() else {
            log_info!("stop requested while idle");
            return Ok(None);
        };

        log_info!("stopping inspection run {}", line.run_id);
        line.cancel.cancel();

        for task in line.tasks {
            if let Err(err) = task.await {
                log_error!("worker task ended abnormally: {err}");
            }
        }

        let captures = line.captures;
        let gateway = line.gateway;
        let joined = tokio::task::spawn_blocking(move || {
            for capture in captures {
                if capture.join().is_err() {
                    log_error!("capture thread panicked");
                }
            }
            gateway.join()
        })
        .await
        .context("shutdown worker join failed")?;
        if let Err(err) = joined {
            log_error!("{err:#}");
        }

        // Ends once the dispatcher inside the gateway has been dropped.
        if let Err(err) = line.reports.await {
            log_error!("pulse report task ended abnormally: {err}");
        }

        for detector in &line.detectors {
            detector.release();
        }
        self.readiness.clear();

        self.close_run(&line.run_id, RunStatus::Completed).await?;
        let snapshot = self.stats.get_snapshot().await;
        log_info!(
            "inspection run {} completed: {} inspected, {} defective",
            line.run_id,
            snapshot.total_inspected,
            snapshot.total_defective
        );
        Ok(Some(snapshot))
    }

    async fn close_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let now = Utc::now();
        self.db.mark_run_status(run_id, status, Some(now), now).await
    }

    async fn prepare_station(&self, station: Station) -> Result<StationParts> {
        let config = self.config.station(station).clone();
        let warmup = Arc::new(self.warmup_image(&config));
        let confidence = self.settings.confidence(station);

        let detector = self
            .load_detector(station.as_str(), config.model_path.clone(), &warmup, config.warmup_runs, confidence)
            .await?;
        detector
            .lock()
            .require_class(&config.roller_label)
            .with_context(|| format!("{station} model cannot track rollers"))?;

        let head = if station == Station::Bigface && self.config.head.enabled {
            let head_detector = self
                .load_detector(
                    "head",
                    self.config.head.model_path.clone(),
                    &warmup,
                    self.config.head.warmup_runs,
                    self.settings.head_confidence(),
                )
                .await;
            match head_detector {
                Ok(head_detector) => Some(HeadStage {
                    detector: head_detector,
                    classifier: HeadClassifier::new(&self.config.head),
                }),
                Err(err) => {
                    detector.release();
                    return Err(err.context("head classifier is required for bigface"));
                }
            }
        } else {
            None
        };

        let source = match self
            .backends
            .cameras
            .open(station, &config.camera_source, &self.config.camera)
        {
            Ok(source) => source,
            Err(err) => {
                detector.release();
                if let Some(head) = &head {
                    head.detector.release();
                }
                return Err(err.context(format!("failed to open {station} camera")));
            }
        };

        Ok(StationParts {
            station,
            detector,
            head,
            source,
        })
    }

    /// Loads a model off the runtime and warms it up. Warm-up failures are
    /// logged only.
    async fn load_detector(
        &self,
        name: &'static str,
        model_path: PathBuf,
        warmup: &Arc<RgbImage>,
        runs: u32,
        confidence: f32,
    ) -> Result<SharedDetector> {
        let loader = Arc::clone(&self.backends.detectors);
        let warmup = Arc::clone(warmup);
        tokio::task::spawn_blocking(move || {
            let mut adapter = DetectorAdapter::load(name, loader.as_ref(), &model_path)?;
            match adapter.warm_up(&warmup, runs, confidence) {
                Ok(done) => log_info!("{name} model warmed up ({done}/{runs} runs)"),
                Err(err) => log_warn!("{name} warm-up failed: {err:#}"),
            }
            Ok(SharedDetector::new(adapter))
        })
        .await
        .context("model loader join failed")?
    }

    fn warmup_image(&self, config: &StationConfig) -> RgbImage {
        let (width, height) = (self.config.camera.width, self.config.camera.height);
        let Some(path) = &config.warmup_image else {
            return RgbImage::new(width, height);
        };
        match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                log_warn!("warm-up image {} unreadable, using a blank frame: {err}", path.display());
                RgbImage::new(width, height)
            }
        }
    }
}
