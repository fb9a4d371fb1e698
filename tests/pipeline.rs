//! Whole-line runs against the in-memory PLC and replayed detector output.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;
use rollerline_lib::config::{AppConfig, CameraConfig};
use rollerline_lib::db::{Database, RunStatus, VerdictOutcome};
use rollerline_lib::detector::{Detector, DetectorLoader, RawDetection, ReplayDetector, ReplayModel};
use rollerline_lib::frame::{CameraOpener, FrameSource, StillImageSource};
use rollerline_lib::models::{Action, BBox, Station};
use rollerline_lib::plc::{MemoryPlc, MemoryPlcConnector, PlcBitMap};
use rollerline_lib::settings::{OperatorSettings, SettingsStore};
use rollerline_lib::status::StationStatus;
use rollerline_lib::supervisor::{Backends, InspectionController};

const ROLLER: u32 = 0;
const RUST: u32 = 1;

struct ScriptedLoader {
    models: HashMap<PathBuf, ReplayModel>,
}

impl DetectorLoader for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Detector>> {
        let model = self
            .models
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no model at {}", path.display()))?;
        Ok(Box::new(ReplayDetector::new(model)))
    }
}

struct BlankCameras;

impl CameraOpener for BlankCameras {
    fn open(&self, _station: Station, _source: &Path, camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
        let image = RgbImage::new(camera.width, camera.height);
        Ok(Box::new(StillImageSource::from_image(image, 200)))
    }
}

fn roller_box() -> RawDetection {
    RawDetection {
        class_id: ROLLER,
        bbox: BBox::new(0.0, 0.0, 60.0, 40.0),
        confidence: 0.95,
    }
}

fn rust_box() -> RawDetection {
    RawDetection {
        class_id: RUST,
        bbox: BBox::new(10.0, 10.0, 20.0, 20.0),
        confidence: 0.9,
    }
}

fn model(frame: Vec<RawDetection>) -> ReplayModel {
    ReplayModel {
        classes: vec!["roller".into(), "rust".into()],
        frames: vec![frame],
    }
}

struct Line {
    controller: InspectionController,
    connector: MemoryPlcConnector,
    plc: MemoryPlc,
    bits: PlcBitMap,
}

fn line(bigface: Option<ReplayModel>, od: Option<ReplayModel>) -> Line {
    line_with(bigface, od, |_| {})
}

fn line_with(bigface: Option<ReplayModel>, od: Option<ReplayModel>, adjust: impl FnOnce(&mut AppConfig)) -> Line {
    let mut config = AppConfig::default();
    config.camera = CameraConfig {
        width: 64,
        height: 48,
        fps: 200,
    };
    config.plc.poll_interval_ms = 2;
    config.head.enabled = false;
    for station in [&mut config.bigface, &mut config.od] {
        station.warmup_image = None;
        station.warmup_runs = 1;
    }
    config.bigface.model_path = PathBuf::from("bigface-model");
    config.od.model_path = PathBuf::from("od-model");
    adjust(&mut config);

    let mut models = HashMap::new();
    if let Some(bigface) = bigface {
        models.insert(config.bigface.model_path.clone(), bigface);
    }
    if let Some(od) = od {
        models.insert(config.od.model_path.clone(), od);
    }

    let plc = MemoryPlc::new(config.plc.db_number, 8);
    let connector = MemoryPlcConnector::new(plc.clone());
    let bits = config.plc.bits.clone();
    let backends = Backends {
        plc: Arc::new(connector.clone()),
        detectors: Arc::new(ScriptedLoader { models }),
        cameras: Arc::new(BlankCameras),
        images: None,
    };
    let controller = InspectionController::new(
        config,
        backends,
        Database::in_memory().unwrap(),
        Arc::new(SettingsStore::in_memory(OperatorSettings::default())),
    );

    Line {
        controller,
        connector,
        plc,
        bits,
    }
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

impl Line {
    async fn wait_ready(&self) {
        let plc = self.plc.clone();
        let lights = self.bits.lights;
        assert!(eventually(|| { let plc = plc.clone(); async move { plc.bit(lights) } }).await);
    }

    /// Holds a sensor high for a few poll cycles, then drops it.
    async fn pulse_sensor(&self, address: rollerline_lib::plc::BitAddress) {
        self.plc.set_bit(address, true);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.plc.set_bit(address, false);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    async fn pulses(&self, station: Station, action: Action, expected: usize) -> bool {
        let plc = self.plc.clone();
        let address = self.bits.actuator(station, action);
        eventually(|| {
            let plc = plc.clone();
            async move { plc.pulse_count(address) == expected }
        })
        .await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn defective_roller_is_rejected_once_at_bigface() {
    let line = line(
        Some(model(vec![roller_box(), rust_box()])),
        Some(model(vec![roller_box()])),
    );
    let run_id = line.controller.start().await.unwrap();
    line.wait_ready().await;

    // Bigface sees the roller with a rust spot.
    line.plc.set_bit(line.bits.bigface_presence, true);
    let controller = line.controller.clone();
    assert!(eventually(|| {
        let controller = controller.clone();
        async move { controller.stats().await.bigface.frames_inferred > 0 }
    })
    .await);
    line.plc.set_bit(line.bits.bigface_presence, false);

    // Entering the OD zone finalizes the bigface verdict.
    line.plc.set_bit(line.bits.od_presence, true);
    assert!(eventually(|| {
        let controller = controller.clone();
        async move { controller.stats().await.bigface.inspected == 1 }
    })
    .await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    line.plc.set_bit(line.bits.od_presence, false);

    // The bigface slot rejects it; OD finalizes and withholds its command.
    line.pulse_sensor(line.bits.bigface_slot).await;
    assert!(line.pulses(Station::Bigface, Action::Reject, 1).await);
    assert!(eventually(|| {
        let controller = controller.clone();
        async move { controller.stats().await.od.upstream_skips == 1 }
    })
    .await);

    line.pulse_sensor(line.bits.od_slot).await;
    assert_eq!(line.plc.pulse_count(line.bits.accept_od), 0);
    assert_eq!(line.plc.pulse_count(line.bits.reject_od), 0);
    assert_eq!(line.plc.pulse_count(line.bits.accept_bigface), 0);

    let stats = line.controller.stop().await.unwrap().unwrap();
    assert_eq!(stats.bigface.defective, 1);
    assert_eq!(stats.bigface.defect_breakdown.get("rust"), Some(&1));
    assert_eq!(stats.od.inspected, 1);
    assert_eq!(stats.pulses_issued, 1);
    assert!(!line.plc.bit(line.bits.lights));
    assert!(!line.plc.bit(line.bits.app_ready));

    let db = line.controller.database().clone();
    assert!(eventually(|| {
        let db = db.clone();
        let run_id = run_id.clone();
        async move { db.list_verdicts(&run_id).await.map(|v| v.len() == 2).unwrap_or(false) }
    })
    .await);
    let verdicts = db.list_verdicts(&run_id).await.unwrap();
    let od = verdicts.iter().find(|v| v.station == Station::Od).unwrap();
    assert_eq!(od.outcome, VerdictOutcome::SkippedUpstreamReject);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn good_roller_is_accepted_at_both_stations() {
    let line = line(Some(model(vec![roller_box()])), Some(model(vec![roller_box()])));
    line.controller.start().await.unwrap();
    line.wait_ready().await;

    line.pulse_sensor(line.bits.bigface_presence).await;
    line.pulse_sensor(line.bits.od_presence).await;
    let controller = line.controller.clone();
    assert!(eventually(|| {
        let controller = controller.clone();
        async move { controller.stats().await.bigface.inspected == 1 }
    })
    .await);

    line.pulse_sensor(line.bits.bigface_slot).await;
    assert!(line.pulses(Station::Bigface, Action::Accept, 1).await);

    line.pulse_sensor(line.bits.od_slot).await;
    assert!(line.pulses(Station::Od, Action::Accept, 1).await);
    assert_eq!(line.plc.pulse_count(line.bits.reject_od), 0);

    let stats = line.controller.stop().await.unwrap().unwrap();
    assert_eq!(stats.total_inspected, 2);
    assert_eq!(stats.total_defective, 0);
    assert_eq!(stats.pulses_issued, 2);
}

#[tokio::test]
async fn refused_plc_aborts_start() {
    let line = line(Some(model(vec![])), Some(model(vec![])));
    line.connector.set_refuse(true);

    assert!(line.controller.start().await.is_err());
    assert!(!line.controller.is_running().await);
    assert!(!line.controller.status().plc_connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn station_without_model_stays_down() {
    let line = line(Some(model(vec![])), None);
    line.controller.start().await.unwrap();
    assert!(line.controller.start().await.is_err());

    let status = line.controller.status();
    assert_eq!(status.bigface, StationStatus::Ready);
    assert_eq!(status.od, StationStatus::NotReady);

    // Indicators wait for every station.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!line.plc.bit(line.bits.lights));

    assert!(line.controller.stop().await.unwrap().is_some());
    assert!(line.controller.stop().await.unwrap().is_none());
}

#[tokio::test]
async fn bigface_model_without_roller_class_is_rejected() {
    let bad = ReplayModel {
        classes: vec!["rust".into()],
        frames: Vec::new(),
    };
    let line = line(Some(bad.clone()), Some(bad));
    let err = line.controller.start().await.unwrap_err();
    assert!(err.to_string().contains("no station"));
    assert!(!line.controller.is_running().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn od_roller_unknown_to_bigface_is_still_commanded() {
    let line = line(Some(model(vec![roller_box()])), Some(model(vec![roller_box()])));
    let run_id = line.controller.start().await.unwrap();
    line.wait_ready().await;

    // OD sees a roller that never passed the bigface presence sensor.
    line.pulse_sensor(line.bits.od_presence).await;
    line.pulse_sensor(line.bits.bigface_slot).await;
    let controller = line.controller.clone();
    assert!(eventually(|| {
        let controller = controller.clone();
        async move { controller.stats().await.od.handoff_violations == 1 }
    })
    .await);

    line.pulse_sensor(line.bits.od_slot).await;
    assert!(line.pulses(Station::Od, Action::Accept, 1).await);
    assert_eq!(line.plc.pulse_count(line.bits.reject_od), 0);
    assert_eq!(line.plc.pulse_count(line.bits.accept_bigface), 0);

    let stats = line.controller.stop().await.unwrap().unwrap();
    assert_eq!(stats.bigface.inspected, 0);
    assert_eq!(stats.od.inspected, 1);
    assert_eq!(stats.od.upstream_skips, 0);
    assert_eq!(stats.od.handoff_violations, 1);

    let db = line.controller.database().clone();
    assert!(eventually(|| {
        let db = db.clone();
        let run_id = run_id.clone();
        async move { db.list_verdicts(&run_id).await.map(|v| v.len() == 1).unwrap_or(false) }
    })
    .await);
    let verdicts = db.list_verdicts(&run_id).await.unwrap();
    assert_eq!(verdicts[0].station, Station::Od);
    assert_eq!(verdicts[0].outcome, VerdictOutcome::HandoffViolation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_start_leaves_nothing_behind() {
    // Models and cameras load, but a zero-sized frame channel cannot be built.
    let line = line_with(Some(model(vec![])), Some(model(vec![])), |config| {
        config.camera.width = 0;
    });

    assert!(line.controller.start().await.is_err());
    assert!(!line.controller.is_running().await);

    let status = line.controller.status();
    assert!(!status.plc_connected);
    assert_eq!(status.bigface, StationStatus::NotReady);
    assert_eq!(status.od, StationStatus::NotReady);

    let runs = line.controller.database().list_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Interrupted);
    assert!(runs[0].stopped_at.is_some());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!line.plc.bit(line.bits.lights));
    assert!(line.controller.stop().await.unwrap().is_none());
}
