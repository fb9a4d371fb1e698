use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::{Action, Signal, Station};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "config";

use crate::log_warn;

/// Location of one bit inside the PLC data block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BitAddress {
    pub byte: u16,
    pub bit: u8,
}

impl BitAddress {
    pub const fn new(byte: u16, bit: u8) -> Self {
        Self { byte, bit }
    }

    pub fn mask(&self) -> u8 {
        1 << self.bit
    }

    /// Reads this bit out of a byte range that starts at `start`.
    pub fn read(&self, start: u16, bytes: &[u8]) -> Option<bool> {
        let index = self.byte.checked_sub(start)? as usize;
        bytes.get(index).map(|byte| byte & self.mask() != 0)
    }

    pub fn apply(&self, byte: u8, value: bool) -> u8 {
        if value {
            byte | self.mask()
        } else {
            byte & !self.mask()
        }
    }
}

/// Sensor and actuator bit table for the data block. Defaults are the
/// reference wiring of the line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlcBitMap {
    pub bigface_presence: BitAddress,
    pub bigface_slot: BitAddress,
    pub od_slot: BitAddress,
    pub od_presence: BitAddress,
    pub head_classify: BitAddress,
    pub lights: BitAddress,
    pub app_ready: BitAddress,
    pub accept_bigface: BitAddress,
    pub reject_bigface: BitAddress,
    pub accept_od: BitAddress,
    pub reject_od: BitAddress,
}

impl Default for PlcBitMap {
    fn default() -> Self {
        Self {
            bigface_presence: BitAddress::new(0, 1),
            bigface_slot: BitAddress::new(0, 2),
            od_slot: BitAddress::new(0, 0),
            od_presence: BitAddress::new(1, 4),
            head_classify: BitAddress::new(2, 2),
            lights: BitAddress::new(1, 6),
            app_ready: BitAddress::new(1, 7),
            accept_bigface: BitAddress::new(1, 0),
            reject_bigface: BitAddress::new(1, 1),
            accept_od: BitAddress::new(1, 2),
            reject_od: BitAddress::new(1, 3),
        }
    }
}

impl PlcBitMap {
    pub fn input(&self, signal: Signal) -> BitAddress {
        match signal {
            Signal::BigfacePresence => self.bigface_presence,
            Signal::BigfaceSlot => self.bigface_slot,
            Signal::OdPresence => self.od_presence,
            Signal::OdSlot => self.od_slot,
            Signal::HeadClassify => self.head_classify,
        }
    }

    pub fn actuator(&self, target: Station, action: Action) -> BitAddress {
        match (target, action) {
            (Station::Bigface, Action::Accept) => self.accept_bigface,
            (Station::Bigface, Action::Reject) => self.reject_bigface,
            (Station::Od, Action::Accept) => self.accept_od,
            (Station::Od, Action::Reject) => self.reject_od,
        }
    }

    pub fn indicators(&self) -> [BitAddress; 2] {
        [self.lights, self.app_ready]
    }

    /// Byte range `[start, start + len)` covering every input bit.
    pub fn input_span(&self) -> (u16, u16) {
        let bytes = Signal::ALL.map(|signal| self.input(signal).byte);
        let start = bytes.iter().copied().min().unwrap_or(0);
        let end = bytes.iter().copied().max().unwrap_or(0);
        (start, end - start + 1)
    }

    fn all(&self) -> [(&'static str, BitAddress); 11] {
        [
            ("bigfacePresence", self.bigface_presence),
            ("bigfaceSlot", self.bigface_slot),
            ("odSlot", self.od_slot),
            ("odPresence", self.od_presence),
            ("headClassify", self.head_classify),
            ("lights", self.lights),
            ("appReady", self.app_ready),
            ("acceptBigface", self.accept_bigface),
            ("rejectBigface", self.reject_bigface),
            ("acceptOd", self.accept_od),
            ("rejectOd", self.reject_od),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, address) in self.all() {
            if address.bit > 7 {
                bail!("{name}: bit index {} is out of range 0..=7", address.bit);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlcConfig {
    pub address: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    pub db_number: u16,
    pub poll_interval_ms: u64,
    pub io_timeout_ms: u64,
    /// Consecutive failed reads before the link is dropped and reopened.
    pub reconnect_after_failures: u32,
    pub bits: PlcBitMap,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: "172.17.8.17".into(),
            port: 102,
            rack: 0,
            slot: 1,
            db_number: 86,
            poll_interval_ms: 5,
            io_timeout_ms: 1000,
            reconnect_after_failures: 50,
            bits: PlcBitMap::default(),
        }
    }
}

impl PlcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Capture rate used by replaying sources; real cameras pace themselves.
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 960,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StationConfig {
    pub camera_source: PathBuf,
    pub model_path: PathBuf,
    pub warmup_image: Option<PathBuf>,
    pub warmup_runs: u32,
    /// How many of the most recent roller ids a defect may be matched to.
    pub search_depth: usize,
    pub roller_label: String,
    pub roller_min_confidence: f32,
    /// Camera mounted upside down; frames are rotated 180°.
    pub flip: bool,
    pub presence: Signal,
    /// Signal whose rising edge finalizes the oldest pending roller.
    pub finalize_gate: Signal,
    pub slot: Signal,
    /// A slot high period with no verdict queued stays open until a verdict
    /// arrives or the sensor drops.
    pub slot_waits_for_verdict: bool,
    pub tick_ms: u64,
}

/// Layers a partial station block over that station's reference defaults.
fn merge_station<'de, D>(base: StationConfig, deserializer: D) -> std::result::Result<StationConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = serde_json::Map::<String, Value>::deserialize(deserializer)?;
    let mut merged = serde_json::to_value(base).map_err(D::Error::custom)?;
    if let Value::Object(fields) = &mut merged {
        fields.extend(overrides);
    }
    serde_json::from_value(merged).map_err(D::Error::custom)
}

fn bigface_station<'de, D>(deserializer: D) -> std::result::Result<StationConfig, D::Error>
where
    D: Deserializer<'de>,
{
    merge_station(StationConfig::bigface(), deserializer)
}

fn od_station<'de, D>(deserializer: D) -> std::result::Result<StationConfig, D::Error>
where
    D: Deserializer<'de>,
{
    merge_station(StationConfig::od(), deserializer)
}

impl StationConfig {
    pub fn bigface() -> Self {
        Self {
            camera_source: PathBuf::from("assets/images/bigface.jpg"),
            model_path: PathBuf::from("models/bigface.json"),
            warmup_image: Some(PathBuf::from("assets/images/Warmup BF.jpg")),
            warmup_runs: 30,
            search_depth: 2,
            roller_label: "roller".into(),
            roller_min_confidence: 0.80,
            flip: false,
            presence: Signal::BigfacePresence,
            finalize_gate: Signal::OdPresence,
            slot: Signal::BigfaceSlot,
            slot_waits_for_verdict: false,
            tick_ms: 2,
        }
    }

    pub fn od() -> Self {
        Self {
            camera_source: PathBuf::from("assets/images/od.jpg"),
            model_path: PathBuf::from("models/od.json"),
            warmup_image: Some(PathBuf::from("assets/images/Warmup OD.jpg")),
            warmup_runs: 30,
            search_depth: 3,
            roller_label: "roller".into(),
            roller_min_confidence: 0.80,
            flip: true,
            presence: Signal::OdPresence,
            finalize_gate: Signal::BigfaceSlot,
            slot: Signal::OdSlot,
            slot_waits_for_verdict: true,
            tick_ms: 2,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HeadConfig {
    pub enabled: bool,
    pub model_path: PathBuf,
    pub warmup_runs: u32,
    pub dimple_class: u32,
    pub rim_class: u32,
    /// Distances below this are "High Head".
    pub high_head_below: f32,
    /// Distances above this are "Down Head".
    pub down_head_above: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("models/head.json"),
            warmup_runs: 30,
            dimple_class: 0,
            rim_class: 1,
            high_head_below: 180.0,
            down_head_above: 240.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_images: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("inspection_images"),
            max_images: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub plc: PlcConfig,
    pub camera: CameraConfig,
    #[serde(deserialize_with = "bigface_station")]
    pub bigface: StationConfig,
    #[serde(deserialize_with = "od_station")]
    pub od: StationConfig,
    pub head: HeadConfig,
    pub storage: StorageConfig,
    pub database_path: PathBuf,
    pub settings_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            plc: PlcConfig::default(),
            camera: CameraConfig::default(),
            bigface: StationConfig::bigface(),
            od: StationConfig::od(),
            head: HeadConfig::default(),
            storage: StorageConfig::default(),
            database_path: PathBuf::from("rollerline.sqlite3"),
            settings_path: PathBuf::from("settings.json"),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Missing file falls back to defaults; a present but broken file is an
    /// error so a typo never silently reverts the line to reference wiring.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log_warn!(
                "config file {} not found, using reference defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn station(&self, station: Station) -> &StationConfig {
        match station {
            Station::Bigface => &self.bigface,
            Station::Od => &self.od,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.plc.bits.validate()?;
        for station in Station::ALL {
            let cfg = self.station(station);
            if cfg.search_depth == 0 {
                bail!("{station}: searchDepth must be at least 1");
            }
            if cfg.presence == cfg.finalize_gate {
                bail!("{station}: presence and finalizeGate must be different signals");
            }
        }
        if self.head.high_head_below > self.head.down_head_above {
            bail!("head: highHeadBelow must not exceed downHeadAbove");
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            bail!("camera: frame dimensions must be non-zero");
        }
        Ok(())
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::bigface()
    }
}
