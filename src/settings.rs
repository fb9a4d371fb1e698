use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::models::Station;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "settings";

use crate::log_warn;

/// Values the operator may change while the line is running. Station loops
/// read them on every inference call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorSettings {
    pub bigface_confidence: f32,
    pub od_confidence: f32,
    pub head_confidence: f32,
    /// Save every inferred frame, not only defect frames.
    pub allow_all_images: bool,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            bigface_confidence: 0.25,
            od_confidence: 0.25,
            head_confidence: 0.7,
            allow_all_images: false,
        }
    }
}

impl OperatorSettings {
    pub fn confidence(&self, station: Station) -> f32 {
        match station {
            Station::Bigface => self.bigface_confidence,
            Station::Od => self.od_confidence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("bigfaceConfidence", self.bigface_confidence),
            ("odConfidence", self.od_confidence),
            ("headConfidence", self.head_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within 0.0..=1.0, got {value}");
            }
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<OperatorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<OperatorSettings>(&contents) {
                Ok(settings) if settings.validate().is_ok() => settings,
                Ok(_) | Err(_) => {
                    log_warn!(
                        "settings file {} is invalid, using defaults",
                        path.display()
                    );
                    OperatorSettings::default()
                }
            }
        } else {
            OperatorSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Store that is never written to disk.
    pub fn in_memory(settings: OperatorSettings) -> Self {
        Self {
            path: None,
            data: RwLock::new(settings),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, OperatorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, OperatorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> OperatorSettings {
        self.read().clone()
    }

    pub fn confidence(&self, station: Station) -> f32 {
        self.read().confidence(station)
    }

    pub fn head_confidence(&self) -> f32 {
        self.read().head_confidence
    }

    pub fn allow_all_images(&self) -> bool {
        self.read().allow_all_images
    }

    pub fn update(&self, settings: OperatorSettings) -> Result<()> {
        settings.validate()?;
        {
            let mut guard = self.write();
            *guard = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    pub fn set_confidence(&self, station: Station, value: f32) -> Result<()> {
        let mut settings = self.current();
        match station {
            Station::Bigface => settings.bigface_confidence = value,
            Station::Od => settings.od_confidence = value,
        }
        self.update(settings)
    }

    pub fn set_allow_all_images(&self, enabled: bool) -> Result<()> {
        let mut settings = self.current();
        settings.allow_all_images = enabled;
        self.update(settings)
    }

    fn persist(&self, data: &OperatorSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = fs::read_to_string(path)?;
        let data: OperatorSettings = serde_json::from_str(&contents)?;
        data.validate()?;
        *self.write() = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("rollerline-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn updates_persist_and_reload() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.current(), OperatorSettings::default());

        store.set_confidence(Station::Od, 0.4).unwrap();
        store.set_allow_all_images(true).unwrap();

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.confidence(Station::Od), 0.4);
        assert_eq!(reopened.confidence(Station::Bigface), 0.25);
        assert!(reopened.allow_all_images());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let store = SettingsStore::in_memory(OperatorSettings::default());
        assert!(store.set_confidence(Station::Bigface, 1.5).is_err());
        assert_eq!(store.confidence(Station::Bigface), 0.25);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = temp_path();
        fs::write(&path, "{ not json").unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.head_confidence(), 0.7);
        fs::remove_file(path).unwrap();
    }
}
