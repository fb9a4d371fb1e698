//! Detector that replays recorded outputs from a JSON file.
//!
//! Used for commissioning the line without a GPU and for driving the
//! pipeline in tests. The file lists the class names and a sequence of
//! per-frame outputs that is cycled on every inference call:
//!
//! ```json
//! {
//!   "classes": ["roller", "rust"],
//!   "frames": [
//!     [{ "classId": 0, "bbox": { "x1": 0, "y1": 0, "x2": 400, "y2": 400 }, "confidence": 0.93 }]
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::{Detector, DetectorLoader, RawDetection};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayModel {
    pub classes: Vec<String>,
    #[serde(default)]
    pub frames: Vec<Vec<RawDetection>>,
}

#[derive(Default)]
struct Script {
    frames: Vec<Vec<RawDetection>>,
    cursor: usize,
    calls: u64,
}

/// Handle for swapping the replayed outputs while the detector runs.
#[derive(Clone, Default)]
pub struct ReplayHandle {
    script: Arc<Mutex<Script>>,
}

impl ReplayHandle {
    pub fn set_frames(&self, frames: Vec<Vec<RawDetection>>) {
        let mut script = self.script.lock().unwrap_or_else(|p| p.into_inner());
        script.frames = frames;
        script.cursor = 0;
    }

    pub fn calls(&self) -> u64 {
        self.script.lock().unwrap_or_else(|p| p.into_inner()).calls
    }
}

pub struct ReplayDetector {
    classes: Vec<String>,
    handle: ReplayHandle,
}

impl ReplayDetector {
    pub fn new(model: ReplayModel) -> Self {
        let detector = Self {
            classes: model.classes,
            handle: ReplayHandle::default(),
        };
        detector.handle.set_frames(model.frames);
        detector
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay model {}", path.display()))?;
        let model: ReplayModel = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse replay model {}", path.display()))?;
        if model.classes.is_empty() {
            bail!("replay model {} declares no classes", path.display());
        }
        Ok(Self::new(model))
    }

    pub fn handle(&self) -> ReplayHandle {
        self.handle.clone()
    }
}

impl Detector for ReplayDetector {
    fn class_names(&self) -> &[String] {
        &self.classes
    }

    fn infer(&mut self, _image: &RgbImage, confidence: f32) -> Result<Vec<RawDetection>> {
        let mut script = self.handle.script.lock().unwrap_or_else(|p| p.into_inner());
        script.calls += 1;
        if script.frames.is_empty() {
            return Ok(Vec::new());
        }

        let index = script.cursor % script.frames.len();
        script.cursor = script.cursor.wrapping_add(1);
        Ok(script.frames[index]
            .iter()
            .filter(|det| det.confidence >= confidence)
            .copied()
            .collect())
    }
}

/// Loads every model path as a [`ReplayDetector`] file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayLoader;

impl DetectorLoader for ReplayLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn super::Detector>> {
        Ok(Box::new(ReplayDetector::from_file(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    #[test]
    fn cycles_recorded_frames() {
        let model: ReplayModel = serde_json::from_str(
            r#"{
                "classes": ["roller", "rust"],
                "frames": [
                    [{ "classId": 0, "bbox": { "x1": 0, "y1": 0, "x2": 10, "y2": 10 }, "confidence": 0.9 }],
                    []
                ]
            }"#,
        )
        .unwrap();
        let mut detector = ReplayDetector::new(model);
        let image = RgbImage::new(1, 1);

        assert_eq!(detector.infer(&image, 0.25).unwrap().len(), 1);
        assert_eq!(detector.infer(&image, 0.25).unwrap().len(), 0);
        assert_eq!(detector.infer(&image, 0.95).unwrap().len(), 0);
        assert_eq!(detector.handle().calls(), 3);
    }

    #[test]
    fn handle_replaces_script() {
        let mut detector = ReplayDetector::new(ReplayModel {
            classes: vec!["roller".into()],
            frames: Vec::new(),
        });
        let handle = detector.handle();
        assert!(detector.infer(&RgbImage::new(1, 1), 0.0).unwrap().is_empty());

        handle.set_frames(vec![vec![RawDetection {
            class_id: 0,
            bbox: BBox::new(1.0, 1.0, 2.0, 2.0),
            confidence: 0.5,
        }]]);
        assert_eq!(detector.infer(&RgbImage::new(1, 1), 0.0).unwrap().len(), 1);
    }

    #[test]
    fn loader_reads_model_file() {
        let path = std::env::temp_dir().join(format!("replay-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{ "classes": ["Roller", "Crack"] }"#).unwrap();
        let detector = ReplayLoader.load(&path).unwrap();
        assert_eq!(detector.class_names(), ["Roller".to_string(), "Crack".to_string()]);
        fs::remove_file(&path).unwrap();

        assert!(ReplayLoader.load(&path).is_err());
    }
}
