//! Object detector seam.
//!
//! The network itself is external; the crate only needs "image in, boxes
//! out". [`DetectorAdapter`] turns raw class ids into labels, filters by
//! confidence, runs the warm-up sequence and owns the release of the model.

pub mod head;
pub mod replay;

pub use head::{HeadClassifier, HeadError, HeadMeasurement, HeadType};
pub use replay::{ReplayDetector, ReplayHandle, ReplayLoader, ReplayModel};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::models::{BBox, Detection};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "detector";

use crate::{log_info, log_warn};

/// One box as a detector reports it, before label resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
    pub class_id: u32,
    pub bbox: BBox,
    pub confidence: f32,
}

pub trait Detector: Send {
    /// Class names indexed by class id.
    fn class_names(&self) -> &[String];

    fn infer(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<RawDetection>>;

    /// Frees device memory. Called once on shutdown.
    fn release(&mut self) {}
}

/// Opens a model file. One loader serves every station.
pub trait DetectorLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Detector>>;
}

pub struct DetectorAdapter {
    name: String,
    inner: Box<dyn Detector>,
    labels: Vec<String>,
    released: bool,
}

impl DetectorAdapter {
    pub fn new(name: impl Into<String>, inner: Box<dyn Detector>) -> Self {
        let labels = inner
            .class_names()
            .iter()
            .map(|label| normalize_label(label))
            .collect();

        Self {
            name: name.into(),
            inner,
            labels,
            released: false,
        }
    }

    pub fn load(name: impl Into<String>, loader: &dyn DetectorLoader, path: &Path) -> Result<Self> {
        let name = name.into();
        let inner = loader
            .load(path)
            .with_context(|| format!("failed to load {name} model from {}", path.display()))?;
        let adapter = Self::new(name, inner);
        log_info!(
            "{} model loaded from {} ({} classes)",
            adapter.name,
            path.display(),
            adapter.labels.len()
        );
        Ok(adapter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Class id of `label`, or an error if the model does not know it.
    pub fn require_class(&self, label: &str) -> Result<u32> {
        let wanted = normalize_label(label);
        match self.labels.iter().position(|known| *known == wanted) {
            Some(index) => Ok(index as u32),
            None => bail!("{} model has no '{}' class", self.name, label),
        }
    }

    pub fn label_for(&self, class_id: u32) -> String {
        self.labels
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    /// Runs one inference and returns labelled boxes at or above
    /// `confidence`. Boxes with non-finite or inverted coordinates are
    /// dropped.
    pub fn infer(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        if self.released {
            bail!("{} model already released", self.name);
        }

        let raw = self.inner.infer(image, confidence)?;
        Ok(raw
            .into_iter()
            .filter(|det| det.confidence >= confidence && is_valid_box(&det.bbox))
            .map(|det| Detection::new(self.label_for(det.class_id), det.class_id, det.bbox, det.confidence))
            .collect())
    }

    /// Runs `runs` throwaway inferences. Returns how many succeeded; only an
    /// all-failed warm-up is an error.
    pub fn warm_up(&mut self, image: &RgbImage, runs: u32, confidence: f32) -> Result<u32> {
        let mut succeeded = 0;
        let mut last_error = None;
        for _ in 0..runs {
            match self.inner.infer(image, confidence) {
                Ok(_) => succeeded += 1,
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            Some(err) if succeeded == 0 => {
                Err(err.context(format!("{} warm-up failed on every run", self.name)))
            }
            Some(err) => {
                log_warn!(
                    "{} warm-up: {}/{} runs failed, last error: {err:#}",
                    self.name,
                    runs - succeeded,
                    runs
                );
                Ok(succeeded)
            }
            None => Ok(succeeded),
        }
    }

    pub fn release(&mut self) {
        if !self.released {
            self.inner.release();
            self.released = true;
            log_info!("{} model released", self.name);
        }
    }
}

impl Drop for DetectorAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

fn is_valid_box(bbox: &BBox) -> bool {
    [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
        .iter()
        .all(|v| v.is_finite())
        && bbox.x2 >= bbox.x1
        && bbox.y2 >= bbox.y1
}

/// Adapter shared between the loop that owns a station and the blocking
/// pool that runs inference.
#[derive(Clone)]
pub struct SharedDetector {
    inner: Arc<Mutex<DetectorAdapter>>,
}

impl SharedDetector {
    pub fn new(adapter: DetectorAdapter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(adapter)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DetectorAdapter> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs inference on the blocking pool so the async loop keeps polling.
    pub async fn infer(&self, image: Arc<RgbImage>, confidence: f32) -> Result<Vec<Detection>> {
        let detector = self.clone();
        tokio::task::spawn_blocking(move || detector.lock().infer(&image, confidence))
            .await
            .context("inference worker join failed")?
    }

    pub fn release(&self) {
        self.lock().release();
    }
}
