use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::models::Station;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "storage";

use crate::{log_debug, log_warn};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ImageKind {
    /// Inferred frame with at least one defect box.
    Defect,
    /// Head frame classified high or down.
    HeadDefect,
    /// Any inferred frame, saved only when all-frame capture is on.
    All,
    /// Any head frame, saved only when all-frame capture is on.
    Head,
}

pub trait ImageStore: Send + Sync {
    fn save(&self, image: &RgbImage, station: Station, kind: ImageKind, frame_number: u64) -> Result<PathBuf>;
}

/// Writes JPEG frames under a fixed directory layout and keeps each
/// directory below `max_images` files by deleting the oldest first.
pub struct DiskImageStore {
    root: PathBuf,
    max_images: usize,
}

impl DiskImageStore {
    /// Creates every directory of the layout up front.
    pub fn new(root: impl Into<PathBuf>, max_images: usize) -> Result<Self> {
        let store = Self {
            root: root.into(),
            max_images: max_images.max(1),
        };

        for (station, kind) in [
            (Station::Bigface, ImageKind::Defect),
            (Station::Bigface, ImageKind::HeadDefect),
            (Station::Od, ImageKind::Defect),
            (Station::Bigface, ImageKind::All),
            (Station::Bigface, ImageKind::Head),
            (Station::Od, ImageKind::All),
        ] {
            let dir = store.directory(station, kind)?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create image directory {}", dir.display()))?;
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self, station: Station, kind: ImageKind) -> Result<PathBuf> {
        let relative = match (station, kind) {
            (Station::Bigface, ImageKind::Defect) => "inference/bigface/defect",
            (Station::Bigface, ImageKind::HeadDefect) => "inference/bigface/head_defect",
            (Station::Od, ImageKind::Defect) => "inference/od/defect",
            (Station::Bigface, ImageKind::All) => "all_frames/bigface/all",
            (Station::Bigface, ImageKind::Head) => "all_frames/bigface/head",
            (Station::Od, ImageKind::All) => "all_frames/od/all",
            (Station::Od, ImageKind::HeadDefect | ImageKind::Head) => {
                bail!("od station has no head images")
            }
        };
        Ok(self.root.join(relative))
    }

    fn enforce_limit(&self, dir: &Path) -> Result<()> {
        let mut images = list_images(dir)?;
        if images.len() < self.max_images {
            return Ok(());
        }

        images.sort();
        let excess = images.len() + 1 - self.max_images;
        for (_, path) in images.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => log_debug!("rotated out {}", path.display()),
                Err(err) => log_warn!("failed to remove {}: {err}", path.display()),
            }
        }
        Ok(())
    }
}

impl ImageStore for DiskImageStore {
    fn save(&self, image: &RgbImage, station: Station, kind: ImageKind, frame_number: u64) -> Result<PathBuf> {
        let dir = self.directory(station, kind)?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create image directory {}", dir.display()))?;
        self.enforce_limit(&dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let path = dir.join(format!("frame{frame_number}_{stamp}.jpg"));
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Image files in `dir` with their modification time.
fn list_images(dir: &Path) -> Result<Vec<(SystemTime, PathBuf)>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image || !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        images.push((modified, path));
    }
    Ok(images)
}

/// Saves on the blocking pool without waiting for the result.
pub fn spawn_save(
    store: Arc<dyn ImageStore>,
    image: Arc<RgbImage>,
    station: Station,
    kind: ImageKind,
    frame_number: u64,
) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = store.save(&image, station, kind, frame_number) {
            log_warn!("{station} {kind:?} image not saved: {err:#}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("rollerline-images-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn creates_layout_and_saves_jpeg() {
        let root = temp_root();
        let store = DiskImageStore::new(&root, 10).unwrap();
        assert!(root.join("inference/bigface/head_defect").is_dir());
        assert!(root.join("all_frames/od/all").is_dir());

        let path = store
            .save(&RgbImage::new(8, 8), Station::Od, ImageKind::Defect, 3)
            .unwrap();
        assert!(path.starts_with(root.join("inference/od/defect")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("frame3_"));
        assert!(store
            .save(&RgbImage::new(8, 8), Station::Od, ImageKind::Head, 1)
            .is_err());

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn keeps_directory_below_limit() {
        let root = temp_root();
        let store = DiskImageStore::new(&root, 3).unwrap();
        for n in 0..5 {
            store
                .save(&RgbImage::new(4, 4), Station::Bigface, ImageKind::All, n)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let dir = root.join("all_frames/bigface/all");
        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("frame2_"));

        fs::remove_dir_all(root).unwrap();
    }
}
