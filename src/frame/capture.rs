use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use tokio_util::sync::CancellationToken;

use crate::config::CameraConfig;
use crate::models::Station;
use crate::utils::RateLimiter;

use super::FrameChannel;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "capture";

use crate::{log_info, log_warn};

const GRAB_RETRY_DELAY: Duration = Duration::from_millis(100);
const FAILURE_LOG_EVERY: u64 = 50;

/// A camera, or anything that can stand in for one.
pub trait FrameSource: Send + 'static {
    /// Blocks until the next frame is available.
    fn grab(&mut self) -> Result<RgbImage>;

    fn release(&mut self) {}
}

/// Replays one still image at a fixed rate.
pub struct StillImageSource {
    image: RgbImage,
    interval: Duration,
}

impl StillImageSource {
    pub fn from_image(image: RgbImage, fps: u32) -> Self {
        Self {
            image,
            interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
        }
    }

    /// Loads `path` and resizes it to the channel shape when needed.
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to open camera source {}", path.display()))?
            .to_rgb8();
        let image = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, imageops::FilterType::Triangle)
        };
        Ok(Self::from_image(image, fps))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Opens the frame source behind a station's configured camera.
pub trait CameraOpener: Send + Sync {
    fn open(&self, station: Station, source: &Path, camera: &CameraConfig) -> Result<Box<dyn FrameSource>>;
}

/// Treats every camera source as an image file.
pub struct StillImageOpener;

impl CameraOpener for StillImageOpener {
    fn open(&self, _station: Station, source: &Path, camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
        let still = StillImageSource::open(source, camera.width, camera.height, camera.fps)?;
        Ok(Box::new(still))
    }
}

impl FrameSource for StillImageSource {
    fn grab(&mut self) -> Result<RgbImage> {
        thread::sleep(self.interval);
        Ok(self.image.clone())
    }
}

/// Runs the capture loop for one station on a dedicated OS thread until
/// `cancel` fires. Grab failures back off briefly and retry; frames of the
/// wrong shape are dropped.
pub fn spawn_capture(
    station: Station,
    mut source: Box<dyn FrameSource>,
    channel: FrameChannel,
    flip: bool,
    cancel: CancellationToken,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("capture-{station}"))
        .spawn(move || {
            log_info!("{station} capture started (flip: {flip})");
            let mut grab_failures = RateLimiter::new(FAILURE_LOG_EVERY);
            let mut shape_failures = RateLimiter::new(FAILURE_LOG_EVERY);

            while !cancel.is_cancelled() {
                let image = match source.grab() {
                    Ok(image) => {
                        grab_failures.reset();
                        image
                    }
                    Err(err) => {
                        if grab_failures.hit() {
                            log_warn!(
                                "{station} frame grab failed ({} in a row): {err:#}",
                                grab_failures.count()
                            );
                        }
                        thread::sleep(GRAB_RETRY_DELAY);
                        continue;
                    }
                };

                let image = if flip {
                    imageops::rotate180(&image)
                } else {
                    image
                };

                if let Err(err) = channel.publish(image) {
                    if shape_failures.hit() {
                        log_warn!("{station} frame dropped: {err}");
                    }
                }
            }

            source.release();
            log_info!("{station} capture stopped");
        })
        .with_context(|| format!("failed to spawn {station} capture thread"))
}
