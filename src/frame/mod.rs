//! Per-station frame buffer shared between the capture thread and the
//! station loop.

pub mod capture;

pub use capture::{spawn_capture, CameraOpener, FrameSource, StillImageOpener, StillImageSource};

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is {actual_width}x{actual_height}, channel expects {width}x{height}")]
    WrongShape {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame dimensions must be non-zero")]
    ZeroDimensions,
}

/// Private copy of the latest capture, safe to hand to inference.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
}

struct Slot {
    image: RgbImage,
    seq: u64,
    captured_at: DateTime<Utc>,
}

/// Fixed-shape, mutually exclusive frame slot.
///
/// The capture side fills its own back buffer outside the lock and swaps it
/// in with [`FrameChannel::publish`]; readers copy out with
/// [`FrameChannel::snapshot`]. Neither side holds the lock for longer than
/// one swap or one copy.
#[derive(Clone)]
pub struct FrameChannel {
    width: u32,
    height: u32,
    slot: Arc<Mutex<Slot>>,
}

impl FrameChannel {
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimensions);
        }

        Ok(Self {
            width,
            height,
            slot: Arc::new(Mutex::new(Slot {
                image: RgbImage::new(width, height),
                seq: 0,
                captured_at: Utc::now(),
            })),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swaps `image` in as the current frame and hands back the buffer it
    /// replaced so the caller can reuse the allocation.
    pub fn publish(&self, image: RgbImage) -> Result<(u64, RgbImage), FrameError> {
        let (actual_width, actual_height) = image.dimensions();
        if (actual_width, actual_height) != (self.width, self.height) {
            return Err(FrameError::WrongShape {
                width: self.width,
                height: self.height,
                actual_width,
                actual_height,
            });
        }

        let mut slot = self.lock();
        let previous = std::mem::replace(&mut slot.image, image);
        slot.seq += 1;
        slot.captured_at = Utc::now();
        Ok((slot.seq, previous))
    }

    /// Sequence number of the current frame; 0 until the first publish.
    pub fn latest_seq(&self) -> u64 {
        self.lock().seq
    }

    /// Copy of the current frame, or `None` before the first publish.
    pub fn snapshot(&self) -> Option<Frame> {
        self.snapshot_after(0)
    }

    /// Copy of the current frame only if it is newer than `seen_seq`.
    pub fn snapshot_after(&self, seen_seq: u64) -> Option<Frame> {
        let slot = self.lock();
        if slot.seq == 0 || slot.seq <= seen_seq {
            return None;
        }

        Some(Frame {
            image: slot.image.clone(),
            seq: slot.seq,
            captured_at: slot.captured_at,
        })
    }
}
