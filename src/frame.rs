//! Sampled frame container.
//!
//! - `SampledFrame`: one decoded frame selected by the sampler, with its
//!   decode-order index and source timestamp. Pixels are RGB8.
//! - `FrameRef`: the lightweight pointer a detection keeps back to its frame.
//!
//! Frames are ephemeral: the sampler creates them, the runner borrows them for
//! one detection pass, and nothing keeps the pixel buffer afterwards unless the
//! orchestrator explicitly persists it.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

/// A frame selected by the sampler.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    /// Position in decode order (counts corrupt frames too).
    pub index: u64,
    /// Seconds from stream start, `index / source_fps`.
    pub timestamp: f64,
    image: RgbImage,
}

impl SampledFrame {
    pub fn new(index: u64, timestamp: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn frame_ref(&self) -> FrameRef {
        FrameRef {
            index: self.index,
            timestamp: self.timestamp,
        }
    }

    /// Copy the pixels under `bbox` into a new image.
    ///
    /// The box must already be clamped to the frame; the runner guarantees this.
    pub fn crop(&self, bbox: &BoundingBox) -> RgbImage {
        imageops::crop_imm(&self.image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image()
    }
}

/// Reference from a detection back to the frame it was found on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRef {
    pub index: u64,
    pub timestamp: f64,
}

/// Timestamp of a decoded frame. Always derived from the true decode index.
pub fn timestamp_for(index: u64, fps: f64) -> f64 {
    index as f64 / fps
}
