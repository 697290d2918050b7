use anyhow::Result;
use image::RgbImage;
use serde_json::{Map, Value};

use crate::detect::result::DetectionType;

/// Label as reported by a model: either a name or a numeric class index.
#[derive(Clone, Debug, PartialEq)]
pub enum RawLabel {
    Name(String),
    Class(u32),
}

/// One unvalidated model output, in frame pixel coordinates.
#[derive(Clone, Debug)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub label: RawLabel,
    /// Detector-specific metadata, copied to the detection's `extra` bag.
    pub extra: Map<String, Value>,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32, label: RawLabel) -> Self {
        Self {
            bbox,
            confidence,
            label,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Detector capability.
///
/// Implementations wrap an inference model the pipeline treats as opaque. The
/// image is borrowed for the duration of one call and must not be retained.
/// `predict` takes `&self` so one detector can serve a worker pool.
pub trait Detector: Send + Sync {
    /// Detector identifier, used in logs and run reports.
    fn name(&self) -> &str;

    /// Which batch this detector's output belongs to.
    fn kind(&self) -> DetectionType;

    /// Run inference on one frame.
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Class index to label lookup for numeric-labelled models.
    fn names(&self) -> Option<&[String]> {
        None
    }

    /// Optional warm-up hook, called once before a batch starts.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
