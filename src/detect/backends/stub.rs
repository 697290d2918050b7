use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{Detector, RawDetection};
use crate::detect::result::DetectionType;

type PredictFn = dyn Fn(&RgbImage) -> Result<Vec<RawDetection>> + Send + Sync;

/// Stub detector for testing. Output comes from a caller-supplied closure.
pub struct StubDetector {
    name: String,
    kind: DetectionType,
    names: Option<Vec<String>>,
    predict: Box<PredictFn>,
}

impl StubDetector {
    pub fn new<F>(name: &str, kind: DetectionType, predict: F) -> Self
    where
        F: Fn(&RgbImage) -> Result<Vec<RawDetection>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind,
            names: None,
            predict: Box::new(predict),
        }
    }

    /// Returns the same detections for every frame.
    pub fn fixed(name: &str, kind: DetectionType, detections: Vec<RawDetection>) -> Self {
        Self::new(name, kind, move |_| Ok(detections.clone()))
    }

    /// Never detects anything.
    pub fn empty(name: &str, kind: DetectionType) -> Self {
        Self::new(name, kind, |_| Ok(Vec::new()))
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectionType {
        self.kind
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        (self.predict)(image)
    }

    fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }
}
