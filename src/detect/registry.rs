use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::runner::RunnerOptions;

use super::backend::Detector;
use super::result::DetectionType;

/// A registered detector and the options its runner uses.
pub struct DetectorSlot {
    pub detector: Box<dyn Detector>,
    pub options: RunnerOptions,
}

impl DetectorSlot {
    pub fn name(&self) -> &str {
        self.detector.name()
    }

    pub fn kind(&self) -> DetectionType {
        self.detector.kind()
    }
}

/// The detectors a run executes.
///
/// Iteration order is fixed: detection type (face, object, text), then
/// detector name. Registration order does not matter.
#[derive(Default)]
pub struct DetectorRegistry {
    slots: Vec<DetectorSlot>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector with default runner options.
    pub fn register<D: Detector + 'static>(&mut self, detector: D) {
        self.register_boxed(Box::new(detector), RunnerOptions::default());
    }

    pub fn register_boxed(&mut self, detector: Box<dyn Detector>, options: RunnerOptions) {
        self.slots.push(DetectorSlot { detector, options });
        self.slots
            .sort_by(|a, b| (a.kind(), a.name()).cmp(&(b.kind(), b.name())));
    }

    /// Get a detector by name.
    pub fn get(&self, name: &str) -> Option<&DetectorSlot> {
        self.slots.iter().find(|slot| slot.name() == name)
    }

    /// Registered detector names, in run order.
    pub fn list(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectorSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Each detection type maps to one output document, so at most one
    /// detector per type may be registered.
    pub fn validate(&self) -> Result<()> {
        let mut by_kind: HashMap<DetectionType, &str> = HashMap::new();
        for slot in &self.slots {
            if let Some(existing) = by_kind.insert(slot.kind(), slot.name()) {
                return Err(PipelineError::Config(format!(
                    "detectors '{}' and '{}' both produce {} detections",
                    existing,
                    slot.name(),
                    slot.kind()
                )));
            }
        }
        Ok(())
    }
}
