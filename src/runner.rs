//! Per-frame detection normalization.
//!
//! `DetectionRunner` calls a detector on one sampled frame and turns the raw
//! output into `Detection` values:
//! - non-finite coordinates and out-of-range confidences are dropped
//! - boxes are truncated to integer pixels and clamped to the frame
//! - empty boxes are dropped
//! - class indices are resolved through the detector's name table
//! - crops are cut from the frame when enabled
//!
//! One bad raw detection never fails the frame. A `predict` error does.

use image::RgbImage;
use serde_json::{Map, Value};

use crate::detect::{
    BoundingBox, Detection, DetectionType, Detector, IdGenerator, RawDetection, RawLabel,
};
use crate::error::{PipelineError, Result};
use crate::frame::{FrameRef, SampledFrame};

/// Per-detector runner settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunnerOptions {
    /// Detections below this confidence are filtered out.
    pub min_confidence: f32,
    /// Cut crop images for surviving detections.
    pub save_crops: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            save_crops: true,
        }
    }
}

/// A validated detection that has not been given an id yet.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
    pub extra: Map<String, Value>,
    crop: Option<RgbImage>,
}

/// Output of one detector pass over one frame, before id assignment.
#[derive(Clone, Debug)]
pub struct FrameDetections {
    pub frame: FrameRef,
    pub kind: DetectionType,
    pub candidates: Vec<Candidate>,
    /// Raw detections rejected as invalid.
    pub dropped: usize,
    /// Raw detections below `min_confidence`.
    pub filtered: usize,
}

impl FrameDetections {
    /// Give every candidate a fresh id, in detector output order.
    pub fn assign_ids(self, ids: &mut dyn IdGenerator) -> Vec<Detection> {
        let Self {
            frame,
            kind,
            candidates,
            ..
        } = self;
        candidates
            .into_iter()
            .map(|c| {
                Detection::new(
                    ids.next_id(kind),
                    kind,
                    c.bbox,
                    c.confidence,
                    c.label,
                    frame,
                    c.extra,
                    c.crop,
                )
            })
            .collect()
    }
}

pub struct DetectionRunner<'a> {
    detector: &'a dyn Detector,
    options: RunnerOptions,
}

impl<'a> DetectionRunner<'a> {
    pub fn new(detector: &'a dyn Detector, options: RunnerOptions) -> Self {
        Self { detector, options }
    }

    pub fn detector(&self) -> &dyn Detector {
        self.detector
    }

    /// Predict and normalize. Safe to call from several threads at once.
    pub fn detect(&self, frame: &SampledFrame) -> Result<FrameDetections> {
        let raw = self
            .detector
            .predict(frame.image())
            .map_err(|source| PipelineError::DetectorFailure {
                detector: self.detector.name().to_string(),
                frame_index: frame.index,
                source,
            })?;

        let mut out = FrameDetections {
            frame: frame.frame_ref(),
            kind: self.detector.kind(),
            candidates: Vec::with_capacity(raw.len()),
            dropped: 0,
            filtered: 0,
        };
        for detection in raw {
            match self.normalize(frame, detection) {
                Ok(Some(candidate)) => out.candidates.push(candidate),
                Ok(None) => out.filtered += 1,
                Err(e) => {
                    log::warn!("{}: {}", self.detector.name(), e);
                    out.dropped += 1;
                }
            }
        }
        log::debug!(
            "{}: frame {} kept={} dropped={} filtered={}",
            self.detector.name(),
            frame.index,
            out.candidates.len(),
            out.dropped,
            out.filtered
        );
        Ok(out)
    }

    /// `detect` followed by id assignment.
    pub fn run(&self, frame: &SampledFrame, ids: &mut dyn IdGenerator) -> Result<Vec<Detection>> {
        Ok(self.detect(frame)?.assign_ids(ids))
    }

    /// `Ok(None)` when the detection is below the confidence threshold.
    fn normalize(&self, frame: &SampledFrame, raw: RawDetection) -> Result<Option<Candidate>> {
        let invalid = |reason: String| PipelineError::InvalidDetection {
            frame_index: frame.index,
            reason,
        };

        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(invalid(format!("confidence {} outside [0, 1]", raw.confidence)));
        }
        if raw.bbox.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("non-finite bbox {:?}", raw.bbox)));
        }
        if raw.confidence < self.options.min_confidence {
            return Ok(None);
        }

        let bbox = clamp_bbox(raw.bbox, frame.width(), frame.height());
        if bbox.is_empty() {
            return Err(invalid(format!(
                "bbox {:?} is empty after clamping to {}x{}",
                raw.bbox,
                frame.width(),
                frame.height()
            )));
        }

        let label = match raw.label {
            RawLabel::Name(name) => name,
            RawLabel::Class(index) => self
                .detector
                .names()
                .and_then(|names| names.get(index as usize))
                .cloned()
                .unwrap_or_else(|| index.to_string()),
        };
        let crop = self.options.save_crops.then(|| frame.crop(&bbox));

        Ok(Some(Candidate {
            bbox,
            confidence: raw.confidence,
            label,
            extra: raw.extra,
            crop,
        }))
    }
}

/// Truncate to integer pixels and clamp into `[0, width] x [0, height]`.
fn clamp_bbox(bbox: [f32; 4], width: u32, height: u32) -> BoundingBox {
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    BoundingBox::new(
        clamp(bbox[0], width),
        clamp(bbox[1], height),
        clamp(bbox[2], width),
        clamp(bbox[3], height),
    )
}
