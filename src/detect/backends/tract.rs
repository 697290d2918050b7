#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, RawDetection, RawLabel};
use crate::detect::result::DetectionType;

type Plan = TypedRunnableModel<TypedModel>;

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based detector for YOLO-style ONNX models.
///
/// Expects a square `[1, 3, S, S]` f32 input and a `[1, 4 + classes, anchors]`
/// output with center-format boxes in input pixel units. Frames are resized to
/// the model input and boxes are scaled back to frame pixels.
pub struct TractDetector {
    name: String,
    kind: DetectionType,
    model: Plan,
    input_size: u32,
    names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        name: &str,
        kind: DetectionType,
        model_path: P,
        input_size: u32,
        names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            name: name.to_string(),
            kind,
            model,
            input_size,
            names,
            confidence_threshold: 0.25,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(image, side, side, imageops::FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectionType {
        self.kind
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let candidates = decode_output(
            output,
            self.input_size,
            self.confidence_threshold,
            (image.width(), image.height()),
        )?;

        Ok(non_max_suppression(candidates, self.iou_threshold)
            .into_iter()
            .map(|c| RawDetection::new(c.bbox, c.score, RawLabel::Class(c.class)))
            .collect())
    }

    fn names(&self) -> Option<&[String]> {
        if self.names.is_empty() {
            None
        } else {
            Some(self.names.as_slice())
        }
    }
}

/// Best class per anchor at or above `threshold`, boxes in frame pixels.
/// Scores pass through untouched; range checks happen downstream.
fn decode_output(
    output: &Tensor,
    input_size: u32,
    threshold: f32,
    (frame_width, frame_height): (u32, u32),
) -> Result<Vec<Candidate>> {
    let scores = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let shape = scores.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(anyhow!("unexpected model output shape {:?}", shape));
    }
    let scores = scores
        .into_dimensionality::<tract_ndarray::Ix3>()
        .context("model output is not three-dimensional")?;
    let features = shape[1];
    let anchors = shape[2];
    let scale_x = frame_width as f32 / input_size as f32;
    let scale_y = frame_height as f32 / input_size as f32;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class, score) = (4..features)
            .map(|f| (f - 4, scores[[0, f, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < threshold {
            continue;
        }
        let cx = scores[[0, 0, i]];
        let cy = scores[[0, 1, i]];
        let w = scores[[0, 2, i]];
        let h = scores[[0, 3, i]];
        candidates.push(Candidate {
            bbox: [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
            score,
            class: class as u32,
        });
    }
    Ok(candidates)
}

#[derive(Clone, Debug)]
struct Candidate {
    bbox: [f32; 4],
    score: f32,
    class: u32,
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = keep
            .iter()
            .any(|k| k.class == candidate.class && iou(&k.bbox, &candidate.bbox) > iou_threshold);
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = inter_w * inter_h;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
