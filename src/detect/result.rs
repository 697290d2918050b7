use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use crate::frame::FrameRef;
use crate::layout::VideoId;

/// Closed set of detector types. Declaration order is the run order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Face,
    Object,
    Text,
}

impl DetectionType {
    pub const ALL: [DetectionType; 3] = [Self::Face, Self::Object, Self::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Object => "object",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "face" | "faces" => Ok(Self::Face),
            "object" | "objects" => Ok(Self::Object),
            "text" | "ocr" => Ok(Self::Text),
            other => Err(PipelineError::Config(format!(
                "unknown detection type '{}'",
                other
            ))),
        }
    }
}

/// Pixel-space box, `x1 < x2` and `y1 < y2` once it has passed the runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Checks `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height`.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x1 < self.x2 && self.x2 <= width && self.y1 < self.y2 && self.y2 <= height
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from(v: [u32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// A normalized detection tied to one sampled frame.
#[derive(Clone, Debug)]
pub struct Detection {
    pub id: String,
    pub kind: DetectionType,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
    pub frame: FrameRef,
    /// Set by the artifact writer once the crop is on disk.
    pub crop_ref: Option<PathBuf>,
    pub extra: Map<String, Value>,
    crop: Option<RgbImage>,
}

impl Detection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        kind: DetectionType,
        bbox: BoundingBox,
        confidence: f32,
        label: String,
        frame: FrameRef,
        extra: Map<String, Value>,
        crop: Option<RgbImage>,
    ) -> Self {
        Self {
            id,
            kind,
            bbox,
            confidence,
            label,
            frame,
            crop_ref: None,
            extra,
            crop,
        }
    }

    /// Crop pixels still waiting to be persisted.
    pub fn crop(&self) -> Option<&RgbImage> {
        self.crop.as_ref()
    }

    pub(crate) fn release_crop(&mut self) {
        self.crop = None;
    }
}

/// Append-only, frame-ordered detections of one type for one video.
#[derive(Clone, Debug)]
pub struct DetectionBatch {
    video_id: VideoId,
    kind: DetectionType,
    detections: Vec<Detection>,
    ids: HashSet<String>,
}

impl DetectionBatch {
    pub fn new(video_id: VideoId, kind: DetectionType) -> Self {
        Self {
            video_id,
            kind,
            detections: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Append a detection.
    ///
    /// Rejects a detection of another type, an id already present in the
    /// batch, and a frame index lower than the last one appended.
    pub fn push(&mut self, detection: Detection) -> Result<()> {
        if detection.kind != self.kind {
            return Err(PipelineError::Config(format!(
                "{} detection '{}' pushed into {} batch",
                detection.kind, detection.id, self.kind
            )));
        }
        if let Some(last) = self.detections.last() {
            if detection.frame.index < last.frame.index {
                return Err(PipelineError::OutOfOrder {
                    previous: last.frame.index,
                    current: detection.frame.index,
                });
            }
        }
        if !self.ids.insert(detection.id.clone()) {
            return Err(PipelineError::DuplicateDetectionId(detection.id));
        }
        self.detections.push(detection);
        Ok(())
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn kind(&self) -> DetectionType {
        self.kind
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub(crate) fn detections_mut(&mut self) -> impl Iterator<Item = &mut Detection> {
        self.detections.iter_mut()
    }

    /// Freeze the batch. Crop pixels are released; only references remain.
    pub(crate) fn finalize(mut self) -> FinalizedBatch {
        for detection in &mut self.detections {
            detection.release_crop();
        }
        FinalizedBatch {
            video_id: self.video_id,
            kind: self.kind,
            detections: self.detections,
        }
    }
}

/// A batch after the writer has persisted it. There is no way to mutate it.
#[derive(Debug)]
pub struct FinalizedBatch {
    video_id: VideoId,
    kind: DetectionType,
    detections: Vec<Detection>,
}

impl FinalizedBatch {
    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn kind(&self) -> DetectionType {
        self.kind
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(id: &str, kind: DetectionType, frame_index: u64) -> Detection {
        Detection::new(
            id.to_string(),
            kind,
            BoundingBox::new(0, 0, 4, 4),
            0.9,
            "person".to_string(),
            FrameRef {
                index: frame_index,
                timestamp: frame_index as f64 / 30.0,
            },
            Map::new(),
            None,
        )
    }

    fn batch() -> DetectionBatch {
        DetectionBatch::new(VideoId::new("abc123").unwrap(), DetectionType::Face)
    }

    #[test]
    fn batch_rejects_duplicate_ids() {
        let mut b = batch();
        b.push(detection("00000", DetectionType::Face, 0)).unwrap();
        let err = b.push(detection("00000", DetectionType::Face, 30)).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateDetectionId(id) if id == "00000"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn batch_rejects_frames_out_of_order() {
        let mut b = batch();
        b.push(detection("a", DetectionType::Face, 60)).unwrap();
        b.push(detection("b", DetectionType::Face, 60)).unwrap();
        let err = b.push(detection("c", DetectionType::Face, 30)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                previous: 60,
                current: 30
            }
        ));
    }

    #[test]
    fn batch_rejects_foreign_type() {
        let mut b = batch();
        assert!(b.push(detection("a", DetectionType::Text, 0)).is_err());
        assert!(b.is_empty());
    }

    #[test]
    fn bbox_bounds_check() {
        assert!(BoundingBox::new(0, 0, 64, 48).fits_within(64, 48));
        assert!(!BoundingBox::new(0, 0, 65, 48).fits_within(64, 48));
        assert!(!BoundingBox::new(50, 50, 50, 80).fits_within(64, 100));
        assert!(BoundingBox::new(50, 50, 50, 80).is_empty());
    }

    #[test]
    fn detection_type_parses_config_spellings() {
        assert_eq!("faces".parse::<DetectionType>().unwrap(), DetectionType::Face);
        assert_eq!("Object".parse::<DetectionType>().unwrap(), DetectionType::Object);
        assert_eq!("ocr".parse::<DetectionType>().unwrap(), DetectionType::Text);
        assert!("plate".parse::<DetectionType>().is_err());
    }

    #[test]
    fn finalize_drops_crop_pixels() {
        let mut b = batch();
        let mut d = detection("a", DetectionType::Face, 0);
        d.crop = Some(RgbImage::new(4, 4));
        b.push(d).unwrap();
        let finalized = b.finalize();
        assert!(finalized.detections()[0].crop().is_none());
    }
}
