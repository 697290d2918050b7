//! Artifact persistence.
//!
//! `ArtifactWriter` writes crops, sampled frames and the per-type JSON
//! detection document under a `RunLayout`. Every file goes to a sibling
//! `.tmp` file first and is renamed into place, so readers only ever see a
//! complete file and a failed write leaves the previous version intact.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::detect::{BoundingBox, Detection, DetectionBatch, DetectionType, FinalizedBatch};
use crate::error::{PipelineError, Result};
use crate::frame::{FrameRef, SampledFrame};
use crate::layout::RunLayout;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// On-disk shape of `{video_id}_{type}.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionDocument {
    pub detections: BTreeMap<String, Vec<DetectionRecord>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub detection_id: String,
    #[serde(rename = "type")]
    pub kind: DetectionType,
    pub frame_path: String,
    pub frame_index: u64,
    pub timestamp: f64,
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub crop_path: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl DetectionRecord {
    fn from_detection(detection: &Detection, layout: &RunLayout) -> Self {
        Self {
            detection_id: detection.id.clone(),
            kind: detection.kind,
            frame_path: path_string(&layout.frame_path(detection.frame.index)),
            frame_index: detection.frame.index,
            timestamp: detection.frame.timestamp,
            label: detection.label.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            crop_path: detection.crop_ref.as_deref().map(path_string),
            extra: detection.extra.clone(),
        }
    }

    pub fn frame_ref(&self) -> FrameRef {
        FrameRef {
            index: self.frame_index,
            timestamp: self.timestamp,
        }
    }
}

impl DetectionDocument {
    pub fn from_batch(batch: &FinalizedBatch, layout: &RunLayout) -> Self {
        let records = batch
            .detections()
            .iter()
            .map(|d| DetectionRecord::from_detection(d, layout))
            .collect();
        let mut detections = BTreeMap::new();
        detections.insert(batch.kind().to_string(), records);
        Self { detections }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Records for one detection type, empty if absent.
    pub fn records(&self, kind: DetectionType) -> &[DetectionRecord] {
        self.detections
            .get(kind.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A batch that is fully on disk.
#[derive(Debug)]
pub struct WrittenBatch {
    pub json_path: PathBuf,
    pub crops_written: usize,
    pub batch: FinalizedBatch,
}

pub struct ArtifactWriter {
    layout: RunLayout,
    jpeg_quality: u8,
}

impl ArtifactWriter {
    pub fn new(layout: RunLayout, jpeg_quality: u8) -> Self {
        Self {
            layout,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Persist crops, then the JSON document, and finalize the batch.
    ///
    /// A crop failure aborts before the JSON is touched.
    pub fn write(&self, mut batch: DetectionBatch) -> Result<WrittenBatch> {
        self.layout.ensure()?;

        let mut crops_written = 0;
        for detection in batch.detections_mut() {
            let Some(crop) = detection.crop() else {
                continue;
            };
            let path = self.layout.crop_path(detection.kind, &detection.id);
            self.write_jpeg(&path, crop)?;
            detection.crop_ref = Some(path);
            crops_written += 1;
        }

        let batch = batch.finalize();
        let document = DetectionDocument::from_batch(&batch, &self.layout);
        let json_path = self.layout.output_path(batch.kind());
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| PipelineError::write_failure(&json_path, io::Error::other(e)))?;
        write_atomic(&json_path, &json)?;

        log::info!(
            "ArtifactWriter: wrote {} {} detection(s), {} crop(s) to {}",
            batch.len(),
            batch.kind(),
            crops_written,
            json_path.display()
        );
        Ok(WrittenBatch {
            json_path,
            crops_written,
            batch,
        })
    }

    /// Persist a sampled frame at its layout location.
    pub fn write_frame(&self, frame: &SampledFrame) -> Result<PathBuf> {
        self.layout.ensure()?;
        let path = self.layout.frame_path(frame.index);
        self.write_jpeg(&path, frame.image())?;
        Ok(path)
    }

    fn write_jpeg(&self, path: &Path, image: &RgbImage) -> Result<()> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
            .encode_image(image)
            .map_err(|e| PipelineError::write_failure(path, io::Error::other(e)))?;
        write_atomic(path, &encoded)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    let written = (|| -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(PipelineError::write_failure(path, e));
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
