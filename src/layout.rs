//! Video identifiers and the per-run directory layout.
//!
//! Every path a run touches is derived here from the base directory and the
//! video identifier:
//!
//! ```text
//! {base}/frames/{video_id}/frame_{index:06}.jpg
//! {base}/crops/{video_id}/{type}_{detection_id}.jpg
//! {base}/outputs/{video_id}/{video_id}_{type}.json
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::detect::DetectionType;
use crate::error::{PipelineError, Result};

const MAX_VIDEO_ID_LEN: usize = 64;

/// Validated video identifier, safe to embed in file names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: &str) -> Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Config("video id cannot be empty".into()));
        }
        if trimmed.len() > MAX_VIDEO_ID_LEN {
            return Err(PipelineError::Config(format!(
                "video id longer than {} characters",
                MAX_VIDEO_ID_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PipelineError::Config(format!(
                "video id '{}' must be [A-Za-z0-9_-] only",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Extract the 11-character YouTube id from a watch, short or embed URL.
    pub fn from_url(url: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})(?:[?&#/]|$)").expect("static regex")
        });
        let id = pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| {
                PipelineError::Config(format!("could not extract video id from url '{}'", url))
            })?;
        Self::new(id.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output locations for one video's run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunLayout {
    video_id: VideoId,
    frames_dir: PathBuf,
    crops_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl RunLayout {
    pub fn new(base_dir: &Path, video_id: &VideoId) -> Self {
        Self {
            video_id: video_id.clone(),
            frames_dir: base_dir.join("frames").join(video_id.as_str()),
            crops_dir: base_dir.join("crops").join(video_id.as_str()),
            outputs_dir: base_dir.join("outputs").join(video_id.as_str()),
        }
    }

    /// Create all run directories. Safe to call repeatedly.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.frames_dir, &self.crops_dir, &self.outputs_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::write_failure(dir, e))?;
        }
        Ok(())
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn crops_dir(&self) -> &Path {
        &self.crops_dir
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// Stable location of a sampled frame, whether or not it was persisted.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.frames_dir.join(format!("frame_{:06}.jpg", index))
    }

    pub fn crop_path(&self, kind: DetectionType, detection_id: &str) -> PathBuf {
        self.crops_dir.join(format!("{}_{}.jpg", kind, detection_id))
    }

    pub fn output_path(&self, kind: DetectionType) -> PathBuf {
        self.outputs_dir.join(format!("{}_{}.json", self.video_id, kind))
    }
}
