//! Error taxonomy for the annotation pipeline.
//!
//! Per-frame and per-detection faults (`FrameDecode`, `InvalidDetection`) are
//! recovered locally by skipping the offending item. Everything else is
//! surfaced: structural faults abort a run, detector-scoped faults end up in
//! the run report as a failed detector status.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video source '{location}' unavailable: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("frame {index} could not be decoded: {reason}")]
    FrameDecode { index: u64, reason: String },

    #[error("invalid detection on frame {frame_index}: {reason}")]
    InvalidDetection { frame_index: u64, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("detector '{detector}' failed on frame {frame_index}: {source}")]
    DetectorFailure {
        detector: String,
        frame_index: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("duplicate detection id '{0}' in batch")]
    DuplicateDetectionId(String),

    #[error("detection for frame {current} pushed after frame {previous}")]
    OutOfOrder { previous: u64, current: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn unavailable(location: &str, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// True for faults the pipeline recovers from by skipping a single item.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FrameDecode { .. } | Self::InvalidDetection { .. }
        )
    }
}
