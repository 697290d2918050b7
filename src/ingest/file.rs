//! Local file frame source.
//!
//! `FileSource` opens a local video file for decoding. It is responsible for:
//! - Rejecting remote locations (no network access)
//! - Dispatching `stub://` locations to the synthetic generator
//! - Decoding video frames in-memory to RGB8
//! - Releasing the decoder when dropped
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Store decoded frames to disk

use image::RgbImage;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::VideoSource;
use crate::error::{PipelineError, Result};

/// Local file frame source.
pub struct FileSource {
    location: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(location: &str) -> Result<Self> {
        if !is_local_file_path(location) {
            return Err(PipelineError::unavailable(
                location,
                "file ingestion only supports local paths (no URL schemes)",
            ));
        }
        let backend = if let Some(rest) = location.strip_prefix("stub://") {
            let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
            let config = SyntheticConfig::from_query(query)
                .map_err(|e| PipelineError::unavailable(location, e.to_string()))?;
            log::info!("FileSource: opened {} (synthetic)", location);
            FileBackend::Synthetic(SyntheticSource::new(location, config))
        } else {
            open_decoder(location)?
        };
        Ok(Self {
            location: location.to_string(),
            backend,
        })
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_decoder(location: &str) -> Result<FileBackend> {
    let source = FfmpegFileSource::open(location)?;
    log::info!("FileSource: opened {} (ffmpeg)", location);
    Ok(FileBackend::Ffmpeg(source))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_decoder(location: &str) -> Result<FileBackend> {
    if !std::path::Path::new(location).is_file() {
        return Err(PipelineError::unavailable(location, "no such file"));
    }
    Err(PipelineError::unavailable(
        location,
        "file decoding requires the ingest-file-ffmpeg feature",
    ))
}

impl VideoSource for FileSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.fps(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps(),
        }
    }

    fn frame_count(&self) -> Option<u64> {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frame_count(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_count(),
        }
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        log::debug!("FileSource: released {}", self.location);
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
