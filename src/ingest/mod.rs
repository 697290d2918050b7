//! Video sources.
//!
//! This module provides the decode side of the pipeline:
//! - `VideoSource`: an open, single-consumer decoded frame stream
//! - `SourceOpener`: turns a location into a `VideoSource`
//! - `FileSource`: local files (feature: ingest-file-ffmpeg) and `stub://` URIs
//! - `SyntheticSource`: deterministic generated frames (testing)
//!
//! A source is owned by exactly one sampler and is released by dropping it.
//! Sources decode to RGB8 and never write frames anywhere themselves.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

use image::RgbImage;

use crate::error::Result;

pub use file::FileSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// An open decoded video stream.
pub trait VideoSource: Send {
    /// Where the stream was opened from, for logs and errors.
    fn location(&self) -> &str;

    /// Source frame rate. Timestamps are derived from it.
    fn fps(&self) -> f64;

    /// Total frame count when the container reports one.
    fn frame_count(&self) -> Option<u64>;

    /// Decode the next frame in stream order.
    ///
    /// `None` is end of stream. `Some(Err(FrameDecode))` means one unreadable
    /// frame and the stream can continue; any other error is fatal.
    fn next_frame(&mut self) -> Option<Result<RgbImage>>;
}

/// Opens video sources by location.
pub trait SourceOpener: Send + Sync {
    /// Fails with `SourceUnavailable` when the location cannot be opened.
    fn open(&self, location: &str) -> Result<Box<dyn VideoSource>>;
}

/// Default opener: local files and `stub://` URIs through `FileSource`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSourceOpener;

impl SourceOpener for FileSourceOpener {
    fn open(&self, location: &str) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(FileSource::open(location)?))
    }
}
