//! Synthetic frame source for tests and dry runs.
//!
//! Frames are a deterministic gradient that shifts with the frame index, so
//! the same configuration always decodes to the same pixels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};

use super::VideoSource;
use crate::error::{PipelineError, Result};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub fps: f64,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    /// Decode indices that come back as `FrameDecode` errors.
    pub corrupt: Vec<u64>,
    /// Decode index at which the stream fails fatally.
    pub fail_at: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            frames: 300,
            width: 64,
            height: 48,
            corrupt: Vec::new(),
            fail_at: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse the query part of a `stub://name?fps=30&frames=300` URI.
    ///
    /// Recognized keys: `fps`, `frames`, `width`, `height`, `corrupt`
    /// (comma-separated indices), `fail_at`.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut cfg = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| PipelineError::Config(format!("malformed stub parameter '{}'", pair)))?;
            let bad = || PipelineError::Config(format!("invalid stub parameter {}={}", key, value));
            match key {
                "fps" => cfg.fps = value.parse().map_err(|_| bad())?,
                "frames" => cfg.frames = value.parse().map_err(|_| bad())?,
                "width" => cfg.width = value.parse().map_err(|_| bad())?,
                "height" => cfg.height = value.parse().map_err(|_| bad())?,
                "fail_at" => cfg.fail_at = Some(value.parse().map_err(|_| bad())?),
                "corrupt" => {
                    cfg.corrupt = value
                        .split(',')
                        .filter(|v| !v.is_empty())
                        .map(|v| v.parse().map_err(|_| bad()))
                        .collect::<Result<Vec<u64>>>()?
                }
                _ => {
                    return Err(PipelineError::Config(format!(
                        "unknown stub parameter '{}'",
                        key
                    )))
                }
            }
        }
        Ok(cfg)
    }
}

pub struct SyntheticSource {
    location: String,
    config: SyntheticConfig,
    position: u64,
    released: Option<Arc<AtomicBool>>,
}

impl SyntheticSource {
    pub fn new(location: &str, config: SyntheticConfig) -> Self {
        Self {
            location: location.to_string(),
            config,
            position: 0,
            released: None,
        }
    }

    /// Flag that flips to `true` when the source is dropped.
    pub fn with_release_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.released = Some(flag);
        self
    }

    fn generate_pixels(&self, index: u64) -> RgbImage {
        let shift = (index % 256) as u32;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y + shift) % 256) as u8,
            ])
        })
    }
}

impl VideoSource for SyntheticSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn fps(&self) -> f64 {
        self.config.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.config.frames)
    }

    fn next_frame(&mut self) -> Option<Result<RgbImage>> {
        if self.position >= self.config.frames {
            return None;
        }
        let index = self.position;
        self.position += 1;

        if self.config.fail_at == Some(index) {
            // Fatal: the stream ends here.
            self.position = self.config.frames;
            return Some(Err(PipelineError::unavailable(
                &self.location,
                format!("stream stalled at frame {}", index),
            )));
        }
        if self.config.corrupt.contains(&index) {
            return Some(Err(PipelineError::FrameDecode {
                index,
                reason: "synthetic corrupt frame".to_string(),
            }));
        }
        Some(Ok(self.generate_pixels(index)))
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        if let Some(flag) = &self.released {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_query() {
        let cfg = SyntheticConfig::from_query("fps=25&frames=10&width=8&height=6&corrupt=2,5").unwrap();
        assert_eq!(cfg.fps, 25.0);
        assert_eq!(cfg.frames, 10);
        assert_eq!((cfg.width, cfg.height), (8, 6));
        assert_eq!(cfg.corrupt, vec![2, 5]);
        assert!(cfg.fail_at.is_none());

        assert!(SyntheticConfig::from_query("fps=fast").is_err());
        assert!(SyntheticConfig::from_query("speed=1").is_err());
    }

    #[test]
    fn decodes_frames_then_ends() {
        let mut source = SyntheticSource::new(
            "stub://t",
            SyntheticConfig {
                frames: 3,
                corrupt: vec![1],
                ..Default::default()
            },
        );

        assert!(matches!(source.next_frame(), Some(Ok(_))));
        assert!(matches!(
            source.next_frame(),
            Some(Err(PipelineError::FrameDecode { index: 1, .. }))
        ));
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn same_index_same_pixels() {
        let source = SyntheticSource::new("stub://t", SyntheticConfig::default());
        assert_eq!(source.generate_pixels(7), source.generate_pixels(7));
        assert_ne!(source.generate_pixels(7), source.generate_pixels(8));
    }

    #[test]
    fn drop_sets_release_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let source = SyntheticSource::new("stub://t", SyntheticConfig::default())
            .with_release_flag(flag.clone());
        drop(source);
        assert!(flag.load(Ordering::SeqCst));
    }
}
