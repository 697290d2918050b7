//! Interval-based frame sampling.
//!
//! `FrameSampler` owns a `VideoSource` and yields every `frame_step`-th decoded
//! frame as a `SampledFrame`. The decoded index counts every stream position,
//! including corrupt frames, so timestamps always match the source timeline.

use std::iter::FusedIterator;

use crate::error::{PipelineError, Result};
use crate::frame::{timestamp_for, SampledFrame};
use crate::ingest::VideoSource;

/// How often to sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplingInterval {
    EveryNthFrame(u32),
    EverySeconds(f64),
}

impl Default for SamplingInterval {
    fn default() -> Self {
        Self::EverySeconds(1.0)
    }
}

impl SamplingInterval {
    /// Number of decoded frames between samples at the given source rate.
    pub fn frame_step(&self, fps: f64) -> Result<u64> {
        match *self {
            Self::EveryNthFrame(n) => Ok(u64::from(n.max(1))),
            Self::EverySeconds(seconds) => {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(PipelineError::Config(format!(
                        "sampling interval must be a positive number of seconds, got {}",
                        seconds
                    )));
                }
                Ok(((fps * seconds).round() as u64).max(1))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Frames decoded successfully.
    pub frames_decoded: u64,
    /// Frames handed out.
    pub frames_emitted: u64,
    /// Corrupt frames skipped.
    pub frames_corrupt: u64,
}

/// Lazy, finite, non-restartable sequence of sampled frames.
pub struct FrameSampler {
    source: Option<Box<dyn VideoSource>>,
    location: String,
    fps: f64,
    step: u64,
    next_index: u64,
    stats: SamplerStats,
}

impl FrameSampler {
    pub fn new(source: Box<dyn VideoSource>, interval: SamplingInterval) -> Result<Self> {
        let location = source.location().to_string();
        let fps = source.fps();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(PipelineError::unavailable(
                &location,
                format!("source reports invalid frame rate {}", fps),
            ));
        }
        let step = interval.frame_step(fps)?;
        log::info!(
            "FrameSampler: sampling {} at {:.3} fps, every {} frame(s) (~{} total)",
            location,
            fps,
            step,
            source
                .frame_count()
                .map(|n| n.div_ceil(step).to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        Ok(Self {
            source: Some(source),
            location,
            fps,
            step,
            next_index: 0,
            stats: SamplerStats::default(),
        })
    }

    pub fn frame_step(&self) -> u64 {
        self.step
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    fn release(&mut self, reason: &str) {
        if let Some(source) = self.source.take() {
            drop(source);
            log::info!(
                "FrameSampler: released {} ({}; decoded={} emitted={} corrupt={})",
                self.location,
                reason,
                self.stats.frames_decoded,
                self.stats.frames_emitted,
                self.stats.frames_corrupt
            );
        }
    }
}

impl Iterator for FrameSampler {
    type Item = Result<SampledFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let decoded = self.source.as_mut()?.next_frame();
            match decoded {
                None => {
                    let empty = self.stats.frames_decoded == 0;
                    self.release("end of stream");
                    if empty {
                        return Some(Err(PipelineError::unavailable(
                            &self.location,
                            "no decodable frames",
                        )));
                    }
                    return None;
                }
                Some(Err(e)) if e.is_recoverable() => {
                    log::warn!(
                        "FrameSampler: skipping frame {} of {}: {}",
                        self.next_index,
                        self.location,
                        e
                    );
                    self.next_index += 1;
                    self.stats.frames_corrupt += 1;
                }
                Some(Err(e)) => {
                    self.release("source error");
                    return Some(Err(e));
                }
                Some(Ok(image)) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    self.stats.frames_decoded += 1;
                    if index % self.step == 0 {
                        self.stats.frames_emitted += 1;
                        let timestamp = timestamp_for(index, self.fps);
                        return Some(Ok(SampledFrame::new(index, timestamp, image)));
                    }
                }
            }
        }
    }
}

impl FusedIterator for FrameSampler {}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.release("dropped");
    }
}
