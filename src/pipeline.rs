//! Run orchestration.
//!
//! One run annotates one video:
//! 1. validate the detector set
//! 2. create the run layout
//! 3. open the source and stream sampled frames (optionally persisting them)
//! 4. hand each frame, or each chunk of `workers` frames, to every detector
//!    in registry order, then drop it
//! 5. write one batch per detector and collect a per-detector status
//!
//! Structural faults (bad config, unavailable source, layout or frame write
//! failures) abort the run with `Err`. Frames persisted before such a fault
//! stay on disk; no detection document is written. Faults scoped to one
//! detector are recorded as `DetectorStatus::Failed` and the other detectors
//! keep running.

use std::path::PathBuf;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::artifact::{ArtifactWriter, DEFAULT_JPEG_QUALITY};
use crate::detect::{
    DetectionBatch, DetectionType, Detector, DetectorRegistry, DetectorSlot, IdGenerator,
    RandomIds,
};
use crate::error::{PipelineError, Result};
use crate::frame::SampledFrame;
use crate::ingest::{FileSourceOpener, SourceOpener};
use crate::layout::{RunLayout, VideoId};
use crate::runner::{DetectionRunner, FrameDetections, RunnerOptions};
use crate::sampler::{FrameSampler, SamplingInterval};

type IdFactory = dyn Fn() -> Box<dyn IdGenerator> + Send + Sync;

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Root of the frames/, crops/ and outputs/ trees.
    pub base_dir: PathBuf,
    pub interval: SamplingInterval,
    /// Write every sampled frame to `frames/{video_id}/`.
    pub persist_frames: bool,
    /// Detection threads per detector; 1 runs on the calling thread.
    pub workers: usize,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            interval: SamplingInterval::default(),
            persist_frames: true,
            workers: 1,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug)]
pub enum DetectorStatus {
    Completed {
        json_path: PathBuf,
        detections: usize,
        /// Raw detections rejected as invalid.
        dropped: usize,
        /// Raw detections below the confidence threshold.
        filtered: usize,
    },
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct DetectorOutcome {
    pub detector: String,
    pub kind: DetectionType,
    pub status: DetectorStatus,
}

impl DetectorOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, DetectorStatus::Completed { .. })
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub video_id: VideoId,
    pub layout: RunLayout,
    pub frames_sampled: u64,
    /// Corrupt frames the sampler skipped.
    pub frames_skipped: u64,
    pub frames_persisted: u64,
    pub outcomes: Vec<DetectorOutcome>,
}

impl RunReport {
    /// True only when every detector produced its output document.
    pub fn all_completed(&self) -> bool {
        self.outcomes.iter().all(DetectorOutcome::is_completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DetectorOutcome> {
        self.outcomes.iter().filter(|o| !o.is_completed())
    }

    pub fn outcome(&self, detector: &str) -> Option<&DetectorOutcome> {
        self.outcomes.iter().find(|o| o.detector == detector)
    }
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    registry: DetectorRegistry,
    opener: Box<dyn SourceOpener>,
    id_factory: Box<IdFactory>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: DetectorRegistry::new(),
            opener: Box::new(FileSourceOpener),
            id_factory: Box::new(|| Box::new(RandomIds::new()) as Box<dyn IdGenerator>),
        }
    }

    pub fn with_detector<D: Detector + 'static>(mut self, detector: D) -> Self {
        self.registry.register(detector);
        self
    }

    pub fn with_detector_options<D: Detector + 'static>(
        mut self,
        detector: D,
        options: RunnerOptions,
    ) -> Self {
        self.registry.register_boxed(Box::new(detector), options);
        self
    }

    pub fn with_registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_source_opener<O: SourceOpener + 'static>(mut self, opener: O) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Factory for the id generator; called once per detector batch.
    pub fn with_id_generator<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn IdGenerator> + Send + Sync + 'static,
    {
        self.id_factory = Box::new(factory);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn run(&self, video_id: &VideoId, location: &str) -> Result<RunReport> {
        self.registry.validate()?;
        if self.config.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.registry.is_empty() {
            log::warn!("pipeline: no detectors registered for {}", video_id);
        }

        let layout = RunLayout::new(&self.config.base_dir, video_id);
        layout.ensure()?;
        let writer = ArtifactWriter::new(layout.clone(), self.config.jpeg_quality);

        let source = self.opener.open(location)?;
        log::info!("pipeline: {} opened from {}", video_id, location);

        let mut sampler = FrameSampler::new(source, self.config.interval)?;
        let pool = self.build_pool()?;
        let mut runs: Vec<SlotRun<'_>> = self.registry.iter().map(SlotRun::start).collect();

        // Frames live for one chunk: every detector sees them, then they are dropped.
        let chunk_size = if pool.is_some() { self.config.workers } else { 1 };
        let mut frames_persisted = 0;
        let mut chunk = Vec::with_capacity(chunk_size);
        loop {
            let next = sampler.next().transpose()?;
            let exhausted = next.is_none();
            if let Some(frame) = next {
                if self.config.persist_frames {
                    writer.write_frame(&frame)?;
                    frames_persisted += 1;
                }
                chunk.push(frame);
            }
            if chunk.len() >= chunk_size || (exhausted && !chunk.is_empty()) {
                for run in runs.iter_mut() {
                    run.detect_chunk(&chunk, pool.as_ref());
                }
                chunk.clear();
            }
            if exhausted {
                break;
            }
        }
        let stats = sampler.stats();
        drop(sampler);

        let outcomes = runs
            .into_iter()
            .map(|run| run.finish(video_id, &writer, self.id_factory.as_ref()))
            .collect();

        let report = RunReport {
            video_id: video_id.clone(),
            layout,
            frames_sampled: stats.frames_emitted,
            frames_skipped: stats.frames_corrupt,
            frames_persisted,
            outcomes,
        };
        log::info!(
            "pipeline: {} done, frames={} skipped={} detectors={} failed={}",
            video_id,
            report.frames_sampled,
            report.frames_skipped,
            report.outcomes.len(),
            report.failures().count()
        );
        Ok(report)
    }

    fn build_pool(&self) -> Result<Option<ThreadPool>> {
        if self.config.workers <= 1 {
            return Ok(None);
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("failed to start worker pool: {}", e)))
    }
}

/// One detector's progress through a run. The first failure parks the slot:
/// it sees no further frames and reports `Failed`.
struct SlotRun<'a> {
    slot: &'a DetectorSlot,
    runner: DetectionRunner<'a>,
    per_frame: Vec<FrameDetections>,
    failure: Option<PipelineError>,
}

impl<'a> SlotRun<'a> {
    fn start(slot: &'a DetectorSlot) -> Self {
        let failure = slot
            .detector
            .warm_up()
            .err()
            .map(|source| PipelineError::DetectorFailure {
                detector: slot.name().to_string(),
                frame_index: 0,
                source,
            });
        Self {
            slot,
            runner: DetectionRunner::new(slot.detector.as_ref(), slot.options),
            per_frame: Vec::new(),
            failure,
        }
    }

    fn detect_chunk(&mut self, frames: &[SampledFrame], pool: Option<&ThreadPool>) {
        if self.failure.is_some() {
            return;
        }
        let runner = &self.runner;
        let detected = match pool {
            Some(pool) => pool.install(|| {
                frames
                    .par_iter()
                    .map(|frame| runner.detect(frame))
                    .collect::<Result<Vec<_>>>()
            }),
            None => frames
                .iter()
                .map(|frame| runner.detect(frame))
                .collect::<Result<Vec<_>>>(),
        };
        match detected {
            Ok(detections) => self.per_frame.extend(detections),
            Err(e) => {
                log::warn!("pipeline: detector '{}' failed: {}", self.slot.name(), e);
                self.per_frame.clear();
                self.failure = Some(e);
            }
        }
    }

    fn finish(
        self,
        video_id: &VideoId,
        writer: &ArtifactWriter,
        ids: &IdFactory,
    ) -> DetectorOutcome {
        let detector = self.slot.name().to_string();
        let kind = self.slot.kind();
        let status = match self.failure {
            Some(e) => DetectorStatus::Failed(e),
            None => match write_batch(self.per_frame, video_id, kind, writer, ids) {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("pipeline: detector '{}' failed: {}", detector, e);
                    DetectorStatus::Failed(e)
                }
            },
        };
        DetectorOutcome {
            detector,
            kind,
            status,
        }
    }
}

fn write_batch(
    mut per_frame: Vec<FrameDetections>,
    video_id: &VideoId,
    kind: DetectionType,
    writer: &ArtifactWriter,
    id_factory: &IdFactory,
) -> Result<DetectorStatus> {
    // Ids are handed out in frame order regardless of worker count.
    per_frame.sort_by_key(|f| f.frame.index);

    let mut ids = id_factory();
    let mut batch = DetectionBatch::new(video_id.clone(), kind);
    let (mut dropped, mut filtered) = (0, 0);
    for frame_detections in per_frame {
        dropped += frame_detections.dropped;
        filtered += frame_detections.filtered;
        for detection in frame_detections.assign_ids(ids.as_mut()) {
            batch.push(detection)?;
        }
    }

    let written = writer.write(batch)?;
    Ok(DetectorStatus::Completed {
        json_path: written.json_path,
        detections: written.batch.len(),
        dropped,
        filtered,
    })
}
