//! Frame Annotator
//!
//! This crate implements the sampling and detection-correlation core of a
//! video annotation pipeline.
//!
//! # Architecture
//!
//! A run annotates one video and holds these invariants:
//!
//! 1. **Timeline fidelity**: every sampled frame carries its true decode index
//!    and `index / fps` timestamp, even when earlier frames were corrupt.
//! 2. **Valid detections only**: persisted boxes lie inside their frame and
//!    confidences lie in `[0, 1]`; anything else is dropped, never clamped.
//! 3. **Unique ids**: detection ids never repeat within a batch.
//! 4. **Atomic artifacts**: output files are replaced whole or not at all.
//! 5. **Per-detector isolation**: one failing detector does not stop the
//!    others, and the run report never claims success with an output missing.
//!
//! # Module Structure
//!
//! - `ingest`: video sources (local files, synthetic `stub://` streams)
//! - `sampler`: interval-based frame selection
//! - `detect`: detector capability, detection types, id generators
//! - `runner`: raw detection validation and normalization
//! - `artifact`: crop, frame and JSON persistence
//! - `pipeline`: run orchestration and reporting
//! - `config`: file and environment configuration

pub mod artifact;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod layout;
pub mod pipeline;
pub mod runner;
pub mod sampler;

pub use artifact::{ArtifactWriter, DetectionDocument, DetectionRecord, WrittenBatch};
pub use config::{AnnotatorConfig, DetectorSettings};
pub use detect::{
    BoundingBox, Detection, DetectionBatch, DetectionType, Detector, DetectorRegistry,
    FinalizedBatch, IdGenerator, RandomIds, RawDetection, RawLabel, SequentialIds, StubDetector,
};
pub use error::{PipelineError, Result};
pub use frame::{FrameRef, SampledFrame};
pub use ingest::{FileSource, FileSourceOpener, SourceOpener, SyntheticSource, VideoSource};
pub use layout::{RunLayout, VideoId};
pub use pipeline::{
    DetectorOutcome, DetectorStatus, PipelineConfig, PipelineOrchestrator, RunReport,
};
pub use runner::{DetectionRunner, RunnerOptions};
pub use sampler::{FrameSampler, SamplingInterval};

/// Install the default `env_logger` backend at `info`, overridable via
/// `RUST_LOG`. Calling it again is a no-op.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
