use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::artifact::DEFAULT_JPEG_QUALITY;
use crate::detect::{DetectionType, Detector, DetectorRegistry, StubDetector};
use crate::pipeline::PipelineConfig;
use crate::runner::RunnerOptions;
use crate::sampler::SamplingInterval;

const DEFAULT_BASE_DIR: &str = "data";
const DEFAULT_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct AnnotatorConfigFile {
    base_dir: Option<PathBuf>,
    sampling: Option<SamplingConfigFile>,
    persist_frames: Option<bool>,
    workers: Option<usize>,
    jpeg_quality: Option<u8>,
    detectors: Option<Vec<DetectorConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    interval_seconds: Option<f64>,
    every_n_frames: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DetectorConfigFile {
    kind: String,
    name: Option<String>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    names: Option<Vec<String>>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    save_crops: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Detects nothing. Useful for dry runs of the sampling stage.
    Stub,
    /// ONNX model through tract (feature: backend-tract).
    Tract,
}

#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    pub base_dir: PathBuf,
    pub sampling: SamplingInterval,
    pub persist_frames: bool,
    pub workers: usize,
    pub jpeg_quality: u8,
    pub detectors: Vec<DetectorSettings>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectionType,
    pub name: String,
    pub backend: BackendKind,
    pub model_path: Option<PathBuf>,
    pub names: Vec<String>,
    pub input_size: u32,
    pub min_confidence: f32,
    pub save_crops: bool,
}

impl DetectorSettings {
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            min_confidence: self.min_confidence,
            save_crops: self.save_crops,
        }
    }

    fn build(&self) -> Result<Box<dyn Detector>> {
        match self.backend {
            BackendKind::Stub => Ok(Box::new(
                StubDetector::empty(&self.name, self.kind).with_names(self.names.clone()),
            )),
            BackendKind::Tract => self.build_tract(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<Box<dyn Detector>> {
        let model_path = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("detector '{}' needs a model_path", self.name))?;
        let mut detector = crate::detect::backends::TractDetector::new(
            &self.name,
            self.kind,
            model_path,
            self.input_size,
            self.names.clone(),
        )?;
        // Zero keeps the model default threshold.
        if self.min_confidence > 0.0 {
            detector = detector.with_threshold(self.min_confidence);
        }
        Ok(Box::new(detector))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<Box<dyn Detector>> {
        Err(anyhow!(
            "detector '{}' uses the tract backend, which requires the backend-tract feature",
            self.name
        ))
    }
}

impl AnnotatorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANNOTATOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnnotatorConfigFile) -> Result<Self> {
        let base_dir = file
            .base_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR));
        let sampling = match file.sampling.unwrap_or_default() {
            SamplingConfigFile {
                interval_seconds: Some(_),
                every_n_frames: Some(_),
            } => {
                return Err(anyhow!(
                    "sampling takes interval_seconds or every_n_frames, not both"
                ))
            }
            SamplingConfigFile {
                every_n_frames: Some(n),
                ..
            } => SamplingInterval::EveryNthFrame(n),
            SamplingConfigFile {
                interval_seconds, ..
            } => SamplingInterval::EverySeconds(interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECS)),
        };
        let detectors = file
            .detectors
            .unwrap_or_default()
            .into_iter()
            .map(parse_detector)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            base_dir,
            sampling,
            persist_frames: file.persist_frames.unwrap_or(true),
            workers: file.workers.unwrap_or(1),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            detectors,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("ANNOTATOR_BASE_DIR") {
            if !dir.trim().is_empty() {
                self.base_dir = PathBuf::from(dir);
            }
        }
        let interval = std::env::var("ANNOTATOR_INTERVAL_SECS").ok();
        let every_n = std::env::var("ANNOTATOR_EVERY_N_FRAMES").ok();
        if interval.is_some() && every_n.is_some() {
            return Err(anyhow!(
                "set ANNOTATOR_INTERVAL_SECS or ANNOTATOR_EVERY_N_FRAMES, not both"
            ));
        }
        if let Some(seconds) = interval {
            let seconds: f64 = seconds
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_INTERVAL_SECS must be a number of seconds"))?;
            self.sampling = SamplingInterval::EverySeconds(seconds);
        }
        if let Some(n) = every_n {
            let n: u32 = n
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_EVERY_N_FRAMES must be an integer"))?;
            self.sampling = SamplingInterval::EveryNthFrame(n);
        }
        if let Ok(workers) = std::env::var("ANNOTATOR_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_WORKERS must be an integer"))?;
        }
        if let Ok(persist) = std::env::var("ANNOTATOR_PERSIST_FRAMES") {
            self.persist_frames = parse_bool(&persist)
                .ok_or_else(|| anyhow!("ANNOTATOR_PERSIST_FRAMES must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        match self.sampling {
            SamplingInterval::EverySeconds(seconds) if !seconds.is_finite() || seconds <= 0.0 => {
                return Err(anyhow!("sampling interval must be greater than zero"));
            }
            SamplingInterval::EveryNthFrame(0) => {
                return Err(anyhow!("every_n_frames must be at least 1"));
            }
            _ => {}
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        let mut kinds = HashSet::new();
        for detector in &self.detectors {
            if !(0.0..=1.0).contains(&detector.min_confidence) {
                return Err(anyhow!(
                    "detector '{}': min_confidence must be within [0, 1]",
                    detector.name
                ));
            }
            if detector.backend == BackendKind::Stub && detector.model_path.is_some() {
                return Err(anyhow!(
                    "detector '{}': the stub backend does not load model_path",
                    detector.name
                ));
            }
            if detector.input_size == 0 {
                return Err(anyhow!("detector '{}': input_size must be positive", detector.name));
            }
            if !kinds.insert(detector.kind) {
                return Err(anyhow!(
                    "more than one detector configured for {} detections",
                    detector.kind
                ));
            }
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            base_dir: self.base_dir.clone(),
            interval: self.sampling,
            persist_frames: self.persist_frames,
            workers: self.workers,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Instantiate every configured detector. Model loading happens here.
    pub fn build_detectors(&self) -> Result<DetectorRegistry> {
        let mut registry = DetectorRegistry::new();
        for settings in &self.detectors {
            log::info!(
                "config: loading {} detector '{}' ({:?})",
                settings.kind,
                settings.name,
                settings.backend
            );
            registry.register_boxed(settings.build()?, settings.runner_options());
        }
        Ok(registry)
    }
}

fn parse_detector(file: DetectorConfigFile) -> Result<DetectorSettings> {
    let kind: DetectionType = file.kind.parse()?;
    // A model path without an explicit backend means the model should run.
    let backend = match file.backend.as_deref().map(str::trim) {
        None if file.model_path.is_some() => BackendKind::Tract,
        None | Some("stub") => BackendKind::Stub,
        Some("tract") | Some("onnx") => BackendKind::Tract,
        Some(other) => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    Ok(DetectorSettings {
        kind,
        name: file.name.unwrap_or_else(|| kind.to_string()),
        backend,
        model_path: file.model_path,
        names: file.names.unwrap_or_default(),
        input_size: file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        min_confidence: file.min_confidence.unwrap_or(0.0),
        save_crops: file.save_crops.unwrap_or(kind == DetectionType::Face),
    })
}

fn read_config_file(path: &Path) -> Result<AnnotatorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
