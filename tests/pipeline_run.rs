use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use frame_annotator::ingest::{SyntheticConfig, VideoSource};
use frame_annotator::{
    DetectionDocument, DetectionRecord, DetectionType, DetectorStatus, IdGenerator,
    PipelineConfig, PipelineError, PipelineOrchestrator, RawDetection, RawLabel, RunnerOptions,
    SamplingInterval, SequentialIds, SourceOpener, StubDetector, SyntheticSource, VideoId,
};
use image::RgbImage;

const CLIP: &str = "stub://clip?fps=30&frames=300&width=64&height=48";

fn face_detector() -> StubDetector {
    StubDetector::fixed(
        "faces",
        DetectionType::Face,
        vec![
            RawDetection::new([4.0, 4.0, 20.0, 24.0], 0.93, RawLabel::Name("face".into()))
                .with_extra("landmarks", vec![6, 8, 14, 8]),
            RawDetection::new([50.0, 50.0, 50.0, 80.0], 0.88, RawLabel::Name("face".into())),
        ],
    )
}

/// Output depends on the frame content, so different frames give different
/// detection counts.
fn object_detector() -> StubDetector {
    StubDetector::new("yolo", DetectionType::Object, |image: &RgbImage| {
        let shift = image.get_pixel(0, 0)[0] as u32;
        Ok((0..shift % 4)
            .map(|i| {
                let x = (i * 10) as f32;
                let confidence = 0.5 + i as f32 * 0.1;
                RawDetection::new([x, 0.0, x + 8.0, 8.0], confidence, RawLabel::Class(i % 2))
            })
            .collect())
    })
    .with_names(vec!["person".into(), "car".into()])
}

fn failing_text_detector() -> StubDetector {
    StubDetector::new("ocr", DetectionType::Text, |_| Err(anyhow!("ocr engine offline")))
}

fn config(base: &Path) -> PipelineConfig {
    PipelineConfig {
        base_dir: base.to_path_buf(),
        interval: SamplingInterval::EverySeconds(1.0),
        ..Default::default()
    }
}

fn sequential() -> Box<dyn IdGenerator> {
    Box::new(SequentialIds::new())
}

fn read_records(path: &Path, kind: DetectionType) -> Vec<DetectionRecord> {
    DetectionDocument::read(path)
        .expect("read document")
        .records(kind)
        .to_vec()
}

#[test]
fn full_run_reports_each_detector() {
    let temp_dir = tempfile::tempdir().unwrap();
    let video_id = VideoId::new("clip").unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(failing_text_detector())
        .with_detector_options(
            object_detector(),
            RunnerOptions {
                min_confidence: 0.0,
                save_crops: false,
            },
        )
        .with_detector(face_detector())
        .with_id_generator(sequential);

    let report = orchestrator.run(&video_id, CLIP).expect("run");

    assert_eq!(report.frames_sampled, 10);
    assert_eq!(report.frames_persisted, 10);
    assert_eq!(report.frames_skipped, 0);
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.detector.as_str()).collect();
    assert_eq!(order, vec!["faces", "yolo", "ocr"]);
    assert!(!report.all_completed());
    assert_eq!(report.failures().count(), 1);

    match &report.outcome("faces").unwrap().status {
        DetectorStatus::Completed {
            detections,
            dropped,
            ..
        } => {
            assert_eq!(*detections, 10);
            assert_eq!(*dropped, 10);
        }
        other => panic!("faces: {:?}", other),
    }
    assert!(matches!(
        report.outcome("ocr").unwrap().status,
        DetectorStatus::Failed(PipelineError::DetectorFailure { .. })
    ));

    let faces = read_records(&report.layout.output_path(DetectionType::Face), DetectionType::Face);
    assert_eq!(faces.len(), 10);
    for (i, record) in faces.iter().enumerate() {
        assert_eq!(record.frame_index, i as u64 * 30);
        assert_eq!(record.timestamp, i as f64);
        assert_eq!(record.detection_id, format!("{:05}", i));
        assert_eq!(<[u32; 4]>::from(record.bbox), [4, 4, 20, 24]);
        assert!(Path::new(record.crop_path.as_ref().unwrap()).is_file());
        assert!(Path::new(&record.frame_path).is_file());
    }

    let objects = read_records(
        &report.layout.output_path(DetectionType::Object),
        DetectionType::Object,
    );
    assert!(!objects.is_empty());
    assert!(objects.iter().all(|r| r.crop_path.is_none()));
    assert!(objects.iter().all(|r| r.label == "person" || r.label == "car"));
    assert!(objects.windows(2).all(|w| w[0].frame_index <= w[1].frame_index));

    assert!(!report.layout.output_path(DetectionType::Text).exists());
}

#[test]
fn parallel_run_matches_sequential_output() {
    let run = |workers: usize| {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator = PipelineOrchestrator::new(PipelineConfig {
            workers,
            persist_frames: false,
            interval: SamplingInterval::EveryNthFrame(3),
            ..config(temp_dir.path())
        })
        .with_detector(object_detector())
        .with_id_generator(sequential);
        let report = orchestrator
            .run(&VideoId::new("clip").unwrap(), CLIP)
            .expect("run");
        read_records(
            &report.layout.output_path(DetectionType::Object),
            DetectionType::Object,
        )
        .into_iter()
        .map(|r| (r.detection_id, r.frame_index, r.bbox, r.label, r.confidence))
        .collect::<Vec<_>>()
    };

    let sequential_output = run(1);
    assert!(!sequential_output.is_empty());
    assert_eq!(run(4), sequential_output);
}

#[test]
fn ids_are_unique_with_random_generator() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(PipelineConfig {
        interval: SamplingInterval::EveryNthFrame(1),
        persist_frames: false,
        workers: 3,
        ..config(temp_dir.path())
    })
    .with_detector(face_detector());

    let report = orchestrator
        .run(&VideoId::new("clip").unwrap(), CLIP)
        .expect("run");

    let faces = read_records(&report.layout.output_path(DetectionType::Face), DetectionType::Face);
    assert_eq!(faces.len(), 300);
    let mut ids: Vec<&str> = faces.iter().map(|r| r.detection_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 300);
}

#[test]
fn corrupt_frames_are_skipped_and_counted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(face_detector())
        .with_id_generator(sequential);

    let report = orchestrator
        .run(
            &VideoId::new("clip").unwrap(),
            "stub://clip?fps=30&frames=300&width=64&height=48&corrupt=30,31",
        )
        .expect("run");

    assert_eq!(report.frames_sampled, 9);
    assert_eq!(report.frames_skipped, 2);
    let faces = read_records(&report.layout.output_path(DetectionType::Face), DetectionType::Face);
    let indices: Vec<u64> = faces.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![0, 60, 90, 120, 150, 180, 210, 240, 270]);
    assert_eq!(faces[1].timestamp, 2.0);
}

struct UnreachableOpener;

impl SourceOpener for UnreachableOpener {
    fn open(&self, location: &str) -> frame_annotator::Result<Box<dyn VideoSource>> {
        Err(PipelineError::SourceUnavailable {
            location: location.to_string(),
            reason: "connection refused".into(),
        })
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(false)
}

#[test]
fn open_failure_writes_no_artifacts() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(face_detector())
        .with_source_opener(UnreachableOpener);

    let err = orchestrator
        .run(&VideoId::new("clip").unwrap(), "https://youtu.be/dQw4w9WgXcQ")
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    for dir in ["frames/clip", "crops/clip", "outputs/clip"] {
        assert!(is_empty_dir(&temp_dir.path().join(dir)), "{}", dir);
    }
}

#[test]
fn missing_file_is_source_unavailable() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("missing.mp4");
    let orchestrator =
        PipelineOrchestrator::new(config(temp_dir.path())).with_detector(face_detector());

    let err = orchestrator
        .run(&VideoId::new("clip").unwrap(), missing.to_str().unwrap())
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert!(is_empty_dir(&temp_dir.path().join("outputs/clip")));
}

struct SyntheticOpener(SyntheticConfig);

impl SourceOpener for SyntheticOpener {
    fn open(&self, location: &str) -> frame_annotator::Result<Box<dyn VideoSource>> {
        Ok(Box::new(SyntheticSource::new(location, self.0.clone())))
    }
}

#[test]
fn undecodable_stream_fails_the_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(face_detector())
        .with_source_opener(SyntheticOpener(SyntheticConfig {
            frames: 2,
            corrupt: vec![0, 1],
            ..Default::default()
        }));

    let err = orchestrator
        .run(&VideoId::new("clip").unwrap(), "synthetic")
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert!(is_empty_dir(&temp_dir.path().join("outputs/clip")));
}

#[test]
fn rerun_replaces_outputs_in_place() {
    let temp_dir = tempfile::tempdir().unwrap();
    let video_id = VideoId::new("clip").unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(face_detector())
        .with_id_generator(sequential);

    let first = orchestrator.run(&video_id, CLIP).expect("first run");
    let json_path = first.layout.output_path(DetectionType::Face);
    let before = fs::read(&json_path).unwrap();
    let crop = first.layout.crop_path(DetectionType::Face, "00003");
    let crop_before = fs::read(&crop).unwrap();

    orchestrator.run(&video_id, CLIP).expect("second run");

    assert_eq!(fs::read(&json_path).unwrap(), before);
    assert_eq!(fs::read(&crop).unwrap(), crop_before);
    assert_eq!(fs::read_dir(first.layout.crops_dir()).unwrap().count(), 10);
}

/// Counts every frame pulled from the wrapped source.
struct CountingSource {
    inner: SyntheticSource,
    decoded: Arc<AtomicU64>,
}

impl VideoSource for CountingSource {
    fn location(&self) -> &str {
        self.inner.location()
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn frame_count(&self) -> Option<u64> {
        self.inner.frame_count()
    }

    fn next_frame(&mut self) -> Option<frame_annotator::Result<RgbImage>> {
        let frame = self.inner.next_frame();
        if frame.is_some() {
            self.decoded.fetch_add(1, Ordering::SeqCst);
        }
        frame
    }
}

struct CountingOpener {
    config: SyntheticConfig,
    decoded: Arc<AtomicU64>,
}

impl SourceOpener for CountingOpener {
    fn open(&self, location: &str) -> frame_annotator::Result<Box<dyn VideoSource>> {
        Ok(Box::new(CountingSource {
            inner: SyntheticSource::new(location, self.config.clone()),
            decoded: Arc::clone(&self.decoded),
        }))
    }
}

#[test]
fn detectors_see_frames_while_the_source_is_still_decoding() {
    for workers in [1, 3] {
        let temp_dir = tempfile::tempdir().unwrap();
        let decoded = Arc::new(AtomicU64::new(0));
        let decoded_at_first_predict = Arc::new(AtomicU64::new(u64::MAX));

        let seen = Arc::clone(&decoded);
        let first = Arc::clone(&decoded_at_first_predict);
        let detector = StubDetector::new("faces", DetectionType::Face, move |_| {
            let now = seen.load(Ordering::SeqCst);
            let _ = first.compare_exchange(u64::MAX, now, Ordering::SeqCst, Ordering::SeqCst);
            Ok(Vec::new())
        });
        let orchestrator = PipelineOrchestrator::new(PipelineConfig {
            workers,
            persist_frames: false,
            interval: SamplingInterval::EveryNthFrame(1),
            ..config(temp_dir.path())
        })
        .with_detector(detector)
        .with_source_opener(CountingOpener {
            config: SyntheticConfig {
                frames: 300,
                width: 8,
                height: 8,
                ..Default::default()
            },
            decoded: Arc::clone(&decoded),
        });

        let report = orchestrator
            .run(&VideoId::new("clip").unwrap(), "counting")
            .expect("run");

        assert!(report.all_completed());
        assert_eq!(report.frames_sampled, 300);
        assert_eq!(decoded.load(Ordering::SeqCst), 300);
        let first_seen = decoded_at_first_predict.load(Ordering::SeqCst);
        assert!(first_seen <= workers as u64, "workers={} first={}", workers, first_seen);
    }
}

#[test]
fn failed_detector_sees_no_further_frames() {
    let temp_dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let flaky = StubDetector::new("ocr", DetectionType::Text, move |_| {
        if counted.fetch_add(1, Ordering::SeqCst) == 2 {
            return Err(anyhow!("ocr engine crashed"));
        }
        Ok(Vec::new())
    });
    let orchestrator = PipelineOrchestrator::new(PipelineConfig {
        persist_frames: false,
        interval: SamplingInterval::EveryNthFrame(1),
        ..config(temp_dir.path())
    })
    .with_detector(flaky)
    .with_detector(face_detector());

    let report = orchestrator
        .run(
            &VideoId::new("clip").unwrap(),
            "stub://clip?fps=30&frames=30&width=64&height=48",
        )
        .expect("run");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match &report.outcome("ocr").unwrap().status {
        DetectorStatus::Failed(PipelineError::DetectorFailure { frame_index, .. }) => {
            assert_eq!(*frame_index, 2)
        }
        other => panic!("ocr: {:?}", other),
    }
    assert!(!report.layout.output_path(DetectionType::Text).exists());
    match &report.outcome("faces").unwrap().status {
        DetectorStatus::Completed { detections, .. } => assert_eq!(*detections, 30),
        other => panic!("faces: {:?}", other),
    }
}

#[test]
fn stream_failure_keeps_persisted_frames_but_writes_no_documents() {
    let temp_dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(config(temp_dir.path()))
        .with_detector(face_detector())
        .with_id_generator(sequential);

    let err = orchestrator
        .run(
            &VideoId::new("clip").unwrap(),
            "stub://clip?fps=30&frames=300&width=64&height=48&fail_at=95",
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    assert!(is_empty_dir(&temp_dir.path().join("outputs/clip")));
    assert!(is_empty_dir(&temp_dir.path().join("crops/clip")));
    let mut frames: Vec<String> = fs::read_dir(temp_dir.path().join("frames/clip"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    frames.sort();
    assert_eq!(
        frames,
        vec![
            "frame_000000.jpg",
            "frame_000030.jpg",
            "frame_000060.jpg",
            "frame_000090.jpg"
        ]
    );
}
