use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use regex::Regex;

use ppe_watch::detect::{shared, ScriptedBackend, ScriptedResponse, StubBackend};
use ppe_watch::ingest::ScriptedSource;
use ppe_watch::{
    BoundingBox, Detection, EventKind, ManualClock, PipelineController, PipelineEvent,
    PipelineState, ReconnectPolicy, SamplingMode, SessionConfig, SharedDetector, Severity,
    TerminationReason,
};

const TICK: Duration = Duration::from_millis(100);

fn hit(label: &str, confidence: f32) -> Detection {
    Detection::new(
        label,
        confidence,
        BoundingBox::new(8.0, 8.0, 40.0, 40.0).unwrap(),
    )
    .unwrap()
}

fn controller(detector: SharedDetector, clock: &ManualClock) -> PipelineController {
    PipelineController::new(detector, Arc::new(clock.clone()))
}

fn quick_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        backoff: Duration::from_millis(1),
        max_attempts: None,
    }
}

fn drain(rx: &Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    rx.try_iter().collect()
}

#[test]
fn ten_fps_camera_for_thirty_seconds_samples_every_frame() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let reports = pipeline.subscribe(EventKind::Report);
    let raw = pipeline.subscribe(EventKind::RawFrame);

    let source = ScriptedSource::device()
        .frames(300)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        target_fps: 10,
        validation_duration: Duration::from_secs(30),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::ValidationComplete);
    assert_eq!(outcome.report.raw_frames, 300);
    assert_eq!(outcome.report.sampled_frames, 300);
    assert_eq!(outcome.report.drop_ratio, 0.0);
    assert_eq!(outcome.report.actual_duration, Duration::from_secs(30));
    assert!(outcome.summary.is_none());
    assert_eq!(pipeline.state(), PipelineState::Terminated);

    assert_eq!(drain(&raw).len(), 300);
    let reports = drain(&reports);
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        PipelineEvent::Report(report) => {
            assert_eq!(report, &outcome.report);
            assert!(report.to_string().contains("validation time completed"));
        }
        other => panic!("unexpected event {:?}", other.kind()),
    }
}

#[test]
fn twenty_fps_camera_is_decimated_to_target() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let windows = pipeline.subscribe(EventKind::RateWindow);

    let source = ScriptedSource::device()
        .endless()
        .advancing(clock.clone(), Duration::from_millis(50));
    let config = SessionConfig {
        target_fps: 5,
        validation_duration: Duration::from_secs(10),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::ValidationComplete);
    assert_eq!(outcome.report.raw_frames, 200);
    // First frame at 50ms, then one per 200ms deadline up to 10s.
    assert_eq!(outcome.report.sampled_frames, 51);
    assert!((outcome.report.drop_ratio - (1.0 - 51.0 / 200.0)).abs() < 1e-9);

    let windows = drain(&windows);
    assert!(windows.len() >= 9);
    for event in windows {
        match event {
            PipelineEvent::RateWindow(sample) => {
                assert_eq!(sample.target_fps, 5);
                assert!(sample.sampled <= 6, "{:?}", sample);
            }
            other => panic!("unexpected event {:?}", other.kind()),
        }
    }
}

#[test]
fn camera_outage_reconnects_once_and_keeps_counting() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let errors = pipeline.subscribe(EventKind::Error);

    let source = ScriptedSource::device()
        .frames(5)
        .failures(3)
        .endless()
        .advancing(clock.clone(), TICK);
    let probe = source.probe();
    let config = SessionConfig {
        target_fps: 10,
        validation_duration: Duration::from_secs(2),
        reconnect: quick_reconnect(),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::ValidationComplete);
    assert_eq!(outcome.report.raw_frames, 20);
    assert_eq!(probe.opens(), 4);
    assert_eq!(probe.releases(), 4);

    let events = drain(&errors);
    let transient = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::Error {
                    severity: Severity::Transient,
                    ..
                }
            )
        })
        .count();
    assert_eq!(transient, 3);
    let reconnected: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Reconnected { attempts, .. } => Some(*attempts),
            _ => None,
        })
        .collect();
    assert_eq!(reconnected, vec![3]);
    assert!(matches!(events.last(), Some(PipelineEvent::Reconnected { .. })));
}

#[test]
fn failed_reopen_ends_session_as_source_failure() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let errors = pipeline.subscribe(EventKind::Error);
    let reports = pipeline.subscribe(EventKind::Report);

    let source = ScriptedSource::device()
        .frames(3)
        .failures(1)
        .endless()
        .failing_reopens(1)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        reconnect: quick_reconnect(),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::SourceFailed);
    assert_eq!(outcome.report.raw_frames, 3);
    assert_eq!(pipeline.state(), PipelineState::Terminated);

    let severities: Vec<Severity> = drain(&errors)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::Error { severity, .. } => Some(severity),
            _ => None,
        })
        .collect();
    assert_eq!(severities, vec![Severity::Transient, Severity::Fatal]);
    assert_eq!(drain(&reports).len(), 1);
}

#[test]
fn attempt_ceiling_turns_a_long_outage_fatal() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let errors = pipeline.subscribe(EventKind::Error);

    let source = ScriptedSource::device()
        .frames(2)
        .failures(5)
        .endless()
        .advancing(clock.clone(), TICK);
    let probe = source.probe();
    let config = SessionConfig {
        reconnect: ReconnectPolicy {
            backoff: Duration::from_millis(1),
            max_attempts: Some(2),
        },
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::SourceFailed);
    assert_eq!(probe.opens(), 3);
    let fatal: Vec<String> = drain(&errors)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::Error {
                severity: Severity::Fatal,
                message,
            } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].contains("after 2 reconnect attempts"), "{}", fatal[0]);
}

#[test]
fn video_file_end_reports_zero_drop_ratio() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let errors = pipeline.subscribe(EventKind::Error);

    let source = ScriptedSource::file()
        .frames(40)
        .reporting_duration(Duration::from_secs(4))
        .advancing(clock.clone(), TICK);
    let probe = source.probe();
    let config = SessionConfig {
        target_fps: 2,
        reconnect: quick_reconnect(),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::EndOfStream);
    assert_eq!(outcome.report.raw_frames, 40);
    assert!(outcome.report.sampled_frames < 40);
    assert_eq!(outcome.report.drop_ratio, 0.0);
    assert_eq!(outcome.report.source_duration, Some(Duration::from_secs(4)));
    assert_eq!(probe.opens(), 1);

    let text = outcome.report.to_string();
    assert!(text.contains("Termination reason  : video ended"), "{}", text);
    assert!(text.contains("Video file duration : 4.0 sec"), "{}", text);
    assert!(text.contains("Frame drop ratio    : 0.00"), "{}", text);
    assert!(drain(&errors).is_empty());
}

#[test]
fn frame_step_mode_keeps_every_nth_frame() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);

    let source = ScriptedSource::file()
        .frames(90)
        .native_rate(30)
        .advancing(clock.clone(), Duration::from_millis(33));
    let config = SessionConfig {
        target_fps: 5,
        sampling_mode: SamplingMode::FrameStep,
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::EndOfStream);
    assert_eq!(outcome.report.raw_frames, 90);
    assert_eq!(outcome.report.sampled_frames, 15);
}

#[test]
fn repeated_violations_are_suppressed_and_summarised_once() {
    let clock = ManualClock::new();
    let detector = shared(ScriptedBackend::constant(vec![
        hit("NO-Hardhat", 0.9),
        hit("NO-Mask", 0.8),
        hit("Person", 0.95),
        hit("NO-Safety Vest", 0.2),
    ]));
    let mut pipeline = controller(detector, &clock);
    let alerts = pipeline.subscribe(EventKind::Alert);
    let summaries = pipeline.subscribe(EventKind::Summary);
    let detections = pipeline.subscribe(EventKind::DetectionOverlay);
    let violations = pipeline.subscribe(EventKind::ViolationOverlay);

    let source = ScriptedSource::device()
        .frames(30)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        target_fps: 10,
        validation_duration: Duration::from_secs(3),
        detection_enabled: true,
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();
    assert_eq!(outcome.reason, TerminationReason::ValidationComplete);

    let alerts: Vec<String> = drain(&alerts)
        .into_iter()
        .filter_map(|e| e.text().map(str::to_string))
        .collect();
    // One alert per label per second: at 0.1s, 1.1s and 2.1s.
    assert_eq!(
        alerts,
        vec![
            "[00:00:00] VIOLATION: NO-Hardhat",
            "[00:00:00] VIOLATION: NO-Mask",
            "[00:00:01] VIOLATION: NO-Hardhat",
            "[00:00:01] VIOLATION: NO-Mask",
            "[00:00:02] VIOLATION: NO-Hardhat",
            "[00:00:02] VIOLATION: NO-Mask",
        ]
    );
    let pattern = Regex::new(r"^\[\d{2}:\d{2}:\d{2}\] VIOLATION: .+$").unwrap();
    assert!(alerts.iter().all(|line| pattern.is_match(line)));

    let expected = "FINAL SUMMARY:\nAll violations are: NO-Hardhat, NO-Mask";
    assert_eq!(outcome.summary.as_deref(), Some(expected));
    let summaries = drain(&summaries);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].text(), Some(expected));

    assert_eq!(drain(&detections).len(), 30);
    assert_eq!(drain(&violations).len(), 3);
}

#[test]
fn overlays_are_copies_of_the_sampled_frame() {
    let clock = ManualClock::new();
    let detector = shared(ScriptedBackend::constant(vec![hit("NO-Mask", 0.9)]));
    let mut pipeline = controller(detector, &clock);
    let events = pipeline.subscribe_many(&[
        EventKind::SampledFrame,
        EventKind::DetectionOverlay,
        EventKind::ViolationOverlay,
    ]);

    let source = ScriptedSource::device()
        .frames(1)
        .size(64, 64)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        validation_duration: Duration::from_millis(100),
        detection_enabled: true,
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    pipeline.wait().unwrap().unwrap();

    let frames: Vec<_> = drain(&events);
    assert_eq!(frames.len(), 3);
    let (
        PipelineEvent::SampledFrame(sampled),
        PipelineEvent::DetectionOverlay(detected),
        PipelineEvent::ViolationOverlay(flagged),
    ) = (&frames[0], &frames[1], &frames[2])
    else {
        panic!("unexpected event order");
    };
    assert!(!sampled.shares_pixels_with(detected));
    assert!(!sampled.shares_pixels_with(flagged));
    assert_ne!(sampled.pixels(), detected.pixels());
    assert_ne!(sampled.pixels(), flagged.pixels());
    assert_eq!(sampled.index(), flagged.index());
}

#[test]
fn alerts_follow_their_sampled_frame() {
    let clock = ManualClock::new();
    let detector = shared(ScriptedBackend::constant(vec![hit("NO-Hardhat", 0.9)]));
    let mut pipeline = controller(detector, &clock);
    let events = pipeline.subscribe_many(&[EventKind::SampledFrame, EventKind::Alert]);

    let source = ScriptedSource::device()
        .frames(25)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        target_fps: 10,
        validation_duration: Duration::from_millis(2500),
        detection_enabled: true,
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    pipeline.wait().unwrap().unwrap();

    let events = drain(&events);
    assert!(matches!(events.first(), Some(PipelineEvent::SampledFrame(_))));
    let mut previous = None;
    let mut alerts = 0;
    for event in &events {
        if let PipelineEvent::Alert(_) = event {
            alerts += 1;
            assert_eq!(previous, Some(EventKind::SampledFrame));
        }
        previous = Some(event.kind());
    }
    assert_eq!(alerts, 3);
}

#[test]
fn detection_disabled_emits_no_overlays_or_alerts() {
    let clock = ManualClock::new();
    let detector = shared(ScriptedBackend::constant(vec![hit("NO-Hardhat", 0.9)]));
    let mut pipeline = controller(detector, &clock);
    let events = pipeline.subscribe_many(&[
        EventKind::DetectionOverlay,
        EventKind::ViolationOverlay,
        EventKind::Alert,
        EventKind::Summary,
    ]);

    let source = ScriptedSource::device()
        .frames(10)
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        validation_duration: Duration::from_secs(1),
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert!(!pipeline.detection_enabled());
    assert!(outcome.summary.is_none());
    assert!(drain(&events).is_empty());
}

#[test]
fn detector_failure_is_fatal_for_the_session() {
    let clock = ManualClock::new();
    let detector = shared(ScriptedBackend::new(vec![
        ScriptedResponse::Detections(vec![hit("NO-Mask", 0.9)]),
        ScriptedResponse::Fail("model crashed".into()),
    ]));
    let mut pipeline = controller(detector, &clock);
    let errors = pipeline.subscribe(EventKind::Error);
    let summaries = pipeline.subscribe(EventKind::Summary);

    let source = ScriptedSource::device()
        .endless()
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        target_fps: 10,
        detection_enabled: true,
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();
    let outcome = pipeline.wait().unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::DetectorFailed);
    assert_eq!(outcome.report.raw_frames, 2);
    assert_eq!(pipeline.state(), PipelineState::Terminated);

    let errors = drain(&errors);
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        PipelineEvent::Error {
            severity: Severity::Fatal,
            ..
        }
    ));
    // The alert raised before the failure is still summarised.
    assert_eq!(drain(&summaries).len(), 1);
}

#[test]
fn stop_interrupts_a_reconnect_backoff() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let errors = pipeline.subscribe(EventKind::Error);

    let source = ScriptedSource::device()
        .frames(1)
        .failures(1)
        .endless()
        .advancing(clock.clone(), TICK);
    let config = SessionConfig {
        reconnect: ReconnectPolicy {
            backoff: Duration::from_secs(30),
            max_attempts: None,
        },
        ..SessionConfig::default()
    };
    pipeline.start(Box::new(source), config).unwrap();

    let first = errors
        .recv_timeout(Duration::from_secs(5))
        .expect("transient error event");
    assert!(matches!(
        first,
        PipelineEvent::Error {
            severity: Severity::Transient,
            ..
        }
    ));

    let asked = Instant::now();
    pipeline.stop();
    let outcome = pipeline.wait().unwrap().unwrap();
    assert!(asked.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.reason, TerminationReason::StoppedByCaller);
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[test]
fn starting_again_finishes_the_previous_session_first() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let reports = pipeline.subscribe(EventKind::Report);

    let first = ScriptedSource::device()
        .endless()
        .paced(Duration::from_millis(2));
    let first_probe = first.probe();
    pipeline
        .start(Box::new(first), SessionConfig::default())
        .unwrap();

    let second = ScriptedSource::file()
        .frames(5)
        .advancing(clock.clone(), TICK);
    pipeline
        .start(Box::new(second), SessionConfig::default())
        .unwrap();
    assert_eq!(first_probe.releases(), 1);

    let outcome = pipeline.wait().unwrap().unwrap();
    assert_eq!(outcome.reason, TerminationReason::EndOfStream);

    let reasons: Vec<TerminationReason> = drain(&reports)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::Report(report) => Some(report.reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            TerminationReason::StoppedByCaller,
            TerminationReason::EndOfStream
        ]
    );
}

#[test]
fn zero_target_fps_is_rejected_mid_session() {
    let clock = ManualClock::new();
    let mut pipeline = controller(shared(StubBackend::new()), &clock);
    let source = ScriptedSource::device()
        .endless()
        .paced(Duration::from_millis(2));
    pipeline
        .start(
            Box::new(source),
            SessionConfig {
                target_fps: 4,
                ..SessionConfig::default()
            },
        )
        .unwrap();

    assert!(pipeline.set_target_fps(0).is_err());
    assert_eq!(pipeline.target_fps(), 4);
    pipeline.set_target_fps(8).unwrap();
    assert_eq!(pipeline.target_fps(), 8);

    pipeline.stop();
    let outcome = pipeline.wait().unwrap().unwrap();
    assert_eq!(outcome.reason, TerminationReason::StoppedByCaller);
}
