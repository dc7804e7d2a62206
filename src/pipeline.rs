//! Pipeline controller and capture worker.
//!
//! `PipelineController` owns at most one active session. A session runs on a
//! dedicated `ppe-capture` thread that reads frames, gates them through the
//! sampler, runs detection on sampled frames, suppresses duplicate alerts and
//! keeps the session counters. Everything the worker produces leaves through
//! the `EventBus`; it never waits on a consumer.
//!
//! Control operations write atomics the worker polls once per iteration, so
//! they never block on the worker. `stop()` takes effect after the current
//! read and frame processing complete, or immediately during a reconnect
//! backoff. Every exit path runs the same stopping sequence: release the
//! source, flush the final summary, publish the validation report.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;

use crate::clock::Clock;
use crate::detect::{run_detector, SharedDetector};
use crate::error::PipelineError;
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::instrument::{SessionCounters, TerminationReason, ValidationReport};
use crate::reconnect::{ReconnectOutcome, ReconnectPolicy, ReconnectionManager};
use crate::sampling::{Sampler, SamplingMode, DEFAULT_NATIVE_FPS};
use crate::suppress::{format_alert, AlertSuppressor, DEFAULT_SUPPRESSION_WINDOW};
use crate::violation::{ViolationClassifier, DEFAULT_VIOLATION_LABELS};

pub const DEFAULT_TARGET_FPS: u32 = 5;
pub const DEFAULT_VALIDATION_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Reconnecting,
    Stopping,
    Terminated,
}

/// Per-session settings handed to `PipelineController::start`.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub target_fps: u32,
    pub sampling_mode: SamplingMode,
    /// Overrides the source's own native rate for frame-step sampling.
    pub native_fps: Option<u32>,
    pub validation_duration: Duration,
    pub suppression_window: Duration,
    pub confidence_threshold: f32,
    pub violation_labels: Vec<String>,
    pub reconnect: ReconnectPolicy,
    pub detection_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            sampling_mode: SamplingMode::Time,
            native_fps: None,
            validation_duration: DEFAULT_VALIDATION_DURATION,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            violation_labels: DEFAULT_VIOLATION_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
            reconnect: ReconnectPolicy::default(),
            detection_enabled: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.target_fps == 0 {
            return Err(PipelineError::invalid("target fps must be >= 1"));
        }
        if self.native_fps == Some(0) {
            return Err(PipelineError::invalid("native fps must be >= 1"));
        }
        if self.validation_duration.is_zero() {
            return Err(PipelineError::invalid("validation duration must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::invalid(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.violation_labels.iter().all(|label| label.trim().is_empty()) {
            return Err(PipelineError::invalid("violation label set is empty"));
        }
        Ok(())
    }
}

/// How a session ended, returned by `PipelineController::wait`.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub reason: TerminationReason,
    pub summary: Option<String>,
    pub report: ValidationReport,
}

#[derive(Debug)]
struct Controls {
    stop: AtomicBool,
    detection_enabled: AtomicBool,
    target_fps: AtomicU32,
    state: Mutex<PipelineState>,
}

impl Controls {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            detection_enabled: AtomicBool::new(false),
            target_fps: AtomicU32::new(DEFAULT_TARGET_FPS),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    fn set_state(&self, state: PipelineState) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = state;
    }

    fn state(&self) -> PipelineState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable stop request, e.g. for a Ctrl-C handler.
#[derive(Clone, Debug)]
pub struct StopHandle {
    controls: Arc<Controls>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.controls.stop.store(true, Ordering::SeqCst);
    }
}

pub struct PipelineController {
    bus: Arc<EventBus>,
    controls: Arc<Controls>,
    detector: SharedDetector,
    clock: Arc<dyn Clock>,
    worker: Option<JoinHandle<SessionOutcome>>,
}

impl PipelineController {
    pub fn new(detector: SharedDetector, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            controls: Arc::new(Controls::new()),
            detector,
            clock,
            worker: None,
        }
    }

    pub fn subscribe(&self, kind: EventKind) -> crossbeam_channel::Receiver<PipelineEvent> {
        self.bus.subscribe(kind)
    }

    pub fn subscribe_many(&self, kinds: &[EventKind]) -> crossbeam_channel::Receiver<PipelineEvent> {
        self.bus.subscribe_many(kinds)
    }

    /// Open `source` and start a capture session.
    ///
    /// A session still running is stopped and joined first, so its terminal
    /// events are published before anything from the new one.
    pub fn start(
        &mut self,
        mut source: Box<dyn FrameSource>,
        config: SessionConfig,
    ) -> Result<(), PipelineError> {
        config.validate()?;
        if self.worker.is_some() {
            log::info!("PipelineController: stopping previous session before start");
            self.stop();
            if let Err(err) = self.wait() {
                log::warn!("PipelineController: previous session ended badly: {}", err);
            }
        }

        if let Err(err) = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))
            .and_then(|mut detector| detector.warm_up())
        {
            return Err(PipelineError::Detection(err));
        }

        source.open().map_err(|err| {
            PipelineError::invalid(format!("cannot open {}: {:#}", source.describe(), err))
        })?;

        let start = self.clock.now();
        let native_fps = config
            .native_fps
            .or_else(|| source.native_fps())
            .filter(|fps| *fps > 0)
            .unwrap_or(DEFAULT_NATIVE_FPS);
        let sampler = match Sampler::new(config.sampling_mode, config.target_fps, native_fps, start)
        {
            Ok(sampler) => sampler,
            Err(err) => {
                source.release();
                return Err(err);
            }
        };

        self.controls.stop.store(false, Ordering::SeqCst);
        self.controls
            .detection_enabled
            .store(config.detection_enabled, Ordering::SeqCst);
        self.controls
            .target_fps
            .store(config.target_fps, Ordering::SeqCst);
        self.controls.set_state(PipelineState::Running);

        log::info!(
            "PipelineController: session started on {} ({} fps, {:?} sampling, {:.0}s validation)",
            source.describe(),
            config.target_fps,
            config.sampling_mode,
            config.validation_duration.as_secs_f64()
        );

        let worker = CaptureWorker {
            source,
            sampler,
            counters: SessionCounters::new(start),
            suppressor: AlertSuppressor::new(config.suppression_window),
            classifier: ViolationClassifier::new(config.violation_labels.iter().cloned()),
            reconnect: ReconnectionManager::new(config.reconnect.clone()),
            config,
            controls: self.controls.clone(),
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            detector: self.detector.clone(),
        };
        let spawned = thread::Builder::new()
            .name("ppe-capture".to_string())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.controls.set_state(PipelineState::Terminated);
                Err(PipelineError::Spawn(err))
            }
        }
    }

    /// Request a cooperative stop. Returns immediately.
    pub fn stop(&self) {
        self.controls.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            controls: self.controls.clone(),
        }
    }

    /// Block until the current session's worker exits. `None` if no session ran.
    pub fn wait(&mut self) -> Result<Option<SessionOutcome>, PipelineError> {
        let Some(handle) = self.worker.take() else {
            return Ok(None);
        };
        match handle.join() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(_) => {
                self.controls.set_state(PipelineState::Terminated);
                Err(PipelineError::WorkerPanicked)
            }
        }
    }

    /// Applies from the next sampled frame.
    pub fn set_detection_enabled(&self, enabled: bool) {
        self.controls
            .detection_enabled
            .store(enabled, Ordering::SeqCst);
    }

    pub fn detection_enabled(&self) -> bool {
        self.controls.detection_enabled.load(Ordering::SeqCst)
    }

    /// Change the sampling rate. Zero is rejected and the previous rate kept.
    pub fn set_target_fps(&self, target_fps: u32) -> Result<(), PipelineError> {
        if target_fps == 0 {
            log::warn!("PipelineController: ignoring target fps of 0");
            return Err(PipelineError::invalid("target fps must be >= 1"));
        }
        self.controls.target_fps.store(target_fps, Ordering::SeqCst);
        Ok(())
    }

    pub fn target_fps(&self) -> u32 {
        self.controls.target_fps.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        self.controls.state()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
            if let Err(err) = self.wait() {
                log::warn!("PipelineController: {}", err);
            }
        }
    }
}

struct CaptureWorker {
    source: Box<dyn FrameSource>,
    sampler: Sampler,
    counters: SessionCounters,
    suppressor: AlertSuppressor,
    classifier: ViolationClassifier,
    reconnect: ReconnectionManager,
    config: SessionConfig,
    controls: Arc<Controls>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    detector: SharedDetector,
}

impl CaptureWorker {
    fn run(mut self) -> SessionOutcome {
        let reason = self.capture_loop();
        self.finish(reason)
    }

    fn capture_loop(&mut self) -> TerminationReason {
        loop {
            if self.controls.stop.load(Ordering::SeqCst) {
                return TerminationReason::StoppedByCaller;
            }
            let wanted_fps = self.controls.target_fps.load(Ordering::SeqCst);
            if wanted_fps != self.sampler.target_fps() && self.sampler.set_target_fps(wanted_fps) {
                log::info!("capture: target fps now {}", wanted_fps);
            }

            let frame = match self.source.read() {
                Ok(frame) => frame,
                Err(err) => {
                    if self.source.is_retryable() {
                        self.controls.set_state(PipelineState::Reconnecting);
                    }
                    match self.reconnect.handle_read_failure(
                        self.source.as_mut(),
                        err,
                        &self.bus,
                        &self.controls.stop,
                    ) {
                        ReconnectOutcome::Resumed => {
                            self.controls.set_state(PipelineState::Running);
                            continue;
                        }
                        ReconnectOutcome::EndOfStream => {
                            self.counters.mark_video_end();
                            return TerminationReason::EndOfStream;
                        }
                        ReconnectOutcome::Fatal(_) => return TerminationReason::SourceFailed,
                        ReconnectOutcome::Interrupted => {
                            return TerminationReason::StoppedByCaller
                        }
                    }
                }
            };
            self.reconnect.on_frame(&self.bus);

            let now = self.clock.now();
            self.counters.record_raw();
            self.bus.publish(PipelineEvent::RawFrame(frame.clone()));

            if self.sampler.should_sample(now) {
                self.counters.record_sampled();
                self.bus.publish(PipelineEvent::SampledFrame(frame.clone()));

                if self.controls.detection_enabled.load(Ordering::SeqCst) {
                    if let Err(err) = self.detect_violations(&frame, now) {
                        let error = PipelineError::Detection(err);
                        log::error!("capture: {}", error);
                        self.bus.publish(PipelineEvent::from(&error));
                        return TerminationReason::DetectorFailed;
                    }
                }
            }

            if let Some(sample) = self.counters.roll_window(now, self.sampler.target_fps()) {
                log::debug!(
                    "capture: raw {} fps | sampled {} fps | target {} fps",
                    sample.raw,
                    sample.sampled,
                    sample.target_fps
                );
                self.bus.publish(PipelineEvent::RateWindow(sample));
            }

            if self.counters.elapsed(now) >= self.config.validation_duration {
                return TerminationReason::ValidationComplete;
            }
        }
    }

    fn detect_violations(&mut self, frame: &Frame, now: Duration) -> anyhow::Result<()> {
        let detections = run_detector(&self.detector, frame, self.config.confidence_threshold)?;
        self.bus.publish(PipelineEvent::DetectionOverlay(
            self.classifier.render_detections(frame, &detections),
        ));

        let violations = self.classifier.violations(&detections);
        if violations.is_empty() {
            return Ok(());
        }
        let wall_time = self.clock.wall_time();
        let mut alerted = false;
        for violation in &violations {
            if self.suppressor.admit(&violation.label, now) {
                let alert = format_alert(&violation.label, wall_time);
                log::info!("{}", alert);
                self.bus.publish(PipelineEvent::Alert(alert));
                alerted = true;
            }
        }
        if alerted {
            self.bus.publish(PipelineEvent::ViolationOverlay(
                self.classifier.render_violations(frame, &violations),
            ));
        }
        Ok(())
    }

    fn finish(mut self, reason: TerminationReason) -> SessionOutcome {
        self.controls.set_state(PipelineState::Stopping);
        self.source.release();
        log::info!(
            "PipelineController: released {} ({})",
            self.source.describe(),
            reason
        );

        let summary = self.suppressor.take_final_summary();
        if let Some(summary) = &summary {
            log::info!("{}", summary);
            self.bus.publish(PipelineEvent::Summary(summary.clone()));
        }

        let report = self.counters.finish(
            self.clock.now(),
            self.config.validation_duration,
            self.source.reported_duration(),
            reason,
        );
        for line in report.to_string().lines() {
            log::info!("{}", line);
        }
        self.bus.publish(PipelineEvent::Report(report.clone()));

        self.controls.set_state(match reason {
            TerminationReason::StoppedByCaller => PipelineState::Idle,
            _ => PipelineState::Terminated,
        });
        SessionOutcome {
            reason,
            summary,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{shared, StubBackend};
    use crate::ingest::ScriptedSource;

    fn controller(clock: &ManualClock) -> PipelineController {
        PipelineController::new(shared(StubBackend::new()), Arc::new(clock.clone()))
    }

    #[test]
    fn invalid_config_never_starts() {
        let clock = ManualClock::new();
        let mut pipeline = controller(&clock);
        let source = ScriptedSource::device().endless();
        let probe = source.probe();

        let err = pipeline
            .start(
                Box::new(source),
                SessionConfig {
                    target_fps: 0,
                    ..SessionConfig::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
        assert_eq!(probe.opens(), 0);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.wait().unwrap().is_none());
    }

    #[test]
    fn unopenable_source_is_invalid_configuration() {
        let clock = ManualClock::new();
        let mut pipeline = controller(&clock);
        let err = pipeline
            .start(
                Box::new(ScriptedSource::device().failing_open()),
                SessionConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let bad = [
            SessionConfig {
                validation_duration: Duration::ZERO,
                ..SessionConfig::default()
            },
            SessionConfig {
                confidence_threshold: 1.5,
                ..SessionConfig::default()
            },
            SessionConfig {
                violation_labels: Vec::new(),
                ..SessionConfig::default()
            },
            SessionConfig {
                native_fps: Some(0),
                ..SessionConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_fps_update_keeps_previous_rate() {
        let clock = ManualClock::new();
        let pipeline = controller(&clock);
        pipeline.set_target_fps(10).unwrap();
        assert!(pipeline.set_target_fps(0).is_err());
        assert_eq!(pipeline.target_fps(), 10);
    }

    #[test]
    fn stop_handle_ends_an_endless_session() {
        let clock = ManualClock::new();
        let mut pipeline = controller(&clock);
        let source = ScriptedSource::device()
            .endless()
            .paced(Duration::from_millis(2));
        let probe = source.probe();
        pipeline.start(Box::new(source), SessionConfig::default()).unwrap();
        assert!(matches!(
            pipeline.state(),
            PipelineState::Running | PipelineState::Idle
        ));

        pipeline.stop_handle().stop();
        let outcome = pipeline.wait().unwrap().unwrap();
        assert_eq!(outcome.reason, TerminationReason::StoppedByCaller);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(probe.releases() >= 1);
    }
}
