use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The detection model is an opaque capability: given a frame it returns
/// labelled boxes. Backends run synchronously on the capture worker and may
/// dominate per-frame latency.
///
/// Implementations must treat the frame as read-only. Errors are reported, never
/// swallowed; the pipeline ends the session on a failed call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection, returning boxes whose confidence is at least `confidence_threshold`.
    fn predict(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Detector shared between the controller and successive capture workers.
///
/// Wrapped in `Mutex` because `DetectorBackend::predict` takes `&mut self`.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

pub fn shared<B: DetectorBackend + 'static>(backend: B) -> SharedDetector {
    Arc::new(Mutex::new(backend))
}

/// Run the shared detector once and drop anything under the threshold.
///
/// The threshold is re-applied here so a backend that ignores it cannot leak
/// low-confidence boxes into the violation path.
pub fn run_detector(
    detector: &SharedDetector,
    frame: &Frame,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    let mut guard = detector
        .lock()
        .map_err(|_| anyhow!("detector lock poisoned"))?;
    let mut detections = guard.predict(frame, confidence_threshold)?;
    detections.retain(|d| d.confidence >= confidence_threshold);
    Ok(detections)
}
