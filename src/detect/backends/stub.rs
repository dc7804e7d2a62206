use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Model-less backend. Never reports anything, so sessions run the full
/// sampling and instrumentation path without alerts.
#[derive(Default)]
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&mut self, _frame: &Frame, _confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        Ok(Vec::new())
    }
}
