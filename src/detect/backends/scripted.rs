use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One scripted answer to a `predict` call.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Replays a fixed script of responses.
///
/// When `cycle` is set the script repeats forever; otherwise an exhausted script
/// answers with no detections.
pub struct ScriptedBackend {
    script: VecDeque<ScriptedResponse>,
    played: VecDeque<ScriptedResponse>,
    cycle: bool,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: script.into(),
            played: VecDeque::new(),
            cycle: false,
            calls: 0,
        }
    }

    /// Same response on every call.
    pub fn constant(detections: Vec<Detection>) -> Self {
        Self::new(vec![ScriptedResponse::Detections(detections)]).cycling()
    }

    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn next_response(&mut self) -> Option<ScriptedResponse> {
        if self.script.is_empty() && self.cycle {
            std::mem::swap(&mut self.script, &mut self.played);
        }
        let response = self.script.pop_front()?;
        if self.cycle {
            self.played.push_back(response.clone());
        }
        Some(response)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn predict(&mut self, _frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.next_response() {
            Some(ScriptedResponse::Detections(detections)) => Ok(detections
                .into_iter()
                .filter(|d| d.confidence >= confidence_threshold)
                .collect()),
            Some(ScriptedResponse::Fail(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}
