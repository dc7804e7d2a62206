//! Deterministic frame source driven by a script of steps.
//!
//! Used by tests and demos to reproduce camera outages, end-of-file and exact
//! frame timing without hardware. When given a `ManualClock`, each delivered
//! frame advances it by a fixed tick, so time-based sampling is reproducible.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{FrameSource, ReadError, SourceKind};
use crate::clock::ManualClock;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    Frame,
    Fail,
}

/// Shared view of what the pipeline did to a `ScriptedSource`.
#[derive(Clone, Debug, Default)]
pub struct ScriptProbe {
    opens: Arc<AtomicU32>,
    releases: Arc<AtomicU32>,
    reads: Arc<AtomicU64>,
}

impl ScriptProbe {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

pub struct ScriptedSource {
    kind: SourceKind,
    steps: VecDeque<ScriptStep>,
    /// Keep producing frames once the script runs out.
    endless: bool,
    fail_open: bool,
    reopen_failures: u32,
    width: u32,
    height: u32,
    frame_count: u64,
    opened: bool,
    clock: Option<(ManualClock, Duration)>,
    delay: Duration,
    reported_duration: Option<Duration>,
    native_fps: Option<u32>,
    probe: ScriptProbe,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            steps: VecDeque::new(),
            endless: false,
            fail_open: false,
            reopen_failures: 0,
            width: 64,
            height: 48,
            frame_count: 0,
            opened: false,
            clock: None,
            delay: Duration::ZERO,
            reported_duration: None,
            native_fps: None,
            probe: ScriptProbe::default(),
        }
    }

    pub fn device() -> Self {
        Self::new(SourceKind::Device)
    }

    pub fn file() -> Self {
        Self::new(SourceKind::File)
    }

    pub fn frames(mut self, count: usize) -> Self {
        self.steps.extend(std::iter::repeat(ScriptStep::Frame).take(count));
        self
    }

    pub fn failures(mut self, count: usize) -> Self {
        self.steps.extend(std::iter::repeat(ScriptStep::Fail).take(count));
        self
    }

    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// The next `count` reopen attempts fail.
    pub fn failing_reopens(mut self, count: u32) -> Self {
        self.reopen_failures = count;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Advance `clock` by `tick` for every delivered frame.
    pub fn advancing(mut self, clock: ManualClock, tick: Duration) -> Self {
        self.clock = Some((clock, tick));
        self
    }

    /// Block for `delay` in every read, like a camera at its native rate.
    pub fn paced(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reporting_duration(mut self, duration: Duration) -> Self {
        self.reported_duration = Some(duration);
        self
    }

    pub fn native_rate(mut self, fps: u32) -> Self {
        self.native_fps = Some(fps);
        self
    }

    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }

    fn next_frame(&mut self) -> Frame {
        self.frame_count += 1;
        if let Some((clock, tick)) = &self.clock {
            clock.advance(*tick);
        }
        let shade = (self.frame_count % 256) as u8;
        Frame::filled(self.width, self.height, [shade, shade, shade], self.frame_count)
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        match self.kind {
            SourceKind::Device => "scripted camera".to_string(),
            SourceKind::File => "scripted video file".to_string(),
        }
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn open(&mut self) -> Result<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(anyhow!("scripted source refuses to open"));
        }
        self.opened = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, ReadError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if !self.opened {
            return Err(ReadError::Failed("scripted source is not open".into()));
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Frame) => Ok(self.next_frame()),
            Some(ScriptStep::Fail) => Err(ReadError::Failed("scripted read failure".into())),
            None if self.endless => Ok(self.next_frame()),
            None => match self.kind {
                SourceKind::File => Err(ReadError::EndOfStream),
                SourceKind::Device => Err(ReadError::Failed("script exhausted".into())),
            },
        }
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
        self.opened = false;
    }

    fn reopen(&mut self) -> Result<()> {
        self.release();
        if self.reopen_failures > 0 {
            self.reopen_failures -= 1;
            return Err(anyhow!("scripted source refuses to reopen"));
        }
        self.open()
    }

    fn reported_duration(&self) -> Option<Duration> {
        self.reported_duration
    }

    fn native_fps(&self) -> Option<u32> {
        self.native_fps
    }
}
