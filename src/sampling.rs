//! Frame decimation.
//!
//! `SamplingClock` gates raw frames down to a target rate using wall-clock
//! deadlines. The deadline advances by whole intervals from where it was, never
//! from "now", so fluctuating frame latency does not accumulate into drift. After
//! a stall longer than one interval the missed deadlines are skipped instead of
//! being replayed as a burst of back-to-back samples.
//!
//! `FrameStepSampler` is the count-based alternative: every Nth raw frame, with
//! N derived from the source's native rate.

use serde::Deserialize;
use std::time::Duration;

use crate::error::PipelineError;

/// Default native rate assumed for frame-step sampling when the source does not report one.
pub const DEFAULT_NATIVE_FPS: u32 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    #[default]
    Time,
    #[serde(alias = "frame")]
    FrameStep,
}

impl std::str::FromStr for SamplingMode {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "time" => Ok(Self::Time),
            "frame" | "frame_step" | "frame-step" => Ok(Self::FrameStep),
            other => Err(PipelineError::invalid(format!(
                "unknown sampling mode '{}' (expected time or frame)",
                other
            ))),
        }
    }
}

fn interval_for(target_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / target_fps as f64)
}

/// Drift-corrected, time-based sampling gate.
#[derive(Clone, Debug)]
pub struct SamplingClock {
    target_fps: u32,
    interval: Duration,
    next_deadline: Duration,
}

impl SamplingClock {
    /// Start a clock whose first deadline is `start`.
    pub fn new(target_fps: u32, start: Duration) -> Result<Self, PipelineError> {
        if target_fps == 0 {
            return Err(PipelineError::invalid("target fps must be >= 1"));
        }
        Ok(Self {
            target_fps,
            interval: interval_for(target_fps),
            next_deadline: start,
        })
    }

    /// Decide whether the frame observed at `now` is sampled.
    pub fn should_sample(&mut self, now: Duration) -> bool {
        if now < self.next_deadline {
            return false;
        }
        let behind = now - self.next_deadline;
        let missed = (behind.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        // `missed == 0` is the common case: the deadline moves by exactly one interval.
        self.next_deadline += self.interval * missed.saturating_add(1);
        true
    }

    /// Change the target rate. Zero is ignored and the previous rate kept.
    ///
    /// The pending deadline is left where it is; the new interval applies from it.
    pub fn set_target_fps(&mut self, target_fps: u32) -> bool {
        if target_fps == 0 {
            log::warn!(
                "SamplingClock: rejected target fps 0, keeping {}",
                self.target_fps
            );
            return false;
        }
        self.target_fps = target_fps;
        self.interval = interval_for(target_fps);
        true
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Duration {
        self.next_deadline
    }
}

/// Count-based sampling: keeps one raw frame out of every `step`.
#[derive(Clone, Debug)]
pub struct FrameStepSampler {
    native_fps: u32,
    target_fps: u32,
    step: u64,
    seen: u64,
}

impl FrameStepSampler {
    pub fn new(target_fps: u32, native_fps: u32) -> Result<Self, PipelineError> {
        if target_fps == 0 {
            return Err(PipelineError::invalid("target fps must be >= 1"));
        }
        let native_fps = if native_fps == 0 {
            DEFAULT_NATIVE_FPS
        } else {
            native_fps
        };
        Ok(Self {
            native_fps,
            target_fps,
            step: step_for(native_fps, target_fps),
            seen: 0,
        })
    }

    pub fn should_sample(&mut self) -> bool {
        self.seen += 1;
        self.seen % self.step == 0
    }

    pub fn set_target_fps(&mut self, target_fps: u32) -> bool {
        if target_fps == 0 {
            return false;
        }
        self.target_fps = target_fps;
        self.step = step_for(self.native_fps, target_fps);
        true
    }

    pub fn step(&self) -> u64 {
        self.step
    }
}

fn step_for(native_fps: u32, target_fps: u32) -> u64 {
    u64::from((native_fps / target_fps).max(1))
}

/// Sampling strategy selected for a session.
#[derive(Clone, Debug)]
pub enum Sampler {
    Time(SamplingClock),
    FrameStep(FrameStepSampler),
}

impl Sampler {
    pub fn new(
        mode: SamplingMode,
        target_fps: u32,
        native_fps: u32,
        start: Duration,
    ) -> Result<Self, PipelineError> {
        match mode {
            SamplingMode::Time => Ok(Self::Time(SamplingClock::new(target_fps, start)?)),
            SamplingMode::FrameStep => Ok(Self::FrameStep(FrameStepSampler::new(
                target_fps, native_fps,
            )?)),
        }
    }

    pub fn should_sample(&mut self, now: Duration) -> bool {
        match self {
            Self::Time(clock) => clock.should_sample(now),
            Self::FrameStep(sampler) => sampler.should_sample(),
        }
    }

    pub fn set_target_fps(&mut self, target_fps: u32) -> bool {
        match self {
            Self::Time(clock) => clock.set_target_fps(target_fps),
            Self::FrameStep(sampler) => sampler.set_target_fps(target_fps),
        }
    }

    pub fn target_fps(&self) -> u32 {
        match self {
            Self::Time(clock) => clock.target_fps(),
            Self::FrameStep(sampler) => sampler.target_fps,
        }
    }
}
