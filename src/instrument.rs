//! Session instrumentation.
//!
//! Counts raw and sampled frames for the whole session and over rolling one
//! second windows. The rolling pair is observational only; nothing downstream
//! reads it. At session end the totals become a `ValidationReport`.

use std::fmt;
use std::time::Duration;

pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// A finite source ran out of frames.
    EndOfStream,
    /// The configured validation duration elapsed.
    ValidationComplete,
    StoppedByCaller,
    /// A camera could not be reopened after a read failure.
    SourceFailed,
    DetectorFailed,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::EndOfStream => "video ended",
            TerminationReason::ValidationComplete => "validation time completed",
            TerminationReason::StoppedByCaller => "stopped by caller",
            TerminationReason::SourceFailed => "source failure",
            TerminationReason::DetectorFailed => "detector failure",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame counts for one closed rate window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FpsSample {
    pub raw: u64,
    pub sampled: u64,
    pub target_fps: u32,
}

#[derive(Debug)]
pub struct SessionCounters {
    raw_total: u64,
    sampled_total: u64,
    raw_window: u64,
    sampled_window: u64,
    window_start: Duration,
    validation_start: Duration,
    video_end_reached: bool,
}

impl SessionCounters {
    pub fn new(start: Duration) -> Self {
        Self {
            raw_total: 0,
            sampled_total: 0,
            raw_window: 0,
            sampled_window: 0,
            window_start: start,
            validation_start: start,
            video_end_reached: false,
        }
    }

    pub fn record_raw(&mut self) {
        self.raw_total += 1;
        self.raw_window += 1;
    }

    pub fn record_sampled(&mut self) {
        self.sampled_total += 1;
        self.sampled_window += 1;
    }

    pub fn mark_video_end(&mut self) {
        self.video_end_reached = true;
    }

    pub fn raw_total(&self) -> u64 {
        self.raw_total
    }

    pub fn sampled_total(&self) -> u64 {
        self.sampled_total
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.validation_start)
    }

    /// Close the rate window if a full second has passed, returning its counts.
    pub fn roll_window(&mut self, now: Duration, target_fps: u32) -> Option<FpsSample> {
        if now.saturating_sub(self.window_start) < RATE_WINDOW {
            return None;
        }
        let sample = FpsSample {
            raw: self.raw_window,
            sampled: self.sampled_window,
            target_fps,
        };
        self.raw_window = 0;
        self.sampled_window = 0;
        self.window_start = now;
        Some(sample)
    }

    /// Fraction of raw frames that were not sampled.
    ///
    /// Sessions that ran a finite source to its end report `0.0`.
    pub fn drop_ratio(&self) -> f64 {
        if self.video_end_reached || self.raw_total == 0 {
            return 0.0;
        }
        1.0 - (self.sampled_total as f64 / self.raw_total as f64)
    }

    pub fn finish(
        &self,
        now: Duration,
        configured: Duration,
        source_duration: Option<Duration>,
        reason: TerminationReason,
    ) -> ValidationReport {
        ValidationReport {
            configured_duration: configured,
            actual_duration: self.elapsed(now),
            source_duration,
            raw_frames: self.raw_total,
            sampled_frames: self.sampled_total,
            drop_ratio: self.drop_ratio(),
            reason,
        }
    }
}

/// End-of-session sampling validation report.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationReport {
    pub configured_duration: Duration,
    pub actual_duration: Duration,
    /// Duration reported by a file source, when known.
    pub source_duration: Option<Duration>,
    pub raw_frames: u64,
    pub sampled_frames: u64,
    pub drop_ratio: f64,
    pub reason: TerminationReason,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== SAMPLING VALIDATION REPORT =====")?;
        writeln!(
            f,
            "Configured duration : {:.1} sec",
            self.configured_duration.as_secs_f64()
        )?;
        writeln!(
            f,
            "Actual duration     : {:.1} sec",
            self.actual_duration.as_secs_f64()
        )?;
        if let Some(source) = self.source_duration.filter(|d| !d.is_zero()) {
            writeln!(f, "Video file duration : {:.1} sec", source.as_secs_f64())?;
        }
        writeln!(f, "Total raw frames    : {}", self.raw_frames)?;
        writeln!(f, "Total sampled frames: {}", self.sampled_frames)?;
        writeln!(f, "Frame drop ratio    : {:.2}", self.drop_ratio)?;
        writeln!(f, "Termination reason  : {}", self.reason)?;
        write!(f, "=====================================")
    }
}
