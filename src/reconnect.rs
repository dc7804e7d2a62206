//! Camera reconnection.
//!
//! A failed read on a retryable source (a camera) reports a transient error,
//! releases the handle, waits out the backoff and reopens. Reopen failure is
//! fatal for the session. A failed read on a non-retryable source (a file) is
//! end-of-stream and is never retried.
//!
//! One outage may span several failed reads. The recovery event is published
//! once, when the first frame after the outage arrives, and carries the number
//! of failed reads it took.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::ingest::{FrameSource, ReadError};

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Granularity at which a backoff wait checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Duration,
    /// Ceiling on consecutive failed reads in one outage. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RECONNECT_BACKOFF,
            max_attempts: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The source was reopened; keep reading.
    Resumed,
    /// A finite source ran out.
    EndOfStream,
    /// The source could not be recovered. The fatal event has been published.
    Fatal(String),
    /// Stop was requested during the backoff.
    Interrupted,
}

#[derive(Debug)]
pub struct ReconnectionManager {
    policy: ReconnectPolicy,
    outage_failures: u32,
    reconnects: u64,
}

impl ReconnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            outage_failures: 0,
            reconnects: 0,
        }
    }

    /// True while failed reads have not yet been followed by a good frame.
    pub fn in_outage(&self) -> bool {
        self.outage_failures > 0
    }

    /// Completed recoveries this session.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn handle_read_failure(
        &mut self,
        source: &mut dyn FrameSource,
        error: ReadError,
        bus: &EventBus,
        stop: &AtomicBool,
    ) -> ReconnectOutcome {
        if !source.is_retryable() {
            match &error {
                ReadError::EndOfStream => log::info!("{}: end of stream", source.describe()),
                ReadError::Failed(reason) => log::info!(
                    "{}: read failed ({}), treating as end of stream",
                    source.describe(),
                    reason
                ),
            }
            return ReconnectOutcome::EndOfStream;
        }

        self.outage_failures += 1;
        let transient =
            PipelineError::TransientSource(format!("{} read failed: {}", source.describe(), error));
        log::warn!("{} (attempt {})", transient, self.outage_failures);
        bus.publish(PipelineEvent::from(&transient));

        if let Some(max) = self.policy.max_attempts {
            if self.outage_failures > max {
                return self.fatal(
                    bus,
                    format!(
                        "{} did not recover after {} reconnect attempts",
                        source.describe(),
                        max
                    ),
                );
            }
        }

        source.release();
        if !wait_for_backoff(self.policy.backoff, stop) {
            log::info!("{}: reconnect interrupted by stop", source.describe());
            return ReconnectOutcome::Interrupted;
        }

        match source.reopen() {
            Ok(()) => {
                log::info!("{}: reopened", source.describe());
                ReconnectOutcome::Resumed
            }
            Err(err) => self.fatal(
                bus,
                format!("failed to reopen {}: {:#}", source.describe(), err),
            ),
        }
    }

    /// Call for every frame read; publishes the recovery event after an outage.
    pub fn on_frame(&mut self, bus: &EventBus) {
        if self.outage_failures == 0 {
            return;
        }
        let attempts = self.outage_failures;
        self.outage_failures = 0;
        self.reconnects += 1;
        let message = format!("camera reconnected after {} failed read(s)", attempts);
        log::info!("{}", message);
        bus.publish(PipelineEvent::Reconnected { attempts, message });
    }

    fn fatal(&mut self, bus: &EventBus, reason: String) -> ReconnectOutcome {
        let error = PipelineError::FatalSource(reason);
        log::error!("{}", error);
        bus.publish(PipelineEvent::from(&error));
        ReconnectOutcome::Fatal(error.to_string())
    }
}

/// Sleep for `backoff`, returning false early if `stop` is raised.
fn wait_for_backoff(backoff: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + backoff;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
