//! Time sources for the capture loop.
//!
//! The loop never calls `Instant::now()` directly; it asks a `Clock`. Production
//! runs use `SystemClock`, tests drive a `ManualClock` so sampling, suppression and
//! validation-timeout behaviour can be checked without sleeping.

use chrono::{Local, NaiveTime};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Local wall-clock time used to stamp alert text.
    fn wall_time(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Monotonic clock backed by `Instant`.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock. Clones share the same time.
///
/// Wall time starts at midnight and moves with `now()`.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn wall_time(&self) -> NaiveTime {
        let secs = self.now().as_secs() % 86_400;
        NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0).unwrap_or_default()
    }
}
