//! Typed event emission boundary.
//!
//! The capture worker publishes; consumers subscribe per event kind and receive
//! owned events over unbounded channels. Publishing never blocks on a consumer.
//! A subscriber that drops its receiver is pruned on the next publish.
//!
//! Within one kind, events arrive in capture order. A receiver created with
//! `subscribe_many` sees its kinds interleaved in exact emission order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::instrument::{FpsSample, ValidationReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    RawFrame,
    SampledFrame,
    DetectionOverlay,
    ViolationOverlay,
    Alert,
    /// Source health: transient errors, reconnects, fatal errors.
    Error,
    Summary,
    Report,
    RateWindow,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::RawFrame,
        EventKind::SampledFrame,
        EventKind::DetectionOverlay,
        EventKind::ViolationOverlay,
        EventKind::Alert,
        EventKind::Error,
        EventKind::Summary,
        EventKind::Report,
        EventKind::RateWindow,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Fatal,
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    RawFrame(Frame),
    SampledFrame(Frame),
    DetectionOverlay(Frame),
    ViolationOverlay(Frame),
    /// `[HH:MM:SS] VIOLATION: <label>`
    Alert(String),
    /// Source or detector failure.
    Error {
        severity: Severity,
        message: String,
    },
    /// Frames are flowing again after an outage of `attempts` failed reads.
    Reconnected {
        attempts: u32,
        message: String,
    },
    /// Unique violations for the session, emitted at most once.
    Summary(String),
    Report(ValidationReport),
    RateWindow(FpsSample),
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::RawFrame(_) => EventKind::RawFrame,
            PipelineEvent::SampledFrame(_) => EventKind::SampledFrame,
            PipelineEvent::DetectionOverlay(_) => EventKind::DetectionOverlay,
            PipelineEvent::ViolationOverlay(_) => EventKind::ViolationOverlay,
            PipelineEvent::Alert(_) => EventKind::Alert,
            PipelineEvent::Error { .. } | PipelineEvent::Reconnected { .. } => {
                EventKind::Error
            }
            PipelineEvent::Summary(_) => EventKind::Summary,
            PipelineEvent::Report(_) => EventKind::Report,
            PipelineEvent::RateWindow(_) => EventKind::RateWindow,
        }
    }

    /// Human-readable text for text-carrying events.
    pub fn text(&self) -> Option<&str> {
        match self {
            PipelineEvent::Alert(text) | PipelineEvent::Summary(text) => Some(text.as_str()),
            PipelineEvent::Error { message, .. }
            | PipelineEvent::Reconnected { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<&PipelineError> for PipelineEvent {
    fn from(err: &PipelineError) -> Self {
        PipelineEvent::Error {
            severity: err.severity(),
            message: err.to_string(),
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind) -> Receiver<PipelineEvent> {
        self.subscribe_many(&[kind])
    }

    /// One receiver for several kinds, preserving cross-kind emission order.
    pub fn subscribe_many(&self, kinds: &[EventKind]) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for kind in kinds {
            subscribers.entry(*kind).or_default().push(tx.clone());
        }
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        let kind = event.kind();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(senders) = subscribers.get_mut(&kind) else {
            return;
        };
        let before = senders.len();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        if senders.len() < before {
            log::debug!(
                "EventBus: pruned {} closed {:?} subscriber(s)",
                before - senders.len(),
                kind
            );
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
