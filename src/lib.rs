//! PPE Watch
//!
//! This crate implements the media sampling and violation-detection pipeline
//! behind a PPE (personal protective equipment) compliance monitor.
//!
//! # Architecture
//!
//! A session reads a camera or a recorded video on a dedicated capture worker:
//!
//! 1. **Sampling**: raw frames are decimated to a target rate by a drift-corrected
//!    deadline clock (or every Nth frame in frame-step mode).
//! 2. **Detection**: sampled frames go through an opaque `DetectorBackend`.
//! 3. **Classification**: detections are filtered to the configured violation labels
//!    and drawn onto private overlay copies.
//! 4. **Suppression**: repeated alerts for a label inside the window are dropped;
//!    labels that alerted are summarised once at session end.
//! 5. **Recovery**: failed camera reads release, back off and reopen; failed file
//!    reads end the session as end-of-stream.
//! 6. **Instrumentation**: raw/sampled counts, 1 s rate windows and the final
//!    validation report.
//!
//! Everything leaves the worker as owned `PipelineEvent`s on an `EventBus`.
//!
//! # Module Structure
//!
//! - `pipeline`: `PipelineController`, session config and the capture worker
//! - `ingest`: frame sources (V4L2 devices, local files, synthetic, scripted)
//! - `sampling`, `suppress`, `violation`, `reconnect`, `instrument`: loop stages
//! - `detect`: detector boundary and the stub/scripted backends
//! - `events`: typed event fan-out
//! - `advisory`: guideline lookups for the violations a session produced
//! - `config`, `ui`: binary-facing configuration and terminal output

pub mod advisory;
pub mod annotate;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod instrument;
pub mod pipeline;
pub mod reconnect;
pub mod sampling;
pub mod suppress;
pub mod ui;
pub mod violation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detect::{BoundingBox, Detection, DetectorBackend, SharedDetector};
pub use error::PipelineError;
pub use events::{EventBus, EventKind, PipelineEvent, Severity};
pub use frame::{Frame, PixelLayout};
pub use ingest::{build_source, FrameSource, MediaSource, ReadError, SourceKind};
pub use instrument::{FpsSample, TerminationReason, ValidationReport};
pub use pipeline::{PipelineController, PipelineState, SessionConfig, SessionOutcome, StopHandle};
pub use reconnect::ReconnectPolicy;
pub use sampling::{SamplingClock, SamplingMode};
pub use suppress::AlertSuppressor;
pub use violation::ViolationClassifier;
