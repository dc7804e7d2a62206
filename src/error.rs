use thiserror::Error;

use crate::events::Severity;

/// Errors surfaced through the pipeline control surface.
///
/// End-of-stream is absent: a finite source running dry is a
/// normal termination reason, not a failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected synchronously by `start()`; the session never runs.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A retryable camera read failure. Reported as an event, not returned.
    #[error("transient source error: {0}")]
    TransientSource(String),

    /// Reopening a source after a transient failure did not succeed.
    #[error("fatal source error: {0}")]
    FatalSource(String),

    /// The detector failed on a sampled frame. Never masked.
    #[error("detection failed: {0}")]
    Detection(#[source] anyhow::Error),

    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("capture worker panicked")]
    WorkerPanicked,
}

impl PipelineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// True for errors that end a session rather than being reported in-band.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TransientSource(_))
    }

    /// Severity of the `Error` event this error is reported as.
    pub fn severity(&self) -> Severity {
        if self.is_fatal() {
            Severity::Fatal
        } else {
            Severity::Transient
        }
    }
}
