//! Error types for download tasks.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur while running a download task.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server does not advertise `Accept-Ranges: bytes`.
    ///
    /// Fatal for sharded downloads only; the mono task falls back to a
    /// plain sequential download instead of returning this.
    #[error("server does not accept byte ranges")]
    RangeUnsupported,

    /// The probe could not determine a positive content length.
    #[error("could not determine the remote content length")]
    LengthUnknown,

    /// A recovered task's recorded size differs from a fresh probe.
    ///
    /// The journal and the partial file no longer describe the same remote
    /// resource; delete both and start over.
    #[error("recovered task size {recorded} does not match the probed size {probed}; delete the journal and partial file")]
    RecoveryMismatch { recorded: u64, probed: u64 },

    /// The server answered with an unexpected status code.
    #[error("unexpected status code {0}")]
    Status(u16),

    /// Transport-level request failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body ended before the requested range was complete.
    #[error("response body ended early: got {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    /// Local file I/O failure on the destination or journal.
    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The journal could not be encoded or decoded.
    #[error("journal {}: {reason}", .path.display())]
    Journal { path: PathBuf, reason: String },

    /// The task was stopped by an interrupt before completing.
    #[error("download interrupted")]
    Interrupted,
}

impl FetchError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for conditions the shard state machine may retry: transport
    /// failures, bad status codes, and body read errors. Local I/O and the
    /// precondition failures are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status(_) | Self::Truncated { .. })
    }
}

/// Internal signal produced when a task attempt failed but retry budget
/// remains. Routed back into the worker pool rather than surfaced to the
/// caller.
#[derive(Debug, Clone)]
pub struct RetrySignal {
    /// Shard order, or 0 for the mono task.
    pub order: u32,
    /// Which retry attempt comes next (1-based).
    pub attempt: u32,
    /// Human-readable cause of the failed attempt.
    pub reason: String,
}

impl fmt::Display for RetrySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.order > 0 {
            write!(
                f,
                "shard {} failed ({}), starting retry {}",
                self.order, self.reason, self.attempt
            )
        } else {
            write!(
                f,
                "download failed ({}), starting retry {}",
                self.reason, self.attempt
            )
        }
    }
}
