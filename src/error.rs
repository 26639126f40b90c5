use std::io;

use thiserror::Error;

/// Raised when a backtrace cannot be captured.
#[derive(Debug, Error)]
pub enum TraceError {
    /// No frames were left after skipping, e.g. the skip depth exceeds the
    /// stack depth.
    #[error("no stack frames available")]
    NoFrames,
    /// The unwinder reported more frames than the capture buffer holds.
    #[error("unwinder returned too many frames ({count} > {capacity})")]
    TooManyFrames {
        /// Number of frames reported.
        count: usize,
        /// Capacity of the capture buffer.
        capacity: usize,
    },
    /// The all-threads sampler could not be set up.
    #[error("failed to sample thread stacks")]
    Sampler(#[source] io::Error),
}
