//! Support for passing a [`Trace`](crate::Trace) to logging libraries.
//!
//! Which integrations are available depends on the features that were
//! compiled in.

#[cfg(feature = "with_log")]
mod log;

#[cfg(feature = "with_slog")]
mod slog;
