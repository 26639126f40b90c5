//! Stack backtraces as loggable values.
//!
//! [`backtrace`] captures the calling thread's stack, or the stacks of every
//! thread of the process, and returns a [`Trace`]. A trace prints as plain
//! text and serializes as a list of frames, so it can be passed as a value to
//! structured logging calls or formatted with `{}`.
//!
//! Current-thread traces are rendered one block per frame, innermost first:
//!
//! ```text
//! my_app::handler():
//! 	/src/my_app/src/handler.rs:42
//! my_app::main():
//! 	/src/my_app/src/main.rs:7
//! ```
//!
//! # Examples
//!
//! ```
//! use dbgtrace::TraceConfig;
//!
//! let trace = dbgtrace::backtrace(TraceConfig::new().frame_limit(5)).unwrap();
//! println!("stack:\n{}", trace);
//!
//! let everything = dbgtrace::backtrace(TraceConfig::new().all(true)).unwrap();
//! assert!(everything.as_str().starts_with("thread "));
//! ```
//!
//! # Features
//!
//! * `with_log` (default): `Trace` implements `log::kv::ToValue`.
//! * `with_slog`: `Trace` implements `slog::Value`.

#![warn(missing_docs)]

mod capture;
mod config;
mod error;
mod integrations;
mod threads;
mod trace;
mod utils;

pub use crate::capture::MAX_FRAMES;
pub use crate::config::TraceConfig;
pub use crate::error::TraceError;
pub use crate::trace::{Frame, ThreadStack, Trace};

/// Captures a backtrace as configured.
///
/// Without [`TraceConfig::all`] the first frame is the caller of this
/// function. `None` is returned when no frames are left after skipping, or
/// when the unwinder returned more than [`MAX_FRAMES`] frames; the latter is
/// reported through the `log` facade. Use [`try_backtrace`] to tell the cases
/// apart.
///
/// With [`TraceConfig::all`] the result is the native dump of every thread,
/// see [`stacks`].
#[inline(never)]
pub fn backtrace(config: TraceConfig) -> Option<Trace> {
    let entry = backtrace as *const () as usize;
    if config.all {
        return Some(threads::dump(true, entry));
    }
    match capture::capture(&config, entry) {
        Ok(trace) => Some(trace),
        Err(err @ TraceError::TooManyFrames { .. }) => {
            log::warn!("{}", err);
            None
        }
        Err(_) => None,
    }
}

/// Like [`backtrace`] but reports why no trace was produced.
#[inline(never)]
pub fn try_backtrace(config: TraceConfig) -> Result<Trace, TraceError> {
    let entry = try_backtrace as *const () as usize;
    if config.all {
        return Ok(threads::dump(true, entry));
    }
    capture::capture(&config, entry)
}

/// Dumps the stack of the calling thread, or of every thread when `all` is
/// set.
///
/// Each thread starts with a header line of the form
/// `thread <id> (<name>) [<state>]:` followed by its frames; threads are
/// separated by an empty line and the calling thread comes first. The dump
/// is size bounded and may be cut off for processes with many threads.
#[inline(never)]
pub fn stacks(all: bool) -> String {
    threads::dump(all, stacks as *const () as usize).into_string()
}
