use serde::Deserialize;

/// Configuration for [`backtrace`](crate::backtrace).
///
/// Setters can be chained; a later call for the same field replaces the
/// earlier value.
///
/// # Examples
///
/// ```
/// let config = dbgtrace::TraceConfig::new().skip(1).frame_limit(3);
/// assert_eq!(config.skip, 1);
/// assert_eq!(config.frame_limit, 3);
/// assert!(!config.all);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Number of caller frames to omit, counted from the caller of the
    /// capture function. Defaults to `0`.
    pub skip: usize,
    /// Maximum number of frames to report. `0` means unlimited and is the
    /// default.
    pub frame_limit: usize,
    /// Dump the stacks of all threads of the process instead of the calling
    /// thread. `skip` and `frame_limit` are ignored when this is set.
    /// Defaults to `false`.
    pub all: bool,
}

impl TraceConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the skip depth.
    pub fn skip(mut self, depth: usize) -> Self {
        self.skip = depth;
        self
    }

    /// Sets the frame limit; `0` removes a limit set earlier.
    ///
    /// Unlike option lists that ignore a zero size, a later
    /// `frame_limit(0)` always wins and makes the trace unlimited again.
    pub fn frame_limit(mut self, frames: usize) -> Self {
        self.frame_limit = frames;
        self
    }

    /// Enables or disables the all-threads dump.
    pub fn all(mut self, all: bool) -> Self {
        self.all = all;
        self
    }
}
