//! Lets a `Trace` be used as a `slog` value.
//!
//! **Feature:** `with_slog`
//!
//! ```
//! let root = slog::Logger::root(slog::Discard, slog::o!());
//! let trace = dbgtrace::backtrace(Default::default()).unwrap();
//! slog::error!(root, "unexpected state"; "trace" => &trace);
//! ```
use ::slog::{Key, Record, Serializer, Value};

use crate::Trace;

impl Value for Trace {
    fn serialize(&self, _record: &Record<'_>, key: Key, serializer: &mut dyn Serializer) -> ::slog::Result {
        serializer.emit_str(key, self.as_str())
    }
}
