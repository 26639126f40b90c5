//! Lets a `Trace` be attached to `log` records as a key-value pair.
//!
//! **Feature:** `with_log` (enabled by default)
//!
//! ```
//! let trace = dbgtrace::backtrace(Default::default());
//! if let Some(ref trace) = trace {
//!     log::error!(trace = trace; "unexpected state");
//! }
//! ```
use ::log::kv::{ToValue, Value};

use crate::Trace;

impl ToValue for Trace {
    fn to_value(&self) -> Value<'_> {
        Value::from_display(self)
    }
}
