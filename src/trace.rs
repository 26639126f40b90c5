use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single resolved stack frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// The function name without the compiler hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// The source file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// The line in `file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}():\n\t{}:{}",
            self.function.as_deref().unwrap_or("<unknown>"),
            self.file.as_deref().unwrap_or("<unknown>"),
            self.line.unwrap_or(0)
        )
    }
}

/// The stack of one thread in an all-threads dump.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStack {
    /// OS thread id.
    pub id: u64,
    /// Thread name, if the thread has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scheduler state at the time of the dump, e.g. `running` or `sleeping`.
    pub state: String,
    /// Frames, innermost first.
    pub frames: Vec<Frame>,
    /// Set when the stack was deeper than the capture capacity.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub elided: bool,
}

impl fmt::Display for ThreadStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.id)?;
        if let Some(ref name) = self.name {
            write!(f, " ({})", name)?;
        }
        writeln!(f, " [{}]:", self.state)?;
        for frame in &self.frames {
            fmt::Display::fmt(frame, f)?;
        }
        if self.elided {
            writeln!(f, "...additional frames elided...")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Stacks {
    Current(Vec<Frame>),
    All(Vec<ThreadStack>),
}

/// A captured backtrace.
///
/// The value is immutable. It prints as the rendered text and serializes as
/// either `{"frames": [...]}` or `{"threads": [...]}`, which makes it usable
/// as a value in structured logging calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
    text: String,
    stacks: Stacks,
}

impl Trace {
    pub(crate) fn from_frames(frames: Vec<Frame>) -> Trace {
        let mut text = String::new();
        for frame in &frames {
            text.push_str(&frame.to_string());
        }
        Trace {
            text,
            stacks: Stacks::Current(frames),
        }
    }

    pub(crate) fn from_threads(text: String, threads: Vec<ThreadStack>) -> Trace {
        Trace {
            text,
            stacks: Stacks::All(threads),
        }
    }

    /// Returns the rendered backtrace.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Converts the trace into its rendered text.
    pub fn into_string(self) -> String {
        self.text
    }

    /// Returns `true` if the rendered text is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The resolved frames of a current-thread trace, innermost first.
    ///
    /// Empty for all-threads dumps.
    pub fn frames(&self) -> &[Frame] {
        match self.stacks {
            Stacks::Current(ref frames) => frames,
            Stacks::All(_) => &[],
        }
    }

    /// The per-thread stacks of an all-threads dump.
    ///
    /// Unlike the rendered text these are never truncated. Empty for
    /// current-thread traces.
    pub fn threads(&self) -> &[ThreadStack] {
        match self.stacks {
            Stacks::Current(_) => &[],
            Stacks::All(ref threads) => threads,
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Trace {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl From<Trace> for String {
    fn from(trace: Trace) -> String {
        trace.text
    }
}

impl Serialize for Trace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self.stacks {
            Stacks::Current(ref frames) => map.serialize_entry("frames", frames)?,
            Stacks::All(ref threads) => map.serialize_entry("threads", threads)?,
        }
        map.end()
    }
}
