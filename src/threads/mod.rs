//! Native stack dumps of the calling thread or of every thread.
//!
//! The dump is rendered into a fixed-size buffer. When the text does not fit
//! the buffer is doubled and the dump rendered again, a bounded number of
//! times; after the last attempt whatever fit is returned.
use std::fmt::Write;
use std::thread;

use crate::capture::{self, MAX_FRAMES};
use crate::trace::{ThreadStack, Trace};
use crate::utils::BoundedWriter;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use self::linux as imp;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
use self::fallback as imp;

/// Initial buffer size for a dump of the calling thread.
const SINGLE_BUFFER_SIZE: usize = 10_000;
/// Initial buffer size for a dump of all threads.
const ALL_BUFFER_SIZE: usize = 100_000;
/// Number of render attempts, each with twice the previous buffer size.
const GROWTH_ATTEMPTS: usize = 5;

/// Dumps the calling thread, or every thread of the process when `all` is
/// set. The calling thread always comes first.
pub fn dump(all: bool, entry: usize) -> Trace {
    let current = current_thread(entry);
    let (threads, initial) = if all {
        (imp::snapshot(current), ALL_BUFFER_SIZE)
    } else {
        (vec![current], SINGLE_BUFFER_SIZE)
    };
    let text = render(&threads, initial);
    Trace::from_threads(text, threads)
}

fn current_thread(entry: usize) -> ThreadStack {
    let mut ips = capture::callers(entry, 0, MAX_FRAMES + 1);
    let elided = ips.len() > MAX_FRAMES;
    ips.truncate(MAX_FRAMES);
    ThreadStack {
        id: imp::current_id(),
        name: thread::current().name().map(str::to_owned),
        state: "running".into(),
        frames: capture::resolve(&ips),
        elided,
    }
}

fn render(threads: &[ThreadStack], initial: usize) -> String {
    let mut size = initial;
    let mut buf = Vec::new();
    for _ in 0..GROWTH_ATTEMPTS {
        buf = vec![0; size];
        let written = render_into(threads, &mut buf);
        buf.truncate(written);
        if written < size {
            break;
        }
        size *= 2;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Renders into `buf` and returns the number of bytes written. A result
/// equal to the buffer length means the dump may not have fit.
fn render_into(threads: &[ThreadStack], buf: &mut [u8]) -> usize {
    let mut writer = BoundedWriter::new(buf);
    for (idx, stack) in threads.iter().enumerate() {
        if idx > 0 && writer.write_char('\n').is_err() {
            break;
        }
        if write!(writer, "{}", stack).is_err() {
            break;
        }
    }
    writer.written()
}
