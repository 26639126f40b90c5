use std::ffi::c_void;

use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::trace::{Frame, Trace};
use crate::utils::strip_symbol;

/// Maximum number of frames a single stack capture holds.
pub const MAX_FRAMES: usize = 100;

// Upper bound on unwinder-internal frames walked while looking for the entry
// point.
const UNWINDER_FRAMES: usize = 32;

/// Captures the calling thread's stack for `config`.
///
/// `entry` is the address of the public function the caller went through.
/// Its frame and everything called from it are not part of the result.
pub fn capture(config: &TraceConfig, entry: usize) -> Result<Trace, TraceError> {
    let ips = callers(entry, config.skip, MAX_FRAMES);
    let ips = trim_callers(ips, config.frame_limit)?;
    Ok(Trace::from_frames(resolve(&ips)))
}

/// Collects at most `capacity` return addresses of the calling thread,
/// starting `skip` frames above the frame of the function at `entry`.
///
/// If the entry frame cannot be identified nothing is dropped besides `skip`.
pub fn callers(entry: usize, skip: usize, capacity: usize) -> Vec<usize> {
    let mut ips = Vec::new();
    let mut start = None;

    backtrace::trace(|frame| {
        if start.is_none() && frame.symbol_address() as usize == entry {
            start = Some(ips.len() + 1);
        }
        ips.push(frame.ip() as usize);
        ips.len()
            < start
                .unwrap_or(UNWINDER_FRAMES)
                .saturating_add(skip)
                .saturating_add(capacity)
    });

    let start = start.unwrap_or(0).saturating_add(skip).min(ips.len());
    ips.drain(..start);
    ips.truncate(capacity);
    ips
}

/// Applies the frame limit to freshly collected addresses.
///
/// The outermost address is dropped since it belongs to the thread
/// bootstrap code.
fn trim_callers(mut ips: Vec<usize>, frame_limit: usize) -> Result<Vec<usize>, TraceError> {
    let count = ips.len();
    if count == 0 {
        return Err(TraceError::NoFrames);
    }
    if count > MAX_FRAMES {
        return Err(TraceError::TooManyFrames {
            count,
            capacity: MAX_FRAMES,
        });
    }

    ips.pop();
    if frame_limit > 0 && frame_limit < count {
        ips.truncate(frame_limit);
    }
    Ok(ips)
}

/// Resolves addresses to frames. Inlined calls expand to one frame each,
/// innermost first.
pub fn resolve(ips: &[usize]) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(ips.len());
    for &ip in ips {
        let resolved = frames.len();
        backtrace::resolve(ip as *mut c_void, |symbol| {
            frames.push(Frame {
                function: symbol
                    .name()
                    .map(|name| strip_symbol(&name.to_string()).into_owned()),
                file: symbol.filename().map(|path| path.display().to_string()),
                line: symbol.lineno(),
            });
        });
        if frames.len() == resolved {
            frames.push(Frame::default());
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_no_frames() {
        assert!(matches!(trim_callers(vec![], 0), Err(TraceError::NoFrames)));
    }

    #[test]
    fn test_trim_too_many_frames() {
        let ips = vec![1; MAX_FRAMES + 1];
        match trim_callers(ips, 0) {
            Err(TraceError::TooManyFrames { count, capacity }) => {
                assert_eq!(count, MAX_FRAMES + 1);
                assert_eq!(capacity, MAX_FRAMES);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_trim_drops_outermost() {
        assert_eq!(trim_callers(vec![1, 2, 3], 0).unwrap(), vec![1, 2]);
        assert_eq!(trim_callers(vec![1], 0).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_trim_frame_limit() {
        assert_eq!(trim_callers(vec![1, 2, 3, 4], 2).unwrap(), vec![1, 2]);
        assert_eq!(trim_callers(vec![1, 2, 3, 4], 3).unwrap(), vec![1, 2, 3]);
        // a limit at or above the captured count only drops the outermost frame
        assert_eq!(trim_callers(vec![1, 2, 3, 4], 4).unwrap(), vec![1, 2, 3]);
        assert_eq!(trim_callers(vec![1, 2, 3, 4], 10).unwrap(), vec![1, 2, 3]);
    }

    #[inline(never)]
    fn entry_point(skip: usize, capacity: usize) -> Vec<usize> {
        callers(entry_point as *const () as usize, skip, capacity)
    }

    #[test]
    fn test_callers_skip_and_capacity() {
        let all = entry_point(0, MAX_FRAMES);
        assert!(!all.is_empty());

        let skipped = entry_point(1, MAX_FRAMES);
        assert_eq!(skipped.len(), all.len() - 1);

        let limited = entry_point(0, 1);
        assert_eq!(limited.len(), 1);

        assert!(entry_point(10_000, MAX_FRAMES).is_empty());
        assert!(entry_point(usize::MAX, MAX_FRAMES).is_empty());
        assert!(entry_point(usize::MAX - 50, usize::MAX).is_empty());
    }

    #[test]
    fn test_resolve_names_caller() {
        let frames = resolve(&entry_point(0, 1));
        let function = frames[0].function.as_deref().unwrap_or("");
        assert!(
            function.ends_with("test_resolve_names_caller"),
            "unexpected function {:?}",
            function
        );
        assert!(frames[0].file.as_deref().unwrap_or("").ends_with("capture.rs"));
    }
}
