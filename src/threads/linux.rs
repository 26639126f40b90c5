//! Samples the stacks of other threads by interrupting them with a signal.
//!
//! The handler runs on the interrupted thread, walks its stack with the
//! unsynchronized unwinder and stores the raw addresses in a static slot made
//! of atomics. It neither allocates nor locks. The dumping thread waits for
//! the answer and resolves symbols afterwards.
//!
//! Every request carries a sequence number. A handler writes the slot only
//! after claiming it for the request that is still current, and the dumper
//! never reuses or reads the slot while a claim is held. A handler that
//! misses its deadline therefore cannot mix its frames into another
//! thread's answer.
use std::error::Error;
use std::ffi::c_void;
use std::fs;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use libc::{c_int, pid_t};

use crate::capture::{self, MAX_FRAMES};
use crate::error::TraceError;
use crate::trace::ThreadStack;

/// Ignored by default, so a late delivery after the previous disposition is
/// restored is harmless.
const SAMPLE_SIGNAL: c_int = libc::SIGURG;

/// How long a thread gets to answer the sampling signal.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the dumper waits for a handler that already claimed the slot.
const CLAIM_TIMEOUT: Duration = Duration::from_millis(500);

struct Slot {
    /// Sequence number of the open request, `0` when none is open.
    request: AtomicU64,
    /// Thread the open request is addressed to.
    target: AtomicI32,
    /// Request a handler is currently writing for, `0` when the slot is free.
    owner: AtomicU64,
    /// Request whose answer is complete in `len`, `elided` and `ips`.
    answered: AtomicU64,
    len: AtomicUsize,
    elided: AtomicBool,
    ips: [AtomicUsize; MAX_FRAMES],
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_IP: AtomicUsize = AtomicUsize::new(0);

static SLOT: Slot = Slot {
    request: AtomicU64::new(0),
    target: AtomicI32::new(0),
    owner: AtomicU64::new(0),
    answered: AtomicU64::new(0),
    len: AtomicUsize::new(0),
    elided: AtomicBool::new(false),
    ips: [EMPTY_IP; MAX_FRAMES],
};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// Serializes dumps, the slot and the signal disposition are process wide.
static DUMP_LOCK: Mutex<()> = Mutex::new(());

struct Sample {
    tid: pid_t,
    name: Option<String>,
    state: String,
    ips: Vec<usize>,
    elided: bool,
}

/// Outcome of a single sampling request.
#[derive(Debug)]
enum Reply {
    Stack { ips: Vec<usize>, elided: bool },
    /// The thread did not answer in time.
    Timeout,
    /// The thread no longer exists.
    Gone,
    /// A handler kept the slot claimed past `CLAIM_TIMEOUT`; the slot must
    /// not be used until it lets go.
    Busy,
}

fn gettid() -> pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as pid_t }
}

/// The kernel id of the calling thread.
pub fn current_id() -> u64 {
    gettid() as u64
}

/// Samples every thread of the process. `current` is the already captured
/// stack of the calling thread and is reported first.
pub fn snapshot(current: ThreadStack) -> Vec<ThreadStack> {
    let own = gettid();
    let tids = match list_tasks() {
        Ok(tids) => tids,
        Err(err) => {
            log_sampler_error(err);
            return vec![current];
        }
    };

    let samples = {
        let _guard = DUMP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if !wait_idle(CLAIM_TIMEOUT) {
            log::warn!("a previous stack sampling request is still running, reporting the current thread only");
            return vec![current];
        }
        let previous = match install_handler() {
            Ok(previous) => previous,
            Err(err) => {
                log_sampler_error(err);
                return vec![current];
            }
        };

        let pid = unsafe { libc::getpid() };
        let mut samples = Vec::with_capacity(tids.len());
        for tid in tids.into_iter().filter(|&tid| tid != own) {
            let name = task_name(tid);
            let mut state = task_state(tid);
            let (ips, elided, busy) = match request(pid, tid, RESPONSE_TIMEOUT) {
                Reply::Stack { ips, elided } => (ips, elided, false),
                Reply::Gone => continue,
                Reply::Timeout => {
                    log::debug!("thread {} did not answer the stack sampling signal", tid);
                    state = "unresponsive".into();
                    (Vec::new(), false, false)
                }
                Reply::Busy => {
                    state = "unresponsive".into();
                    (Vec::new(), false, true)
                }
            };
            samples.push(Sample {
                tid,
                name,
                state,
                ips,
                elided,
            });
            if busy {
                log::warn!("stack sampling slot still claimed, skipping the remaining threads");
                break;
            }
        }

        restore_handler(&previous);
        samples
    };

    let mut threads = Vec::with_capacity(samples.len() + 1);
    threads.push(current);
    threads.extend(samples.into_iter().map(|sample| ThreadStack {
        id: sample.tid as u64,
        name: sample.name,
        state: sample.state,
        frames: capture::resolve(&sample.ips),
        elided: sample.elided,
    }));
    threads
}

/// Interrupts `tid` and waits at most `timeout` for its stack.
///
/// The request is closed before returning and the slot is only read once no
/// handler holds a claim on it.
fn request(pid: pid_t, tid: pid_t, timeout: Duration) -> Reply {
    let id = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
    SLOT.target.store(tid, Ordering::SeqCst);
    SLOT.request.store(id, Ordering::SeqCst);

    let rv = unsafe { libc::syscall(libc::SYS_tgkill, pid, tid, SAMPLE_SIGNAL) };
    if rv != 0 {
        SLOT.request.store(0, Ordering::SeqCst);
        return if wait_idle(CLAIM_TIMEOUT) {
            Reply::Gone
        } else {
            Reply::Busy
        };
    }

    let deadline = Instant::now() + timeout;
    let mut answered = true;
    while SLOT.answered.load(Ordering::Acquire) != id {
        if Instant::now() >= deadline {
            answered = false;
            break;
        }
        thread::yield_now();
    }

    SLOT.request.store(0, Ordering::SeqCst);
    if !wait_idle(CLAIM_TIMEOUT) {
        return Reply::Busy;
    }
    if !answered {
        return Reply::Timeout;
    }

    let len = SLOT.len.load(Ordering::Relaxed).min(MAX_FRAMES);
    let ips = SLOT.ips[..len]
        .iter()
        .map(|ip| ip.load(Ordering::Relaxed))
        .collect();
    Reply::Stack {
        ips,
        elided: SLOT.elided.load(Ordering::Relaxed),
    }
}

/// Waits until no handler holds a claim on the slot.
fn wait_idle(timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while SLOT.owner.load(Ordering::SeqCst) != 0 {
        if Instant::now() >= deadline {
            return false;
        }
        thread::yield_now();
    }
    true
}

extern "C" fn on_signal(_signum: c_int, _info: *mut libc::siginfo_t, _context: *mut c_void) {
    let errno = unsafe { *libc::__errno_location() };
    let request = SLOT.request.load(Ordering::SeqCst);
    if request != 0
        && SLOT.target.load(Ordering::SeqCst) == gettid()
        && SLOT
            .owner
            .compare_exchange(0, request, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    {
        // the request may have been closed between the check and the claim
        if SLOT.request.load(Ordering::SeqCst) == request {
            record_stack();
            SLOT.answered.store(request, Ordering::Release);
        }
        SLOT.owner.store(0, Ordering::SeqCst);
    }
    unsafe { *libc::__errno_location() = errno };
}

/// Runs inside the signal handler.
fn record_stack() {
    let handler = on_signal as *const () as usize;
    let mut in_handler = true;
    let mut in_trampoline = false;
    let mut len = 0;
    let mut elided = false;

    // SAFETY: only runs on the interrupted thread while it holds the slot
    // claim, the dumping thread does not touch the slot until it is released.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if in_handler {
                if frame.symbol_address() as usize == handler {
                    in_handler = false;
                    in_trampoline = true;
                }
                return true;
            }
            // the signal return trampoline
            if in_trampoline {
                in_trampoline = false;
                return true;
            }
            if len == MAX_FRAMES {
                elided = true;
                return false;
            }
            SLOT.ips[len].store(frame.ip() as usize, Ordering::Relaxed);
            len += 1;
            true
        });
    }

    SLOT.len.store(len, Ordering::Relaxed);
    SLOT.elided.store(elided, Ordering::Relaxed);
}

fn install_handler() -> io::Result<libc::sigaction> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_signal as *const () as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut previous: libc::sigaction = mem::zeroed();
        if libc::sigaction(SAMPLE_SIGNAL, &action, &mut previous) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }
}

fn restore_handler(previous: &libc::sigaction) {
    let rv = unsafe { libc::sigaction(SAMPLE_SIGNAL, previous, ptr::null_mut()) };
    if rv != 0 {
        log::warn!(
            "failed to restore the previous SIGURG disposition: {}",
            io::Error::last_os_error()
        );
    }
}

fn log_sampler_error(err: io::Error) {
    let err = TraceError::Sampler(err);
    match err.source() {
        Some(source) => log::warn!("{}, reporting the current thread only: {}", err, source),
        None => log::warn!("{}, reporting the current thread only", err),
    }
}

fn list_tasks() -> io::Result<Vec<pid_t>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir("/proc/self/task")? {
        if let Some(tid) = entry?.file_name().to_str().and_then(|s| s.parse().ok()) {
            tids.push(tid);
        }
    }
    tids.sort_unstable();
    Ok(tids)
}

fn task_name(tid: pid_t) -> Option<String> {
    fs::read_to_string(format!("/proc/self/task/{}/comm", tid))
        .ok()
        .map(|comm| comm.trim_end().to_owned())
        .filter(|comm| !comm.is_empty())
}

fn task_state(tid: pid_t) -> String {
    fs::read_to_string(format!("/proc/self/task/{}/stat", tid))
        .ok()
        .and_then(|stat| parse_state(&stat))
        .unwrap_or("unknown")
        .to_owned()
}

/// Parses the scheduler state out of a `stat` line. The command name in
/// parentheses may itself contain spaces and parentheses.
fn parse_state(stat: &str) -> Option<&'static str> {
    let code = stat[stat.rfind(')')? + 1..].trim_start().chars().next()?;
    Some(match code {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk sleep",
        'T' => "stopped",
        't' => "tracing stop",
        'Z' => "zombie",
        'X' | 'x' => "dead",
        'I' => "idle",
        _ => "unknown",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("1234 (worker) S 1 1234 1234"), Some("sleeping"));
        assert_eq!(parse_state("77 (a) b) (c) R 1"), Some("running"));
        assert_eq!(parse_state("5 (kworker) I 2"), Some("idle"));
        assert_eq!(parse_state("garbage"), None);
    }

    #[test]
    fn test_list_tasks_contains_self() {
        let tids = list_tasks().unwrap();
        assert!(tids.contains(&gettid()));
    }

    #[test]
    fn test_task_name() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::Builder::new()
            .name("named-sampler".into())
            .spawn(move || {
                tx.send(gettid()).unwrap();
            })
            .unwrap();
        let tid = rx.recv().unwrap();
        let name = task_name(tid);
        handle.join().unwrap();
        // the thread may already be gone
        if let Some(name) = name {
            assert_eq!(name, "named-sampler");
        }
    }

    #[test]
    fn test_snapshot_samples_parked_thread() {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("parked-sampler".into())
            .spawn(move || {
                ready_tx.send(gettid()).unwrap();
                stop_rx.recv().ok();
            })
            .unwrap();
        let tid = ready_rx.recv().unwrap();

        let current = ThreadStack {
            id: current_id(),
            state: "running".into(),
            ..Default::default()
        };
        let threads = snapshot(current);
        stop_tx.send(()).unwrap();
        handle.join().unwrap();

        assert_eq!(threads[0].id, current_id());
        let parked = threads
            .iter()
            .find(|stack| stack.id == tid as u64)
            .expect("parked thread missing from snapshot");
        assert_eq!(parked.name.as_deref(), Some("parked-sampler"));
        assert!(!parked.frames.is_empty());
    }

    #[test]
    fn test_claimed_slot_is_not_reused() {
        let _guard = DUMP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            ready_tx.send(gettid()).unwrap();
            stop_rx.recv().ok();
        });
        let tid = ready_rx.recv().unwrap();
        let pid = unsafe { libc::getpid() };
        let previous = install_handler().unwrap();

        // a handler from an earlier request that is still writing its answer
        SLOT.owner.store(u64::MAX, Ordering::SeqCst);
        let slow = Duration::from_millis(20);
        let blocked = request(pid, tid, slow);
        assert!(matches!(blocked, Reply::Busy), "unexpected reply {:?}", blocked);
        assert!(!wait_idle(slow));

        let releaser = thread::spawn(|| {
            thread::sleep(Duration::from_millis(50));
            SLOT.owner.store(0, Ordering::SeqCst);
        });
        assert!(wait_idle(Duration::from_secs(5)));
        releaser.join().unwrap();

        let reply = request(pid, tid, RESPONSE_TIMEOUT);
        restore_handler(&previous);
        stop_tx.send(()).unwrap();
        handle.join().unwrap();

        match reply {
            Reply::Stack { ips, .. } => assert!(!ips.is_empty()),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(SLOT.request.load(Ordering::SeqCst), 0);
        assert_eq!(SLOT.owner.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_request_to_exited_thread() {
        let _guard = DUMP_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || tx.send(gettid()).unwrap())
            .join()
            .unwrap();
        let tid = rx.recv().unwrap();
        let pid = unsafe { libc::getpid() };
        assert!(matches!(request(pid, tid, RESPONSE_TIMEOUT), Reply::Gone));
    }
}
