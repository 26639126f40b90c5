use std::thread;

use crate::trace::ThreadStack;

/// Best-effort numeric id of the calling thread.
pub fn current_id() -> u64 {
    // `ThreadId::as_u64` is unstable, the debug form is `ThreadId(<n>)`
    format!("{:?}", thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

/// Other threads cannot be sampled on this target.
pub fn snapshot(current: ThreadStack) -> Vec<ThreadStack> {
    vec![current]
}
