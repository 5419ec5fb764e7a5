use std::sync::atomic::{AtomicUsize, Ordering};


/// A segment name no other test in this run (or a concurrent run) picks.
pub(crate) fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "*ipcbuf-{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}
