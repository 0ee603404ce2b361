use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot cancellation flag shared between signal handlers and the
/// polling loop.
///
/// `notify` transitions the flag to `true` at most once; calling it again
/// has no further effect. Both sides use sequentially consistent ordering
/// so the polling loop cannot miss a transition made from a signal handler.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    notified: AtomicBool,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
        }
    }

    /// Set the "notified" state. Safe to call from a signal handler.
    pub fn notify(&self) {
        self.notified.store(true, Ordering::SeqCst);
    }

    /// Returns the "notified" state.
    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::SeqCst)
    }
}
