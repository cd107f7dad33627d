//! A one-shot, cancellable, replaceable retransmission timer.
//!
//! Matches the concurrency model of §5: "at most one armed timer per
//! endpoint", armed on a scheduler thread, guarded by its own mutex so
//! cancel-and-replace is atomic without ever nesting under the state
//! control block's lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct RtoTimer {
    generation: AtomicU64,
    // Serializes arm()/cancel() against each other; the generation counter
    // alone would race two concurrent arm() calls into handing out the same
    // generation.
    lock: Mutex<()>,
}

impl RtoTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(RtoTimer::default())
    }

    /// Arms the timer, replacing (logically cancelling) whatever was
    /// previously armed. `on_fire` runs on a fresh scheduler thread, and
    /// only if nothing re-armed or cancelled the timer in the meantime.
    pub fn arm(self: &Arc<Self>, dur: Duration, on_fire: impl FnOnce() + Send + 'static) {
        let my_generation = {
            let _guard = self.lock.lock().unwrap();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let weak = Arc::downgrade(self);
        thread::spawn(move || {
            thread::sleep(dur);
            let Some(timer) = weak.upgrade() else { return };
            if timer.generation.load(Ordering::SeqCst) == my_generation {
                on_fire();
            }
        });
    }

    /// Cancels any currently-armed timer; a pending firing becomes a no-op.
    pub fn cancel(&self) {
        let _guard = self.lock.lock().unwrap();
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
