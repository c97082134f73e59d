//! Writeback Deadman
//!
//! Based on `pageout_deadman()` of the SVR4/illumos pageout subsystem.
//!
//! A page push that hangs inside the filesystem wedges the whole engine:
//! the master never completes, the queue fills, and the machine quietly
//! stops reclaiming. Rather than hang forever, a 1 Hz watchdog counts the
//! seconds a single push has been in flight without the completion count
//! moving, and past the configured window it brings the system down for a
//! crash dump.

use std::sync::atomic::Ordering;

use crate::ctx::PageoutCtx;

impl PageoutCtx {
    /// One watchdog pass; expected once per second.
    pub fn deadman_tick(&self) {
        let h = self.host();
        if h.is_panicking() {
            return;
        }
        let window = self.tunables().deadman_seconds();
        if window == 0 {
            return;
        }

        let (stuck, seen) = self.deadman_cells();
        let (in_flight, push_count) = self.push_queue().deadman_view();

        // Idle, or the count moved: the master is making progress.
        if !in_flight || push_count != seen.load(Ordering::Relaxed) {
            stuck.store(0, Ordering::Relaxed);
            seen.store(push_count, Ordering::Relaxed);
            return;
        }

        let stalled = stuck.fetch_add(1, Ordering::Relaxed) + 1;
        if stalled >= window {
            h.panic(&format!(
                "pageout deadman: stuck pushing the same page for {} seconds (freemem is {})",
                stalled,
                h.freemem()
            ));
        }
    }
}
