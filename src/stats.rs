//! Pageout Statistics
//!
//! Kstat-style counters maintained by the scheduler, the scanners, and the
//! per-page decider. All counters are monotonic and updated with relaxed
//! atomics; readers take a point-in-time `StatsSnapshot`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Pageout statistics
#[derive(Debug, Default)]
pub struct PageoutStats {
    /// Scanner wakeups driven by a low-memory condition
    pub low_mem_scan: AtomicU64,
    /// Scanner wakeups driven by zones over their cap
    pub zone_cap_scan: AtomicU64,
    /// Scan passes cut short by the CPU time budget
    pub pageout_timeouts: AtomicU64,
    /// Scheduler passes that woke the scanners
    pub pgrrun: AtomicU64,
    /// Pages examined (both hands, ineligible pages excluded)
    pub scan: AtomicU64,
    /// Front-hand revolutions around the page array
    pub rev: AtomicU64,
    /// Pages freed by the daemon
    pub dfree: AtomicU64,
    /// Freed pages that held executable text
    pub execfree: AtomicU64,
    /// Freed pages that held file data
    pub fsfree: AtomicU64,
    /// Freed pages that held anonymous memory
    pub anonfree: AtomicU64,
}

impl PageoutStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a counter
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            low_mem_scan: self.low_mem_scan.load(Ordering::Relaxed),
            zone_cap_scan: self.zone_cap_scan.load(Ordering::Relaxed),
            pageout_timeouts: self.pageout_timeouts.load(Ordering::Relaxed),
            pgrrun: self.pgrrun.load(Ordering::Relaxed),
            scan: self.scan.load(Ordering::Relaxed),
            rev: self.rev.load(Ordering::Relaxed),
            dfree: self.dfree.load(Ordering::Relaxed),
            execfree: self.execfree.load(Ordering::Relaxed),
            fsfree: self.fsfree.load(Ordering::Relaxed),
            anonfree: self.anonfree.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pageout statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub low_mem_scan: u64,
    pub zone_cap_scan: u64,
    pub pageout_timeouts: u64,
    pub pgrrun: u64,
    pub scan: u64,
    pub rev: u64,
    pub dfree: u64,
    pub execfree: u64,
    pub fsfree: u64,
    pub anonfree: u64,
}
