//! Pageout Context - Shared Engine State
//!
//! The single handle tying the subsystem together: the host capability
//! vtable, the tunables, the scheduler/scanner shared cells, the writeback
//! queue, and the wake plumbing. Thresholds and budgets are plain atomic
//! cells written by the scheduler; scanners read them unlocked each cycle
//! and tolerate one cycle of staleness.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::PageoutError;
use crate::host::PageoutHost;
use crate::push::PushQueue;
use crate::scanner::PageoutScanner;
use crate::stats::{PageoutStats, StatsSnapshot};
use crate::tunables::{ThresholdSnapshot, Tunables, MAX_PSCAN_THREADS};

// ============================================================================
// Share-Count Threshold Bounds
// ============================================================================

/// Floor of the shared-page skip threshold
pub const MIN_PO_SHARE: u64 = 8;

/// Ceiling of the shared-page skip threshold
pub const MAX_PO_SHARE: u64 = 8 << 24;

// ============================================================================
// Pageout Context
// ============================================================================

/// Process-wide state of the pageout engine
pub struct PageoutCtx {
    host: Arc<dyn PageoutHost>,
    tunables: Tunables,
    stats: PageoutStats,
    push: PushQueue,

    /// Pageable pages under management, refreshed on recalculation
    total_pages: AtomicU64,
    /// Page budget for the next scan cycle
    desscan: AtomicU64,
    /// CPU budget for the next scan cycle
    pageout_nsec: AtomicU64,
    /// Pages examined so far this scheduling tick, all scanners
    nscan: AtomicU64,
    /// Latched by the scheduler when reclaim is zone-cap driven
    zones_over: AtomicBool,
    /// Pages mapped by more than this many address spaces are skipped
    po_share: AtomicU64,
    /// Serializes compound `po_share` updates; never held across a sleep
    pageout_mutex: spin::Mutex<()>,
    /// Scanner threads currently published
    current_scanners: AtomicUsize,
    /// Publish-once reposition latches, one per scanner instance
    reset_hand: [AtomicBool; MAX_PSCAN_THREADS],

    // Calibration cells; written by scanner instance 0 only.
    sample_pages: AtomicU64,
    sample_etime_ns: AtomicU64,
    sample_count: AtomicU64,
    pageout_rate: AtomicU64,
    pageout_new_spread: AtomicU64,

    // Deadman bookkeeping, touched only by the 1 Hz tick.
    deadman_stuck: AtomicU64,
    deadman_seen: AtomicU64,

    // All scanners block on one gate; every wake ticks every worker.
    wake_gate: Mutex<u64>,
    wake_cv: Condvar,

    // External memory waiters, released by the scheduler.
    memavail_gate: Mutex<u64>,
    memavail_cv: Condvar,
}

impl PageoutCtx {
    /// Build the engine: validate sizing, derive boot thresholds, and arm
    /// every reposition latch so workers place their hands on first wake.
    ///
    /// Patch operator overrides into `tunables` before calling; this is
    /// the boot run that makes them sticky.
    pub fn new(
        host: Arc<dyn PageoutHost>,
        tunables: Tunables,
    ) -> Result<Arc<Self>, PageoutError> {
        let total = host.total_pages();
        if total < 2 {
            return Err(PageoutError::TooFewPages(total));
        }
        let nslots = tunables.async_list_size.load(Ordering::Relaxed) as usize;
        if nslots == 0 {
            return Err(PageoutError::EmptyPushPool);
        }

        tunables.setup_clock(total, 0);

        // Pre-first-tick budgets, as the scheduler would set them under
        // startup conditions.
        let desscan = tunables.fastscan() / crate::schedpaging::SCHEDPAGING_HZ;
        let pageout_nsec = tunables.max_pageout_nsec();

        let ctx = Arc::new(Self {
            host,
            tunables,
            stats: PageoutStats::new(),
            push: PushQueue::new(nslots),
            total_pages: AtomicU64::new(total),
            desscan: AtomicU64::new(desscan),
            pageout_nsec: AtomicU64::new(pageout_nsec),
            nscan: AtomicU64::new(0),
            zones_over: AtomicBool::new(false),
            po_share: AtomicU64::new(MIN_PO_SHARE),
            pageout_mutex: spin::Mutex::new(()),
            current_scanners: AtomicUsize::new(1),
            reset_hand: std::array::from_fn(|_| AtomicBool::new(true)),
            sample_pages: AtomicU64::new(0),
            sample_etime_ns: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
            pageout_rate: AtomicU64::new(0),
            pageout_new_spread: AtomicU64::new(0),
            deadman_stuck: AtomicU64::new(0),
            deadman_seen: AtomicU64::new(0),
            wake_gate: Mutex::new(0),
            wake_cv: Condvar::new(),
            memavail_gate: Mutex::new(0),
            memavail_cv: Condvar::new(),
        });
        Ok(ctx)
    }

    /// Spawn the writeback master, the deadman, the scheduler, and scanner
    /// instance 0 through the host's thread primitive.
    pub fn start(self: &Arc<Self>) -> Result<(), PageoutError> {
        let spawn = |name: &str, body: Box<dyn FnOnce() + Send + 'static>| {
            self.host
                .spawn_thread(name, body)
                .map_err(|source| PageoutError::ThreadSpawn {
                    name: name.to_string(),
                    source,
                })
        };

        let ctx = Arc::clone(self);
        spawn(
            "pageout",
            Box::new(move || ctx.push.master_run(&*ctx.host, &ctx.tunables)),
        )?;

        let ctx = Arc::clone(self);
        spawn(
            "pageout_deadman",
            Box::new(move || loop {
                ctx.deadman_tick();
                std::thread::sleep(Duration::from_secs(1));
            }),
        )?;

        self.spawn_scanner(0)?;

        let ctx = Arc::clone(self);
        spawn(
            "pageout_scheduler",
            Box::new(move || {
                let interval = Duration::from_millis(1000 / crate::schedpaging::SCHEDPAGING_HZ);
                loop {
                    ctx.schedpaging_tick();
                    std::thread::sleep(interval);
                }
            }),
        )?;
        Ok(())
    }

    /// Spawn one scanner worker thread
    pub(crate) fn spawn_scanner(self: &Arc<Self>, inst: usize) -> Result<(), PageoutError> {
        let name = format!("pageout_scanner_{inst}");
        let ctx = Arc::clone(self);
        self.host
            .spawn_thread(&name, Box::new(move || PageoutScanner::new(ctx, inst).run()))
            .map_err(|source| PageoutError::ThreadSpawn { name, source })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub(crate) fn host(&self) -> &dyn PageoutHost {
        &*self.host
    }

    /// Operator tunable surface
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Derived threshold values as of now
    pub fn thresholds(&self) -> ThresholdSnapshot {
        self.tunables.threshold_snapshot()
    }

    /// Pageout counters as of now
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn stats_ref(&self) -> &PageoutStats {
        &self.stats
    }

    /// The writeback queue (visible for depth inspection)
    pub fn push_queue(&self) -> &PushQueue {
        &self.push
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages.load(Ordering::Relaxed)
    }

    pub fn desscan(&self) -> u64 {
        self.desscan.load(Ordering::Relaxed)
    }

    pub(crate) fn set_desscan(&self, v: u64) {
        self.desscan.store(v, Ordering::Relaxed);
    }

    pub fn pageout_nsec(&self) -> u64 {
        self.pageout_nsec.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pageout_nsec(&self, v: u64) {
        self.pageout_nsec.store(v, Ordering::Relaxed);
    }

    /// Pages examined so far this tick, all scanners combined
    pub fn nscan(&self) -> u64 {
        self.nscan.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_nscan(&self) {
        self.nscan.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_nscan(&self, n: u64) {
        self.nscan.fetch_add(n, Ordering::Relaxed);
    }

    pub fn zones_over(&self) -> bool {
        self.zones_over.load(Ordering::Relaxed)
    }

    pub(crate) fn set_zones_over(&self, v: bool) {
        self.zones_over.store(v, Ordering::Relaxed);
    }

    pub fn current_scanners(&self) -> usize {
        self.current_scanners.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current_scanners(&self, n: usize) {
        self.current_scanners.store(n, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Share-count threshold
    // ------------------------------------------------------------------

    pub fn po_share(&self) -> u64 {
        self.po_share.load(Ordering::Relaxed)
    }

    /// Operator override of the share-count threshold
    pub fn set_po_share(&self, v: u64) {
        let _guard = self.pageout_mutex.lock();
        self.po_share
            .store(v.clamp(MIN_PO_SHARE, MAX_PO_SHARE), Ordering::Relaxed);
    }

    /// Calm system: relax the shared-page skip threshold one notch
    pub(crate) fn po_share_cool(&self) {
        let _guard = self.pageout_mutex.lock();
        let cur = self.po_share.load(Ordering::Relaxed);
        if cur > MIN_PO_SHARE {
            self.po_share.store(cur >> 1, Ordering::Relaxed);
        }
    }

    /// Hands wrapped without progress: admit more widely shared pages.
    /// Returns false when the threshold was already wide open.
    pub(crate) fn po_share_escalate(&self) -> bool {
        let _guard = self.pageout_mutex.lock();
        let cur = self.po_share.load(Ordering::Relaxed);
        if cur < MAX_PO_SHARE {
            self.po_share.store(cur << 1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Reposition latches
    // ------------------------------------------------------------------

    /// Arm every worker's reposition latch (pool resize, hot-add)
    pub(crate) fn set_all_reset_hands(&self) {
        for latch in &self.reset_hand {
            latch.store(true, Ordering::Release);
        }
    }

    /// Arm one worker's own latch (periodic self-reposition)
    pub(crate) fn set_reset_hand(&self, inst: usize) {
        self.reset_hand[inst].store(true, Ordering::Release);
    }

    /// Consume a worker's latch; only worker `inst` calls this
    pub(crate) fn take_reset_hand(&self, inst: usize) -> bool {
        self.reset_hand[inst].swap(false, Ordering::AcqRel)
    }

    // ------------------------------------------------------------------
    // Calibration
    // ------------------------------------------------------------------

    /// Whether scanner 0 is still collecting throughput samples
    pub fn scan_startup(&self) -> bool {
        self.sample_count.load(Ordering::Relaxed) < self.tunables.sample_lim()
    }

    /// Whether the scan rate has been learned
    pub fn calibrated(&self) -> bool {
        self.pageout_new_spread.load(Ordering::Relaxed) != 0
    }

    pub(crate) fn pageout_new_spread(&self) -> u64 {
        self.pageout_new_spread.load(Ordering::Relaxed)
    }

    /// Fold one calibration sample in; worker 0 only
    pub(crate) fn record_sample(&self, pages: u64, etime_ns: u64) {
        self.sample_pages.fetch_add(pages, Ordering::Relaxed);
        self.sample_etime_ns.fetch_add(etime_ns, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Turn the accumulated samples into a scan rate and re-derive the
    /// thresholds around it; worker 0 only, once.
    pub(crate) fn finish_calibration(&self) {
        let pages = self.sample_pages.load(Ordering::Relaxed);
        let etime = self.sample_etime_ns.load(Ordering::Relaxed).max(1);
        let rate = (pages as u128 * crate::tunables::NANOSEC as u128 / etime as u128) as u64;
        self.pageout_rate.store(rate, Ordering::Relaxed);
        self.pageout_new_spread.store(rate / 10, Ordering::Relaxed);
        self.recalc_thresholds();
    }

    /// Learned page-scan rate in pages per second (0 until calibrated)
    pub fn pageout_rate(&self) -> u64 {
        self.pageout_rate.load(Ordering::Relaxed)
    }

    /// Re-derive every threshold, e.g. after memory hot-add or removal.
    /// Operator overrides recorded at boot are preserved.
    pub fn recalc_thresholds(&self) {
        let total = self.host.total_pages().max(2);
        self.total_pages.store(total, Ordering::Relaxed);
        self.tunables
            .setup_clock(total, self.pageout_new_spread.load(Ordering::Relaxed));
    }

    // ------------------------------------------------------------------
    // Deadman cells
    // ------------------------------------------------------------------

    pub(crate) fn deadman_cells(&self) -> (&AtomicU64, &AtomicU64) {
        (&self.deadman_stuck, &self.deadman_seen)
    }

    // ------------------------------------------------------------------
    // Wake plumbing
    // ------------------------------------------------------------------

    /// Tick every scanner blocked on the shared gate
    pub(crate) fn wake_scanners(&self) {
        let mut gen = self.wake_gate.lock().unwrap();
        *gen += 1;
        self.wake_cv.notify_all();
    }

    /// Worker side: sleep until the generation moves past `last_seen`
    pub(crate) fn scanner_wait(&self, last_seen: &mut u64) {
        let mut gen = self.wake_gate.lock().unwrap();
        while *gen == *last_seen {
            gen = self.wake_cv.wait(gen).unwrap();
        }
        *last_seen = *gen;
    }

    /// Scheduler side: release anyone blocked in `wait_for_memory`
    pub(crate) fn broadcast_memavail(&self) {
        let mut gen = self.memavail_gate.lock().unwrap();
        *gen += 1;
        self.memavail_cv.notify_all();
    }

    /// Block until the scheduler next observes reclaimable kernel memory
    pub fn wait_for_memory(&self) {
        let mut gen = self.memavail_gate.lock().unwrap();
        let seen = *gen;
        while *gen == seen {
            gen = self.memavail_cv.wait(gen).unwrap();
        }
    }
}
