//! Reclaim Tunables and Threshold Derivation
//!
//! Based on the `setupclock()` half of the SVR4/illumos pageout subsystem.
//!
//! All operator-patchable knobs live here as atomic cells, together with
//! the clock threshold chain derived from them:
//!
//! ```text
//! pageout_reserve <= throttlefree <= minfree <= desfree <= lotsfree <= total
//! ```
//!
//! `setup_clock` runs once at boot and again whenever scan-rate calibration
//! completes or memory is hot-added or removed. The first run records every
//! operator override into a sticky snapshot; later runs re-derive from that
//! snapshot, so an override is never clobbered by recalculation.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::host::btop;
use crate::schedpaging::SCHEDPAGING_HZ;

// ============================================================================
// Constants
// ============================================================================

/// Nanoseconds per second
pub const NANOSEC: u64 = 1_000_000_000;

/// Default divisor of total pages for the `lotsfree` target
pub const LOTSFREE_FRACTION: u64 = 64;

/// Ceiling on the default `lotsfree` (2 GiB of pages)
pub const LOTSFREE_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Floor under the default `lotsfree` (16 MiB of pages)
pub const LOTSFREE_MIN_BYTES: u64 = 16 * 1024 * 1024;

/// Nominal disk revolutions per second, sizing the default `maxpgio`
pub const DISKRPM: u64 = 60;

/// Hand spread covering 64 MiB, the classic spread on fixed-size systems
pub const MAXHANDSPREADPAGES: u64 = btop(64 * 1024 * 1024);

/// Pages per scanner region (64 GiB) when sizing the scanner pool
pub const PSCAN_REGION_PAGES: u64 = btop(64 * 1024 * 1024 * 1024);

/// Hard cap on concurrent scanner threads
pub const MAX_PSCAN_THREADS: usize = 16;

/// Default floor of the scan rate interpolation
pub const MAX_SLOWSCAN_DEFAULT: u64 = 100;

/// Default share of a scheduling interval the scanner may burn (percent)
pub const MIN_PERCENT_CPU: u32 = 4;
pub const MAX_PERCENT_CPU: u32 = 80;

/// Default number of calibration samples collected by scanner 0
pub const PAGEOUT_SAMPLE_LIM: u64 = 4;

/// Default front-hand revolutions between self-repositionings
pub const PAGEOUT_RESET_CNT: u64 = 64;

/// Default seconds a writeback push may stall before the deadman fires
pub const PAGEOUT_DEADMAN_SECONDS: u64 = 90;

/// Default number of asynchronous writeback request slots
pub const ASYNC_LIST_SIZE: usize = 256;

// ============================================================================
// Sticky Override Snapshot
// ============================================================================

/// Operator values captured on the first `setup_clock` run.
///
/// A zero means the operator supplied nothing and the default applies.
#[derive(Debug, Clone, Copy, Default)]
struct ClockInit {
    init: bool,
    lotsfree_min: u64,
    lotsfree_max: u64,
    lotsfree: u64,
    desfree: u64,
    minfree: u64,
    throttlefree: u64,
    pageout_reserve: u64,
    maxpgio: u64,
    maxfastscan: u64,
    fastscan: u64,
    slowscan: u64,
    handspreadpages: u64,
}

/// Honor a preserved operator value when it is nonzero and under its
/// ceiling; otherwise fall back to the default, itself held to the ceiling.
fn value_or(preserved: u64, ceiling: u64, default: u64) -> u64 {
    if preserved != 0 && preserved < ceiling {
        preserved
    } else {
        default.min(ceiling)
    }
}

// ============================================================================
// Tunables
// ============================================================================

/// Every operator-visible knob of the pageout engine, plus the threshold
/// cells `setup_clock` derives from them.
///
/// Cells are public: the operator patches them directly at runtime, the
/// way the originals were poked with a kernel debugger. Scanners read them
/// unlocked each cycle and tolerate one cycle of staleness.
#[derive(Debug)]
pub struct Tunables {
    /// Divisor of total pages for the default `lotsfree`
    pub lotsfree_fraction: AtomicU64,
    /// Floor under `lotsfree` (pages); 0 selects the 16 MiB default
    pub lotsfree_min: AtomicU64,
    /// Ceiling over `lotsfree` (pages); 0 selects the 2 GiB default
    pub lotsfree_max: AtomicU64,
    /// Paging starts below this many free pages
    pub lotsfree: AtomicU64,
    /// Desperation point: reclaim becomes insistent below this
    pub desfree: AtomicU64,
    /// Minimum tolerable free memory
    pub minfree: AtomicU64,
    /// Allocations throttle below this
    pub throttlefree: AtomicU64,
    /// Pages held back for the pageout paths themselves
    pub pageout_reserve: AtomicU64,
    /// Maximum pageout I/O operations per second
    pub maxpgio: AtomicU64,
    /// Upper bound on pages examined per second
    pub fastscan: AtomicU64,
    /// Lower bound on pages examined per second
    pub slowscan: AtomicU64,
    /// Learned ceiling on `fastscan` once calibration has run
    pub maxfastscan: AtomicU64,
    /// Distance between the front and back hands (pages)
    pub handspreadpages: AtomicU64,
    /// 0: classic 3/4 ladder; 1: halving ladder
    pub pageout_threshold_style: AtomicU32,
    /// Scanner CPU share at no pressure (percent of an interval)
    pub min_percent_cpu: AtomicU32,
    /// Scanner CPU share at full pressure (percent of an interval)
    pub max_percent_cpu: AtomicU32,
    /// Cap on the default `slowscan`
    pub max_slowscan: AtomicU64,
    /// Calibration samples collected before the scan rate is learned
    pub pageout_sample_lim: AtomicU64,
    /// Front-hand revolutions between scanner self-repositionings
    pub pageout_reset_cnt: AtomicU64,
    /// Scanner threads the scheduler should converge on
    pub des_page_scanners: AtomicU64,
    /// Seconds a stuck push is tolerated before panicking; 0 disables
    pub pageout_deadman_seconds: AtomicU64,
    /// CPU budget override for zone-cap scans; 0 selects the maximum
    pub zone_pageout_nsec: AtomicU64,
    /// Master kill switch; scanners idle when false
    pub dopageout: AtomicBool,
    /// Writeback request slots allocated at init
    pub async_list_size: AtomicU64,

    /// Scanner CPU budget floor per cycle, derived
    pub min_pageout_nsec: AtomicU64,
    /// Scanner CPU budget ceiling per cycle, derived
    pub max_pageout_nsec: AtomicU64,

    clockinit: spin::Mutex<ClockInit>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tunables {
    /// All knobs at their defaults; threshold cells zero until the first
    /// `setup_clock` run (a zero cell reads as "no operator override").
    pub fn new() -> Self {
        Self {
            lotsfree_fraction: AtomicU64::new(LOTSFREE_FRACTION),
            lotsfree_min: AtomicU64::new(0),
            lotsfree_max: AtomicU64::new(0),
            lotsfree: AtomicU64::new(0),
            desfree: AtomicU64::new(0),
            minfree: AtomicU64::new(0),
            throttlefree: AtomicU64::new(0),
            pageout_reserve: AtomicU64::new(0),
            maxpgio: AtomicU64::new(0),
            fastscan: AtomicU64::new(0),
            slowscan: AtomicU64::new(0),
            maxfastscan: AtomicU64::new(0),
            handspreadpages: AtomicU64::new(0),
            pageout_threshold_style: AtomicU32::new(0),
            min_percent_cpu: AtomicU32::new(MIN_PERCENT_CPU),
            max_percent_cpu: AtomicU32::new(MAX_PERCENT_CPU),
            max_slowscan: AtomicU64::new(MAX_SLOWSCAN_DEFAULT),
            pageout_sample_lim: AtomicU64::new(PAGEOUT_SAMPLE_LIM),
            pageout_reset_cnt: AtomicU64::new(PAGEOUT_RESET_CNT),
            des_page_scanners: AtomicU64::new(1),
            pageout_deadman_seconds: AtomicU64::new(PAGEOUT_DEADMAN_SECONDS),
            zone_pageout_nsec: AtomicU64::new(0),
            dopageout: AtomicBool::new(true),
            async_list_size: AtomicU64::new(ASYNC_LIST_SIZE as u64),
            min_pageout_nsec: AtomicU64::new(0),
            max_pageout_nsec: AtomicU64::new(0),
            clockinit: spin::Mutex::new(ClockInit::default()),
        }
    }

    // ------------------------------------------------------------------
    // Unlocked reads used on the hot paths
    // ------------------------------------------------------------------

    pub fn lotsfree(&self) -> u64 {
        self.lotsfree.load(Ordering::Relaxed)
    }

    pub fn desfree(&self) -> u64 {
        self.desfree.load(Ordering::Relaxed)
    }

    pub fn minfree(&self) -> u64 {
        self.minfree.load(Ordering::Relaxed)
    }

    pub fn throttlefree(&self) -> u64 {
        self.throttlefree.load(Ordering::Relaxed)
    }

    pub fn pageout_reserve(&self) -> u64 {
        self.pageout_reserve.load(Ordering::Relaxed)
    }

    pub fn maxpgio(&self) -> u64 {
        self.maxpgio.load(Ordering::Relaxed)
    }

    pub fn fastscan(&self) -> u64 {
        self.fastscan.load(Ordering::Relaxed)
    }

    pub fn slowscan(&self) -> u64 {
        self.slowscan.load(Ordering::Relaxed)
    }

    pub fn handspreadpages(&self) -> u64 {
        self.handspreadpages.load(Ordering::Relaxed)
    }

    pub fn min_pageout_nsec(&self) -> u64 {
        self.min_pageout_nsec.load(Ordering::Relaxed)
    }

    pub fn max_pageout_nsec(&self) -> u64 {
        self.max_pageout_nsec.load(Ordering::Relaxed)
    }

    pub fn sample_lim(&self) -> u64 {
        self.pageout_sample_lim.load(Ordering::Relaxed)
    }

    pub fn reset_cnt(&self) -> u64 {
        self.pageout_reset_cnt.load(Ordering::Relaxed).max(1)
    }

    pub fn deadman_seconds(&self) -> u64 {
        self.pageout_deadman_seconds.load(Ordering::Relaxed)
    }

    pub fn dopageout(&self) -> bool {
        self.dopageout.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Threshold derivation
    // ------------------------------------------------------------------

    /// Derive every clock threshold from `total_pages` and, once known,
    /// the calibrated scan rate.
    ///
    /// The first call snapshots operator overrides and leaves
    /// `des_page_scanners` at 1; every later call re-derives from the
    /// snapshot and re-sizes the scanner pool.
    pub fn setup_clock(&self, total_pages: u64, pageout_new_spread: u64) {
        let t = total_pages;
        let mut ci = self.clockinit.lock();

        let first = !ci.init;
        if first {
            ci.init = true;
            ci.lotsfree_min = self.lotsfree_min.load(Ordering::Relaxed);
            ci.lotsfree_max = self.lotsfree_max.load(Ordering::Relaxed);
            ci.lotsfree = self.lotsfree.load(Ordering::Relaxed);
            ci.desfree = self.desfree.load(Ordering::Relaxed);
            ci.minfree = self.minfree.load(Ordering::Relaxed);
            ci.throttlefree = self.throttlefree.load(Ordering::Relaxed);
            ci.pageout_reserve = self.pageout_reserve.load(Ordering::Relaxed);
            ci.maxpgio = self.maxpgio.load(Ordering::Relaxed);
            ci.maxfastscan = self.maxfastscan.load(Ordering::Relaxed);
            ci.fastscan = self.fastscan.load(Ordering::Relaxed);
            ci.slowscan = self.slowscan.load(Ordering::Relaxed);
            ci.handspreadpages = self.handspreadpages.load(Ordering::Relaxed);
        }

        let halve = self.pageout_threshold_style.load(Ordering::Relaxed) == 1;

        let lotsfree_max = value_or(ci.lotsfree_max, t, btop(LOTSFREE_MAX_BYTES));
        let lotsfree_min = value_or(ci.lotsfree_min, lotsfree_max, btop(LOTSFREE_MIN_BYTES));

        let fraction = self.lotsfree_fraction.load(Ordering::Relaxed).max(1);
        let lotsfree_dfl = (t / fraction).clamp(lotsfree_min, lotsfree_max);
        let lotsfree = value_or(ci.lotsfree, t, lotsfree_dfl);

        let desfree = value_or(ci.desfree, lotsfree, lotsfree / 2);
        let minfree_dfl = if halve { desfree / 2 } else { desfree * 3 / 4 };
        let minfree = value_or(ci.minfree, desfree, minfree_dfl);
        let throttlefree = value_or(ci.throttlefree, minfree, minfree);
        let reserve_dfl = if halve {
            throttlefree / 2
        } else {
            throttlefree * 3 / 4
        };
        let pageout_reserve = value_or(ci.pageout_reserve, throttlefree, reserve_dfl);

        let maxpgio = if ci.maxpgio != 0 {
            ci.maxpgio
        } else {
            (DISKRPM * 2) / 3
        };

        // Until calibration has produced a scan rate the fast rate is not
        // capped from above; afterwards the learned rate bounds it.
        let (maxfastscan, fastscan);
        if pageout_new_spread != 0 {
            maxfastscan = value_or(ci.maxfastscan, u64::MAX, pageout_new_spread);
            fastscan = value_or(ci.fastscan, t.max(1), (t / 2).min(maxfastscan));
        } else {
            maxfastscan = ci.maxfastscan;
            fastscan = value_or(ci.fastscan, t.max(1), t / 2);
        }

        let slow_dfl = (fastscan / 10).min(self.max_slowscan.load(Ordering::Relaxed));
        let slowscan = value_or(ci.slowscan, (fastscan / 2).max(1), slow_dfl).min(fastscan / 2);

        // The back hand trails the front hand by one spread; it must fit
        // strictly inside the page array.
        let hsp = value_or(ci.handspreadpages, t, fastscan);
        let handspreadpages = hsp.clamp(1, (t - 1).max(1));

        // Scanner CPU budget window per scheduling interval.
        let interval = NANOSEC / SCHEDPAGING_HZ;
        let min_nsec =
            (interval * self.min_percent_cpu.load(Ordering::Relaxed) as u64 / 100).max(1);
        let max_nsec =
            (interval * self.max_percent_cpu.load(Ordering::Relaxed) as u64 / 100).max(min_nsec);

        self.lotsfree_max.store(lotsfree_max, Ordering::Relaxed);
        self.lotsfree_min.store(lotsfree_min, Ordering::Relaxed);
        self.lotsfree.store(lotsfree, Ordering::Relaxed);
        self.desfree.store(desfree, Ordering::Relaxed);
        self.minfree.store(minfree, Ordering::Relaxed);
        self.throttlefree.store(throttlefree, Ordering::Relaxed);
        self.pageout_reserve.store(pageout_reserve, Ordering::Relaxed);
        self.maxpgio.store(maxpgio, Ordering::Relaxed);
        self.maxfastscan.store(maxfastscan, Ordering::Relaxed);
        self.fastscan.store(fastscan, Ordering::Relaxed);
        self.slowscan.store(slowscan, Ordering::Relaxed);
        self.handspreadpages.store(handspreadpages, Ordering::Relaxed);
        self.min_pageout_nsec.store(min_nsec, Ordering::Relaxed);
        self.max_pageout_nsec.store(max_nsec, Ordering::Relaxed);

        // Size the scanner pool: one worker per region, where a region is
        // the larger of 64 GiB and two hand spreads. A single worker
        // carries the load until calibration settles the spread.
        let des = if first {
            1
        } else {
            let region = PSCAN_REGION_PAGES.max(2 * handspreadpages).min(t).max(1);
            (t.div_ceil(region)).clamp(1, MAX_PSCAN_THREADS as u64)
        };
        self.des_page_scanners.store(des, Ordering::Relaxed);
    }

    /// Point-in-time copy of the derived thresholds
    pub fn threshold_snapshot(&self) -> ThresholdSnapshot {
        ThresholdSnapshot {
            lotsfree_min: self.lotsfree_min.load(Ordering::Relaxed),
            lotsfree_max: self.lotsfree_max.load(Ordering::Relaxed),
            lotsfree: self.lotsfree(),
            desfree: self.desfree(),
            minfree: self.minfree(),
            throttlefree: self.throttlefree(),
            pageout_reserve: self.pageout_reserve(),
            maxpgio: self.maxpgio(),
            maxfastscan: self.maxfastscan.load(Ordering::Relaxed),
            fastscan: self.fastscan(),
            slowscan: self.slowscan(),
            handspreadpages: self.handspreadpages(),
            min_pageout_nsec: self.min_pageout_nsec(),
            max_pageout_nsec: self.max_pageout_nsec(),
            des_page_scanners: self.des_page_scanners.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the derived clock thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSnapshot {
    pub lotsfree_min: u64,
    pub lotsfree_max: u64,
    pub lotsfree: u64,
    pub desfree: u64,
    pub minfree: u64,
    pub throttlefree: u64,
    pub pageout_reserve: u64,
    pub maxpgio: u64,
    pub maxfastscan: u64,
    pub fastscan: u64,
    pub slowscan: u64,
    pub handspreadpages: u64,
    pub min_pageout_nsec: u64,
    pub max_pageout_nsec: u64,
    pub des_page_scanners: u64,
}
