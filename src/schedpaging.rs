//! Paging Scheduler
//!
//! Based on `schedpaging()` of the SVR4/illumos pageout subsystem.
//!
//! Runs four times a second. Each tick reads one snapshot of the memory
//! pressure signals, kicks the other reclaimers first, then sets the two
//! budgets every scanner works under for the next cycle: `desscan`, the
//! number of pages a scanner may examine, and `pageout_nsec`, the CPU it
//! may burn doing so. Both interpolate between their calm and desperate
//! extremes on current free-memory headroom. The tick also converges the
//! scanner pool onto `des_page_scanners` and decides whether this cycle
//! scans at all.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::ctx::PageoutCtx;
use crate::probes;
use crate::stats::PageoutStats;
use crate::tunables::MAX_PSCAN_THREADS;

// ============================================================================
// Constants
// ============================================================================

/// Scheduler ticks per second
pub const SCHEDPAGING_HZ: u64 = 4;

// ============================================================================
// Scheduler Tick
// ============================================================================

impl PageoutCtx {
    /// One scheduler pass. Self-rescheduling when driven by `start()`;
    /// callable directly for deterministic hosts.
    pub fn schedpaging_tick(self: &Arc<Self>) {
        let h = self.host();
        let tun = self.tunables();
        let stats = self.stats_ref();

        // One snapshot per tick; every decision below uses these values
        // even if the world moves underneath us.
        let freemem = h.freemem();
        let needfree = h.needfree();
        let deficit = h.deficit();
        let lotsfree = tun.lotsfree();

        // The cheaper reclaimers go first, ahead of the scan budget
        // arithmetic, so whatever memory they return is seen no earlier
        // than the next tick's snapshot.
        if freemem < lotsfree + needfree + h.kmem_reapahead() {
            h.kmem_reap();
        }
        if freemem < lotsfree + needfree {
            h.seg_preap();
        }
        if h.kcage_on() && (h.kcage_freemem() < h.kcage_desfree() || h.kcage_needfree() > 0) {
            h.kcage_cageout_wakeup();
        }

        self.reset_nscan();

        // Headroom above the deficit; once calibrated, outstanding
        // needfree is counted against it as well.
        let calibrated = self.calibrated();
        let mut avail = freemem as i128 - deficit as i128;
        if calibrated {
            avail -= needfree as i128;
        }
        let vavail = avail.clamp(0, lotsfree as i128) as u64;

        // Page budget: scan flat out while uncalibrated under real
        // shortage, otherwise interpolate between slowscan and fastscan
        // on headroom. Widened arithmetic; the products overflow 64 bits
        // on large hosts well before freemem reaches zero.
        let fastscan = tun.fastscan();
        let slowscan = tun.slowscan();
        let mut desscan = if !calibrated && needfree > 0 {
            fastscan / SCHEDPAGING_HZ
        } else {
            let num = slowscan as u128 * vavail as u128
                + fastscan as u128 * lotsfree.saturating_sub(vavail) as u128;
            (num / lotsfree.max(1) as u128 / SCHEDPAGING_HZ as u128) as u64
        };

        // CPU budget: everything we have while uncalibrated, otherwise
        // the same interpolation in time.
        let min_nsec = tun.min_pageout_nsec();
        let max_nsec = tun.max_pageout_nsec();
        let mut nsec = if !calibrated {
            max_nsec
        } else {
            min_nsec
                + (lotsfree.saturating_sub(vavail) as u128 * (max_nsec - min_nsec) as u128
                    / lotsfree.max(1) as u128) as u64
        };

        // Converge the scanner pool on the desired size. Shrinks retire
        // workers through their reposition latches; grows spawn the new
        // instances here.
        if calibrated {
            let desired = tun.des_page_scanners.load(Ordering::Relaxed) as usize;
            let current = self.current_scanners();
            if desired != current {
                let cap = (self.total_pages() / tun.handspreadpages().max(1)) as usize;
                let newn = desired.clamp(1, cap.clamp(1, MAX_PSCAN_THREADS));
                self.set_current_scanners(newn);
                self.set_all_reset_hands();
                for inst in current..newn {
                    if let Err(e) = self.spawn_scanner(inst) {
                        log::warn!(target: "pageout", "scanner spawn failed: {e}");
                    }
                }
            }
        }

        // Decide whether this cycle scans. Low memory (or a calibration
        // run) always scans; a zone over its cap scans with no page limit
        // and its own CPU budget; a calm system instead relaxes the
        // shared-page threshold and lets the writeback master drain.
        let startup = self.scan_startup();
        let mut wake = false;
        if freemem < lotsfree + needfree || startup {
            if !startup {
                PageoutStats::inc(&stats.low_mem_scan);
            }
            probes::schedpage_wake_low();
            wake = true;
        } else if h.zones_over_cap() > 0 {
            desscan = self.total_pages();
            let zone_nsec = tun.zone_pageout_nsec.load(Ordering::Relaxed);
            nsec = if zone_nsec != 0 { zone_nsec } else { max_nsec };
            self.set_zones_over(true);
            PageoutStats::inc(&stats.zone_cap_scan);
            probes::schedpage_wake_zone();
            wake = true;
        } else {
            self.set_zones_over(false);
            self.po_share_cool();
            self.push_queue().tick();
        }

        self.set_desscan(desscan);
        self.set_pageout_nsec(nsec);
        if wake {
            PageoutStats::inc(&stats.pgrrun);
            self.wake_scanners();
        }

        if h.kmem_avail() > 0 {
            self.broadcast_memavail();
        }
    }
}
