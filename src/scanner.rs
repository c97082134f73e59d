//! Pageout Scanner - Two-Handed Clock Worker
//!
//! Based on `pageout_scanner()` of the SVR4/illumos pageout subsystem.
//!
//! Each worker owns a front and a back hand into the shared circular page
//! array, one hand spread apart. On every wake it walks both hands forward
//! under a page budget and a CPU time budget set by the scheduler, feeding
//! each page to the per-page decider. Worker 0 additionally runs the
//! throughput calibration that teaches the scheduler how fast this host
//! can actually scan.
//!
//! Workers never exit on their own; a worker terminates only when it finds
//! its reposition latch set while its instance number is beyond the
//! published pool size (a graceful shrink).

use std::sync::Arc;

use crate::checkpage::{check_page, CheckResult, Hand};
use crate::ctx::PageoutCtx;
use crate::host::PageId;
use crate::probes;
use crate::stats::PageoutStats;
use crate::tunables::MAXHANDSPREADPAGES;

// ============================================================================
// Constants
// ============================================================================

/// The CPU budget is polled every `PAGES_POLL_MASK + 1` pages
pub const PAGES_POLL_MASK: u64 = 1023;

// ============================================================================
// Scanner Worker
// ============================================================================

/// Per-instance scanner state
pub struct PageoutScanner {
    ctx: Arc<PageoutCtx>,
    inst: usize,
    /// Leading hand: clears reference bits
    front: PageId,
    /// Trailing hand: reclaims what stayed unreferenced
    back: PageId,
    /// Lifetime front-hand revolutions
    iter: u64,
    /// Revolutions since a page was last freed
    count: u64,
    /// Wake generation last consumed from the shared gate
    wake_seen: u64,
}

impl PageoutScanner {
    /// Hands start unplaced; the armed reposition latch assigns them on
    /// the first wake.
    pub(crate) fn new(ctx: Arc<PageoutCtx>, inst: usize) -> Self {
        let first = ctx.host().page_first();
        Self {
            ctx,
            inst,
            front: first,
            back: first,
            iter: 0,
            count: 0,
            wake_seen: 0,
        }
    }

    /// Worker body: sleep on the shared gate, service each wake, exit
    /// when demoted out of the pool.
    pub(crate) fn run(mut self) {
        loop {
            self.ctx.scanner_wait(&mut self.wake_seen);
            if !self.handle_wake() {
                return;
            }
        }
    }

    /// Service one wake. Returns false when this worker should terminate.
    fn handle_wake(&mut self) -> bool {
        if !self.ctx.tunables().dopageout() {
            return true;
        }
        if self.ctx.take_reset_hand(self.inst) {
            if self.inst >= self.ctx.current_scanners() {
                return false;
            }
            self.position_hands();
        }
        self.scan_pass();
        true
    }

    /// Carve the page array into one region per worker and drop this
    /// worker's hands at the start of its region, one spread apart.
    fn position_hands(&mut self) {
        let h = self.ctx.host();
        let total = self.ctx.total_pages();
        let nscanners = self.ctx.current_scanners().max(1) as u64;

        let mut spread = self.ctx.tunables().handspreadpages();
        if spread == 0 {
            spread = MAXHANDSPREADPAGES;
        }
        spread = spread.min(total - 1);

        let offset = total / nscanners;
        self.back = h.page_nextn(h.page_first(), offset * self.inst as u64);
        self.front = h.page_nextn(self.back, spread);
    }

    /// One scan cycle: walk both hands under the page and CPU budgets.
    fn scan_pass(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let h = ctx.host();
        let tun = ctx.tunables();
        let stats = ctx.stats_ref();

        // During calibration the pass is bounded by time alone, so worker
        // 0 can measure an unthrottled sweep.
        let calibrating = ctx.scan_startup();
        let nscan_limit = if calibrating {
            ctx.total_pages()
        } else {
            ctx.desscan()
        };
        let budget_ns = ctx.pageout_nsec();

        probes::pageout_start(nscan_limit, self.inst, self.back, self.front);

        let first = h.page_first();
        let sample_start = h.now_ns();
        let mut pcount: u64 = 0;
        let mut nscan_cnt: u64 = 0;

        while nscan_cnt < nscan_limit
            && (ctx.zones_over() || h.freemem() < tun.lotsfree() + h.needfree() || calibrating)
        {
            if (pcount & PAGES_POLL_MASK) == PAGES_POLL_MASK {
                probes::pageout_loop(pcount, self.inst);
                if h.now_ns() - sample_start >= budget_ns {
                    // Ran out of CPU, not out of pages. Zone-cap sweeps
                    // expect to hit this, so they are not counted.
                    if !ctx.zones_over() {
                        PageoutStats::inc(&stats.pageout_timeouts);
                    }
                    probes::pageout_timeout(self.inst);
                    break;
                }
            }

            let rvf = check_page(&ctx, self.front, Hand::Front);
            let rvb = check_page(&ctx, self.back, Hand::Back);
            if rvf == CheckResult::Freed || rvb == CheckResult::Freed {
                self.count = 0;
            }
            pcount += 1;
            if rvf != CheckResult::Ineligible || rvb != CheckResult::Ineligible {
                nscan_cnt += 1;
            }

            self.front = h.page_next(self.front);
            self.back = h.page_next(self.back);

            if self.front == first {
                probes::pageout_wrap_front(self.inst);
                PageoutStats::inc(&stats.rev);
                self.iter += 1;
                self.count += 1;

                // Periodically fall back to freshly computed hand
                // positions, picking up pool and spread changes.
                if self.iter % tun.reset_cnt() == 0 {
                    ctx.set_reset_hand(self.inst);
                }

                // A full revolution without freeing anything while memory
                // is still short: admit more widely shared pages. Once
                // the threshold is wide open there is nothing left to
                // try this wake.
                if self.count > 1
                    && h.freemem() < tun.lotsfree() + h.needfree()
                    && !ctx.po_share_escalate()
                {
                    break;
                }
            }
        }

        let sample_end = h.now_ns();
        ctx.add_nscan(nscan_cnt);
        PageoutStats::add(&stats.scan, nscan_cnt);
        probes::pageout_loop_end(nscan_cnt, pcount, self.inst);

        // Worker 0 owns calibration: accumulate samples while in startup,
        // then fold them into a scan rate on the first pass afterwards.
        if self.inst == 0 && ctx.pageout_new_spread() == 0 {
            if calibrating {
                ctx.record_sample(pcount, sample_end.saturating_sub(sample_start));
            } else {
                ctx.finish_calibration();
            }
        }
    }
}
