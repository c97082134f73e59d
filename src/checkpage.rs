//! Per-Page Reclaim Decision
//!
//! Based on `checkpage()` of the SVR4/illumos pageout subsystem.
//!
//! Given one page under one clock hand, decide among three outcomes:
//! the page is untouchable right now (`Ineligible`), it was examined but
//! stays resident (`NotFreed`), or it was freed or handed to writeback
//! (`Freed`). The front hand clears reference bits as it passes; the back
//! hand, trailing by the hand spread, reclaims whatever has not been
//! referenced since.

use crate::ctx::PageoutCtx;
use crate::host::{PageAttrs, PageClass, PageId, SyncFlags, ZoneStat};
use crate::probes;
use crate::stats::PageoutStats;

// ============================================================================
// Outcomes
// ============================================================================

/// Which clock hand is examining the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    /// Leading hand: clears reference bits
    Front,
    /// Trailing hand: reclaims still-unreferenced pages
    Back,
}

/// Disposition of one page under one hand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Not a candidate at all; does not count against the scan budget
    Ineligible,
    /// Examined and kept resident
    NotFreed,
    /// Freed directly, or queued for free-when-clean writeback
    Freed,
}

// ============================================================================
// Decision
// ============================================================================

/// Classify `page` under `hand` and carry out the resulting transition.
pub(crate) fn check_page(ctx: &PageoutCtx, page: PageId, hand: Hand) -> CheckResult {
    let h = ctx.host();

    // Cheap unlocked rejections first; anything that passes is worth the
    // cost of the exclusive lock.
    if h.is_kernel(page)
        || h.is_locked(page)
        || h.is_free(page)
        || h.lock_count(page) != 0
        || h.cow_count(page) != 0
        || h.share_count_exceeds(page, ctx.po_share())
    {
        return CheckResult::Ineligible;
    }

    if !h.try_lock_exclusive(page) {
        return CheckResult::Ineligible;
    }

    // The unlocked peeks can go stale at any time; re-test under the lock.
    if h.is_free(page) {
        h.unlock(page);
        return CheckResult::Ineligible;
    }
    if h.lock_count(page) != 0 || h.cow_count(page) != 0 {
        h.unlock(page);
        return CheckResult::Ineligible;
    }

    // In zone-cap mode only pages of an offending zone are candidates.
    let mut zid = None;
    if ctx.zones_over() {
        match h.zone_of(page) {
            Some(z) if h.zone_over_cap(z) => zid = Some(z),
            _ => {
                h.unlock(page);
                return CheckResult::Ineligible;
            }
        }
    }

    // The front hand collects and clears ref+mod in one pass; the back
    // hand only collects, and lets the host cut the mapping walk short on
    // the first set ref bit or an over-shared page.
    let how = match hand {
        Hand::Front => SyncFlags::ZERO_RM,
        Hand::Back => SyncFlags::DONT_ZERO | SyncFlags::STOP_ON_REF | SyncFlags::STOP_ON_SHARED,
    };
    let mut attrs = h.sync_attrs(page, how);

    loop {
        // A referenced page stays. Under the front hand it is left
        // unreferenced but reclaimable, so the back hand can take it if
        // the owner stays away for a full spread.
        if attrs.intersects(PageAttrs::REF) {
            probes::pageout_isref(page, hand);
            if hand == Hand::Front {
                h.clear_ref(page);
            }
            h.unlock(page);
            return CheckResult::NotFreed;
        }

        // Large pages are reclaimed one constituent page at a time.
        if h.size_class(page) != 0 {
            if !h.try_demote(page) {
                h.unlock(page);
                return CheckResult::Ineligible;
            }
            attrs = h.get_attrs(page, PageAttrs::REF | PageAttrs::MOD);
            continue;
        }

        // Dirty file pages go to the writeback queue. The vnode hold
        // travels with the request and is dropped by the master; on a
        // full queue the page simply waits for a later sweep.
        if attrs.intersects(PageAttrs::MOD) {
            if let Some(vnode) = h.vnode_of(page) {
                let offset = h.offset_of(page);
                h.hold_vnode(vnode);
                h.unlock(page);
                return if ctx.push_queue().queue_io_request(vnode, offset) {
                    h.zone_pageout_stat(zid, ZoneStat::Dirty);
                    CheckResult::Freed
                } else {
                    h.release_vnode(vnode);
                    CheckResult::NotFreed
                };
            }
        }

        // Clean (or unbacked) and unreferenced: sever the mappings and
        // look once more before the point of no return. A mapping that
        // came back dirty or referenced in the window sends us around
        // again.
        h.unload_mappings(page);
        attrs = h.get_attrs(page, PageAttrs::REF | PageAttrs::MOD);
        if attrs.intersects(PageAttrs::REF)
            || (attrs.intersects(PageAttrs::MOD) && h.vnode_of(page).is_some())
        {
            continue;
        }

        probes::pageout_free(page, hand);
        let class = h.page_class(page);
        h.dispose_free(page);

        let stats = ctx.stats_ref();
        PageoutStats::inc(&stats.dfree);
        match class {
            PageClass::FileData => PageoutStats::inc(&stats.fsfree),
            PageClass::Executable => PageoutStats::inc(&stats.execfree),
            PageClass::Anon => PageoutStats::inc(&stats.anonfree),
        }
        h.zone_pageout_stat(zid, ZoneStat::Free);
        return CheckResult::Freed;
    }
}
