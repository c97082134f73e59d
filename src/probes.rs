//! Probe Points
//!
//! Stable-name trace points on the pageout hot paths, in the spirit of the
//! SDT probes carried by the original daemon. Emitted through `log` at
//! trace level under the `"pageout"` target so a host can enable them
//! selectively; when the level is off they compile down to a branch.

use log::trace;

use crate::checkpage::Hand;
use crate::host::PageId;

const TARGET: &str = "pageout";

pub(crate) fn schedpage_wake_low() {
    trace!(target: TARGET, "schedpage_wake_low");
}

pub(crate) fn schedpage_wake_zone() {
    trace!(target: TARGET, "schedpage_wake_zone");
}

pub(crate) fn pageout_start(limit: u64, inst: usize, back: PageId, front: PageId) {
    trace!(
        target: TARGET,
        "pageout_start limit={} inst={} back={} front={}",
        limit, inst, back.0, front.0
    );
}

pub(crate) fn pageout_loop(pcount: u64, inst: usize) {
    trace!(target: TARGET, "pageout_loop pcount={} inst={}", pcount, inst);
}

pub(crate) fn pageout_loop_end(nscan: u64, pcount: u64, inst: usize) {
    trace!(
        target: TARGET,
        "pageout_loop_end nscan={} pcount={} inst={}",
        nscan, pcount, inst
    );
}

pub(crate) fn pageout_timeout(inst: usize) {
    trace!(target: TARGET, "pageout_timeout inst={}", inst);
}

pub(crate) fn pageout_wrap_front(inst: usize) {
    trace!(target: TARGET, "pageout_wrap_front inst={}", inst);
}

pub(crate) fn pageout_isref(page: PageId, hand: Hand) {
    trace!(target: TARGET, "pageout_isref page={} hand={:?}", page.0, hand);
}

pub(crate) fn pageout_free(page: PageId, hand: Hand) {
    trace!(target: TARGET, "pageout_free page={} hand={:?}", page.0, hand);
}

pub(crate) fn pageout_push(vnode: u64, offset: u64) {
    trace!(target: TARGET, "pageout_push vnode={} offset={}", vnode, offset);
}
