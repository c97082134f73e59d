//! Asynchronous Writeback Queue
//!
//! Based on the `pageout()` master loop and `queue_io_request()` of the
//! SVR4/illumos pageout subsystem.
//!
//! A fixed pool of request slots is carved out at init and threaded onto a
//! freelist. The per-page decider queues dirty pages here without blocking;
//! a single master thread drains the pending list to the host's `put_page`,
//! pacing itself to `maxpgio` per scheduling tick. The master records an
//! in-flight marker and a monotonic completion count so the deadman can
//! tell a slow push from a stuck one.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::host::{PageoutHost, PushFlags, VnodeId, PAGESIZE};
use crate::probes;
use crate::schedpaging::SCHEDPAGING_HZ;
use crate::tunables::Tunables;

/// End-of-list marker for the intrusive slot lists
const NIL: u32 = u32::MAX;

// ============================================================================
// Requests and Slots
// ============================================================================

/// One page of writeback handed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushRequest {
    /// Vnode backing the page; held by the decider, released by the master
    pub vnode: VnodeId,
    /// Byte offset of the page within the vnode
    pub offset: u64,
    /// Always one page
    pub len: u64,
    /// Always asynchronous, free-when-clean
    pub flags: PushFlags,
}

/// Pool slot, linked into either the freelist or the pending list
#[derive(Debug, Clone, Copy)]
struct Slot {
    vnode: VnodeId,
    offset: u64,
    next: u32,
}

#[derive(Debug)]
struct PushState {
    slots: Vec<Slot>,
    free_head: u32,
    free_len: usize,
    pending_head: u32,
    pending_len: usize,
    /// Successful pushes since the pacing counter was last reset
    pushes: u64,
    /// A request has been handed to `put_page` and has not come back
    in_flight: bool,
    /// Monotonic count of completed pushes, successful or not
    push_count: u64,
}

// ============================================================================
// Push Queue
// ============================================================================

/// Bounded writeback request queue shared by the deciders and the master
#[derive(Debug)]
pub struct PushQueue {
    state: Mutex<PushState>,
    cv: Condvar,
}

impl PushQueue {
    /// Carve `nslots` request slots and thread them all onto the freelist
    pub fn new(nslots: usize) -> Self {
        let mut slots = Vec::with_capacity(nslots);
        for i in 0..nslots {
            let next = if i + 1 < nslots { (i + 1) as u32 } else { NIL };
            slots.push(Slot {
                vnode: VnodeId(0),
                offset: 0,
                next,
            });
        }
        let free_head = if nslots > 0 { 0 } else { NIL };
        Self {
            state: Mutex::new(PushState {
                slots,
                free_head,
                free_len: nslots,
                pending_head: NIL,
                pending_len: 0,
                pushes: 0,
                in_flight: false,
                push_count: 0,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PushState> {
        self.state.lock().unwrap()
    }

    /// Queue one dirty page for asynchronous writeback.
    ///
    /// The caller must already hold the vnode; on `false` (no slot free)
    /// the caller keeps ownership of that hold and must release it.
    pub(crate) fn queue_io_request(&self, vnode: VnodeId, offset: u64) -> bool {
        let mut st = self.lock();

        let idx = st.free_head;
        if idx == NIL {
            return false;
        }
        st.free_head = st.slots[idx as usize].next;
        st.free_len -= 1;

        let pending_head = st.pending_head;
        {
            let slot = &mut st.slots[idx as usize];
            slot.vnode = vnode;
            slot.offset = offset;
            slot.next = pending_head;
        }
        st.pending_head = idx;
        st.pending_len += 1;

        // The pool just ran dry; get the master moving even mid-tick.
        if st.free_head == NIL {
            self.cv.notify_one();
        }
        true
    }

    /// Block until a request may be dispatched, honoring the per-tick
    /// pacing budget. Marks the push in flight for the deadman.
    pub(crate) fn wait_for_work(&self, tunables: &Tunables) -> (u32, PushRequest) {
        let mut st = self.lock();
        loop {
            let max_pushes = tunables.maxpgio() / SCHEDPAGING_HZ;
            if st.pending_head != NIL && st.pushes <= max_pushes {
                break;
            }
            st = self.cv.wait(st).unwrap();
            st.pushes = 0;
        }

        let idx = st.pending_head;
        let slot = st.slots[idx as usize];
        st.pending_head = slot.next;
        st.in_flight = true;
        (
            idx,
            PushRequest {
                vnode: slot.vnode,
                offset: slot.offset,
                len: PAGESIZE,
                flags: PushFlags::ASYNC | PushFlags::FREE,
            },
        )
    }

    /// Retire a dispatched request: account the push, clear the in-flight
    /// marker, and return the slot to the freelist.
    pub(crate) fn complete(&self, idx: u32, pushed: bool) {
        let mut st = self.lock();
        if pushed {
            st.pushes += 1;
        }
        st.in_flight = false;
        st.push_count += 1;
        let free_head = st.free_head;
        st.slots[idx as usize].next = free_head;
        st.free_head = idx;
        st.free_len += 1;
        st.pending_len -= 1;
    }

    /// The master: drain pending requests to the host forever.
    pub(crate) fn master_run(&self, host: &dyn PageoutHost, tunables: &Tunables) {
        loop {
            let (idx, req) = self.wait_for_work(tunables);
            probes::pageout_push(req.vnode.0, req.offset);
            let pushed = host.put_page(&req);
            host.release_vnode(req.vnode);
            self.complete(idx, pushed);
        }
    }

    /// Scheduler tick on a calm system: nudge the master so it re-reads
    /// its pacing budget (waking resets the per-tick push count).
    pub(crate) fn tick(&self) {
        let _st = self.lock();
        self.cv.notify_one();
    }

    /// Deadman view: whether a push is in flight, and the completion count
    pub(crate) fn deadman_view(&self) -> (bool, u64) {
        let st = self.lock();
        (st.in_flight, st.push_count)
    }

    /// Current (free, pending, in-flight) depths
    pub fn depths(&self) -> (usize, usize, bool) {
        let st = self.lock();
        (st.free_len, st.pending_len, st.in_flight)
    }
}
