//! Deterministic mock host for unit tests: injected memory signals, an
//! injected clock, and a fully scripted page array.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::host::{
    PageAttrs, PageClass, PageId, PageoutHost, SyncFlags, VnodeId, ZoneId, ZoneStat,
};
use crate::push::PushRequest;

/// One scripted page
#[derive(Debug, Clone)]
pub struct MockPage {
    pub kernel: bool,
    pub free: bool,
    /// Exclusive lock held by someone other than the engine
    pub locked: bool,
    pub lock_count: u32,
    pub cow_count: u32,
    pub share_count: u64,
    pub size_class: u32,
    pub demote_ok: bool,
    pub zone: Option<ZoneId>,
    pub vnode: Option<VnodeId>,
    pub offset: u64,
    pub attrs: PageAttrs,
    pub class: PageClass,
    /// Exclusive lock held by the engine
    pub excl: bool,
    pub unloaded: bool,
    pub disposed: bool,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            kernel: false,
            free: false,
            locked: false,
            lock_count: 0,
            cow_count: 0,
            share_count: 0,
            size_class: 0,
            demote_ok: true,
            zone: None,
            vnode: None,
            offset: 0,
            attrs: PageAttrs::empty(),
            class: PageClass::Anon,
            excl: false,
            unloaded: false,
            disposed: false,
        }
    }
}

/// Scriptable host; every signal is a settable cell and every callback
/// increments a counter.
pub struct MockHost {
    total_pages: AtomicU64,
    freemem: AtomicU64,
    needfree: AtomicU64,
    deficit: AtomicU64,
    kmem_reapahead: AtomicU64,
    kmem_avail: AtomicU64,
    kcage_on: AtomicBool,
    kcage_freemem: AtomicU64,
    kcage_desfree: AtomicU64,
    kcage_needfree: AtomicU64,
    zones_over_cap: AtomicU32,
    over_zones: Mutex<Vec<ZoneId>>,

    now: AtomicU64,
    clock_step: u64,

    pages: Mutex<Vec<MockPage>>,

    kmem_reaps: AtomicU64,
    seg_preaps: AtomicU64,
    cageout_wakeups: AtomicU64,
    lock_failures: AtomicU64,
    vnode_holds: AtomicU64,
    vnode_releases: AtomicU64,
    zone_dirty: AtomicU64,
    zone_free: AtomicU64,
    put_pages: Mutex<Vec<PushRequest>>,
    put_page_fails: AtomicBool,
    spawned: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn builder() -> MockHostBuilder {
        MockHostBuilder::default()
    }

    // -- runtime script controls -----------------------------------------

    pub fn set_freemem(&self, v: u64) {
        self.freemem.store(v, Ordering::Relaxed);
    }

    pub fn set_zones_over_cap(&self, n: u32) {
        self.zones_over_cap.store(n, Ordering::Relaxed);
    }

    pub fn set_over_zone(&self, zone: ZoneId) {
        self.over_zones.lock().unwrap().push(zone);
        self.zones_over_cap.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail_put_pages(&self) {
        self.put_page_fails.store(true, Ordering::Relaxed);
    }

    pub fn page(&self, idx: usize) -> MockPage {
        self.pages.lock().unwrap()[idx].clone()
    }

    pub fn page_mut(&self, idx: usize, f: impl FnOnce(&mut MockPage)) {
        f(&mut self.pages.lock().unwrap()[idx]);
    }

    // -- observation -----------------------------------------------------

    pub fn kmem_reaps(&self) -> u64 {
        self.kmem_reaps.load(Ordering::Relaxed)
    }

    pub fn seg_preaps(&self) -> u64 {
        self.seg_preaps.load(Ordering::Relaxed)
    }

    pub fn cageout_wakeups(&self) -> u64 {
        self.cageout_wakeups.load(Ordering::Relaxed)
    }

    pub fn lock_failures(&self) -> u64 {
        self.lock_failures.load(Ordering::Relaxed)
    }

    pub fn vnode_holds(&self) -> u64 {
        self.vnode_holds.load(Ordering::Relaxed)
    }

    pub fn vnode_releases(&self) -> u64 {
        self.vnode_releases.load(Ordering::Relaxed)
    }

    pub fn zone_dirty_stats(&self) -> u64 {
        self.zone_dirty.load(Ordering::Relaxed)
    }

    pub fn zone_free_stats(&self) -> u64 {
        self.zone_free.load(Ordering::Relaxed)
    }

    pub fn put_page_log(&self) -> Vec<PushRequest> {
        self.put_pages.lock().unwrap().clone()
    }

    pub fn spawned_threads(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    fn idx(&self, page: PageId) -> usize {
        page.0 as usize
    }
}

impl PageoutHost for MockHost {
    fn freemem(&self) -> u64 {
        self.freemem.load(Ordering::Relaxed)
    }

    fn needfree(&self) -> u64 {
        self.needfree.load(Ordering::Relaxed)
    }

    fn deficit(&self) -> u64 {
        self.deficit.load(Ordering::Relaxed)
    }

    fn total_pages(&self) -> u64 {
        self.total_pages.load(Ordering::Relaxed)
    }

    fn kmem_reapahead(&self) -> u64 {
        self.kmem_reapahead.load(Ordering::Relaxed)
    }

    fn kmem_avail(&self) -> u64 {
        self.kmem_avail.load(Ordering::Relaxed)
    }

    fn kmem_reap(&self) {
        self.kmem_reaps.fetch_add(1, Ordering::Relaxed);
    }

    fn seg_preap(&self) {
        self.seg_preaps.fetch_add(1, Ordering::Relaxed);
    }

    fn kcage_on(&self) -> bool {
        self.kcage_on.load(Ordering::Relaxed)
    }

    fn kcage_freemem(&self) -> u64 {
        self.kcage_freemem.load(Ordering::Relaxed)
    }

    fn kcage_desfree(&self) -> u64 {
        self.kcage_desfree.load(Ordering::Relaxed)
    }

    fn kcage_needfree(&self) -> u64 {
        self.kcage_needfree.load(Ordering::Relaxed)
    }

    fn kcage_cageout_wakeup(&self) {
        self.cageout_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    fn zones_over_cap(&self) -> u32 {
        self.zones_over_cap.load(Ordering::Relaxed)
    }

    fn zone_over_cap(&self, zone: ZoneId) -> bool {
        self.over_zones.lock().unwrap().contains(&zone)
    }

    fn zone_pageout_stat(&self, _zone: Option<ZoneId>, stat: ZoneStat) {
        match stat {
            ZoneStat::Dirty => self.zone_dirty.fetch_add(1, Ordering::Relaxed),
            ZoneStat::Free => self.zone_free.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn now_ns(&self) -> u64 {
        self.now.fetch_add(self.clock_step, Ordering::Relaxed) + self.clock_step
    }

    fn page_first(&self) -> PageId {
        PageId(0)
    }

    fn page_next(&self, page: PageId) -> PageId {
        let n = self.pages.lock().unwrap().len() as u64;
        PageId((page.0 + 1) % n)
    }

    fn page_nextn(&self, page: PageId, steps: u64) -> PageId {
        let n = self.pages.lock().unwrap().len() as u64;
        PageId((page.0 + steps) % n)
    }

    fn is_kernel(&self, page: PageId) -> bool {
        self.page(self.idx(page)).kernel
    }

    fn is_locked(&self, page: PageId) -> bool {
        self.page(self.idx(page)).locked
    }

    fn is_free(&self, page: PageId) -> bool {
        self.page(self.idx(page)).free
    }

    fn lock_count(&self, page: PageId) -> u32 {
        self.page(self.idx(page)).lock_count
    }

    fn cow_count(&self, page: PageId) -> u32 {
        self.page(self.idx(page)).cow_count
    }

    fn share_count_exceeds(&self, page: PageId, threshold: u64) -> bool {
        self.page(self.idx(page)).share_count > threshold
    }

    fn size_class(&self, page: PageId) -> u32 {
        self.page(self.idx(page)).size_class
    }

    fn zone_of(&self, page: PageId) -> Option<ZoneId> {
        self.page(self.idx(page)).zone
    }

    fn vnode_of(&self, page: PageId) -> Option<VnodeId> {
        self.page(self.idx(page)).vnode
    }

    fn offset_of(&self, page: PageId) -> u64 {
        self.page(self.idx(page)).offset
    }

    fn page_class(&self, page: PageId) -> PageClass {
        self.page(self.idx(page)).class
    }

    fn try_lock_exclusive(&self, page: PageId) -> bool {
        let idx = self.idx(page);
        let mut pages = self.pages.lock().unwrap();
        let p = &mut pages[idx];
        if p.locked || p.excl {
            self.lock_failures.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            p.excl = true;
            true
        }
    }

    fn unlock(&self, page: PageId) {
        self.page_mut(self.idx(page), |p| p.excl = false);
    }

    fn sync_attrs(&self, page: PageId, how: SyncFlags) -> PageAttrs {
        let idx = self.idx(page);
        let mut pages = self.pages.lock().unwrap();
        let p = &mut pages[idx];
        let attrs = p.attrs;
        if how.contains(SyncFlags::ZERO_RM) {
            p.attrs = PageAttrs::empty();
        }
        attrs
    }

    fn get_attrs(&self, page: PageId, mask: PageAttrs) -> PageAttrs {
        self.page(self.idx(page)).attrs & mask
    }

    fn clear_ref(&self, page: PageId) {
        self.page_mut(self.idx(page), |p| p.attrs.remove(PageAttrs::REF));
    }

    fn try_demote(&self, page: PageId) -> bool {
        let idx = self.idx(page);
        let mut pages = self.pages.lock().unwrap();
        let p = &mut pages[idx];
        if p.demote_ok {
            p.size_class = 0;
            true
        } else {
            false
        }
    }

    fn unload_mappings(&self, page: PageId) {
        self.page_mut(self.idx(page), |p| p.unloaded = true);
    }

    fn dispose_free(&self, page: PageId) {
        self.page_mut(self.idx(page), |p| {
            p.disposed = true;
            p.free = true;
            p.excl = false;
        });
    }

    fn hold_vnode(&self, _vnode: VnodeId) {
        self.vnode_holds.fetch_add(1, Ordering::Relaxed);
    }

    fn release_vnode(&self, _vnode: VnodeId) {
        self.vnode_releases.fetch_add(1, Ordering::Relaxed);
    }

    fn put_page(&self, request: &PushRequest) -> bool {
        self.put_pages.lock().unwrap().push(*request);
        !self.put_page_fails.load(Ordering::Relaxed)
    }

    fn spawn_thread(&self, name: &str, _body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        // Record the request and drop the body; tests drive the tick
        // functions directly for determinism.
        self.spawned.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Builder for [`MockHost`]
#[derive(Default)]
pub struct MockHostBuilder {
    total_pages: Option<u64>,
    npages: usize,
    freemem: u64,
    needfree: u64,
    deficit: u64,
    kmem_reapahead: u64,
    kmem_avail: u64,
    kcage: (bool, u64, u64, u64),
    zones_over_cap: u32,
    clock_step: u64,
}

impl MockHostBuilder {
    /// Reported pageable page total (defaults to the scripted array size)
    pub fn total_pages(mut self, n: u64) -> Self {
        self.total_pages = Some(n);
        self
    }

    /// Size of the scripted page array, default-eligible pages
    pub fn pages(mut self, n: usize) -> Self {
        self.npages = n;
        self
    }

    pub fn freemem(mut self, v: u64) -> Self {
        self.freemem = v;
        self
    }

    pub fn needfree(mut self, v: u64) -> Self {
        self.needfree = v;
        self
    }

    pub fn deficit(mut self, v: u64) -> Self {
        self.deficit = v;
        self
    }

    pub fn kmem_reapahead(mut self, v: u64) -> Self {
        self.kmem_reapahead = v;
        self
    }

    pub fn kmem_avail(mut self, v: u64) -> Self {
        self.kmem_avail = v;
        self
    }

    pub fn kcage(mut self, on: bool, freemem: u64, desfree: u64, needfree: u64) -> Self {
        self.kcage = (on, freemem, desfree, needfree);
        self
    }

    pub fn zones_over_cap(mut self, n: u32) -> Self {
        self.zones_over_cap = n;
        self
    }

    /// Nanoseconds the injected clock advances per reading
    pub fn clock_step(mut self, step: u64) -> Self {
        self.clock_step = step;
        self
    }

    pub fn build(self) -> Arc<MockHost> {
        let npages = self.npages.max(1);
        let pages = vec![MockPage::default(); npages];
        Arc::new(MockHost {
            total_pages: AtomicU64::new(self.total_pages.unwrap_or(npages as u64)),
            freemem: AtomicU64::new(self.freemem),
            needfree: AtomicU64::new(self.needfree),
            deficit: AtomicU64::new(self.deficit),
            kmem_reapahead: AtomicU64::new(self.kmem_reapahead),
            kmem_avail: AtomicU64::new(self.kmem_avail),
            kcage_on: AtomicBool::new(self.kcage.0),
            kcage_freemem: AtomicU64::new(self.kcage.1),
            kcage_desfree: AtomicU64::new(self.kcage.2),
            kcage_needfree: AtomicU64::new(self.kcage.3),
            zones_over_cap: AtomicU32::new(self.zones_over_cap),
            over_zones: Mutex::new(Vec::new()),
            now: AtomicU64::new(0),
            clock_step: self.clock_step,
            pages: Mutex::new(pages),
            kmem_reaps: AtomicU64::new(0),
            seg_preaps: AtomicU64::new(0),
            cageout_wakeups: AtomicU64::new(0),
            lock_failures: AtomicU64::new(0),
            vnode_holds: AtomicU64::new(0),
            vnode_releases: AtomicU64::new(0),
            zone_dirty: AtomicU64::new(0),
            zone_free: AtomicU64::new(0),
            put_pages: Mutex::new(Vec::new()),
            put_page_fails: AtomicBool::new(false),
            spawned: Mutex::new(Vec::new()),
        })
    }
}
