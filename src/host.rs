//! Host VM Integration - Capability Surface
//!
//! Based on the page-level interfaces of SVR4/illumos vm (page.h, pvn.h,
//! hat.h) as consumed by the pageout daemon.
//!
//! The pageout engine never touches a page table, a filesystem, or the
//! wall clock directly. Everything it needs from the surrounding virtual
//! memory system is expressed here as one capability trait, passed into
//! `PageoutCtx::new`. Production hosts wire these methods to the real VM;
//! tests substitute a mock with injected memory signals and an injected
//! clock.

use std::io;

use bitflags::bitflags;

use crate::push::PushRequest;

// ============================================================================
// Constants
// ============================================================================

/// Page size in bytes (4KB on most platforms)
pub const PAGESIZE: u64 = 4096;

/// Page shift (log2 of PAGESIZE)
pub const PAGESHIFT: u32 = 12;

/// Convert a byte count to a page count, rounding down
pub const fn btop(bytes: u64) -> u64 {
    bytes >> PAGESHIFT
}

/// Convert a page count to a byte count
pub const fn ptob(pages: u64) -> u64 {
    pages << PAGESHIFT
}

// ============================================================================
// Identifiers
// ============================================================================

/// Position in the host's circular physical page array.
///
/// Opaque to the engine; only the host interprets it. The engine walks the
/// array with `page_first`/`page_next`/`page_nextn` and must not assume a
/// handle stays meaningful across a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub u64);

/// Identity of the vnode backing a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VnodeId(pub u64);

/// Zone a page is accounted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneId(pub u32);

// ============================================================================
// Page Attributes
// ============================================================================

bitflags! {
    /// Hardware-maintained per-page attribute bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageAttrs: u32 {
        /// Page was referenced since the bit was last cleared
        const REF = 0x1;
        /// Page was modified since the bit was last cleared
        const MOD = 0x2;
    }
}

bitflags! {
    /// Modes for synchronizing attribute bits out of the mapping layer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        /// Atomically collect and clear ref+mod while syncing
        const ZERO_RM = 0x1;
        /// Collect without clearing
        const DONT_ZERO = 0x2;
        /// Abort the walk as soon as a set ref bit is seen
        const STOP_ON_REF = 0x4;
        /// Abort the walk once the share count passes the caller's threshold
        const STOP_ON_SHARED = 0x8;
    }
}

bitflags! {
    /// Flags carried by an asynchronous writeback request
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PushFlags: u32 {
        /// Do not wait for the I/O
        const ASYNC = 0x1;
        /// Free the page once it is clean
        const FREE = 0x2;
    }
}

/// What a reclaimed page was holding, for the freed-page counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// Regular file data
    FileData,
    /// Executable text or library
    Executable,
    /// Anonymous (swap-backed) memory
    Anon,
}

/// Per-zone pageout accounting operations forwarded to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStat {
    /// A dirty page belonging to the zone was queued for writeback
    Dirty,
    /// A clean page belonging to the zone was freed directly
    Free,
}

// ============================================================================
// Host Capability Trait
// ============================================================================

/// Everything the pageout engine requires of its host.
///
/// The engine reads the memory signals as unlocked snapshots once or more
/// per cycle; the host does not need to freeze them. Page operations follow
/// the usual exclusive-lock protocol: `try_lock_exclusive` gates the
/// mutating calls, and `dispose_free` consumes the lock.
pub trait PageoutHost: Send + Sync {
    // ------------------------------------------------------------------
    // Memory pressure signals
    // ------------------------------------------------------------------

    /// Pages currently on the free list
    fn freemem(&self) -> u64;

    /// Pages that waiting allocations are short by
    fn needfree(&self) -> u64;

    /// Anticipated short-term demand from recent allocation failures
    fn deficit(&self) -> u64;

    /// Total pageable pages under management
    fn total_pages(&self) -> u64;

    // ------------------------------------------------------------------
    // Kernel memory and the other reclaimers
    // ------------------------------------------------------------------

    /// Extra headroom below which the slab reaper should run early
    fn kmem_reapahead(&self) -> u64;

    /// Pages the kernel allocator could release on demand
    fn kmem_avail(&self) -> u64;

    /// Reap idle slab/arena caches
    fn kmem_reap(&self);

    /// Pre-reap inactive segment structures
    fn seg_preap(&self);

    /// Whether the kernel cage is active
    fn kcage_on(&self) -> bool;

    /// Free pages inside the cage
    fn kcage_freemem(&self) -> u64;

    /// Cage free-page target
    fn kcage_desfree(&self) -> u64;

    /// Pages the cage is currently short by
    fn kcage_needfree(&self) -> u64;

    /// Wake the cage reclamation thread
    fn kcage_cageout_wakeup(&self);

    // ------------------------------------------------------------------
    // Zone accounting
    // ------------------------------------------------------------------

    /// Number of zones currently over their physical memory cap
    fn zones_over_cap(&self) -> u32;

    /// Whether one specific zone is over its cap
    fn zone_over_cap(&self, zone: ZoneId) -> bool;

    /// Record a pageout event against a zone (`None` means no zone filter
    /// was in effect for this reclaim)
    fn zone_pageout_stat(&self, zone: Option<ZoneId>, stat: ZoneStat);

    // ------------------------------------------------------------------
    // Wall clock
    // ------------------------------------------------------------------

    /// Monotonic time in nanoseconds
    fn now_ns(&self) -> u64;

    // ------------------------------------------------------------------
    // Circular page array
    // ------------------------------------------------------------------

    /// First page of the circular array
    fn page_first(&self) -> PageId;

    /// Successor of `page`, wrapping at the end of the array
    fn page_next(&self, page: PageId) -> PageId;

    /// `n`-th successor of `page`, wrapping
    fn page_nextn(&self, page: PageId, n: u64) -> PageId;

    // ------------------------------------------------------------------
    // Page predicates (unlocked peeks)
    // ------------------------------------------------------------------

    /// Page belongs to the kernel and is never reclaimed
    fn is_kernel(&self, page: PageId) -> bool;

    /// Page is exclusively locked by someone else
    fn is_locked(&self, page: PageId) -> bool;

    /// Page is already on the free list
    fn is_free(&self, page: PageId) -> bool;

    /// I/O or wiring lock count
    fn lock_count(&self, page: PageId) -> u32;

    /// Copy-on-write reservation count
    fn cow_count(&self, page: PageId) -> u32;

    /// Whether more than `threshold` address spaces map the page
    fn share_count_exceeds(&self, page: PageId, threshold: u64) -> bool;

    /// Large-page size class; 0 for a base page
    fn size_class(&self, page: PageId) -> u32;

    /// Zone the page is accounted against, if any
    fn zone_of(&self, page: PageId) -> Option<ZoneId>;

    /// Vnode backing the page, if any
    fn vnode_of(&self, page: PageId) -> Option<VnodeId>;

    /// Byte offset of the page within its vnode
    fn offset_of(&self, page: PageId) -> u64;

    /// Classification used for the freed-page counters
    fn page_class(&self, page: PageId) -> PageClass;

    // ------------------------------------------------------------------
    // Page operations
    // ------------------------------------------------------------------

    /// Try to take the page's exclusive lock without blocking
    fn try_lock_exclusive(&self, page: PageId) -> bool;

    /// Drop the exclusive lock
    fn unlock(&self, page: PageId);

    /// Collect (and per `how`, clear) the attribute bits from every mapping
    fn sync_attrs(&self, page: PageId, how: SyncFlags) -> PageAttrs;

    /// Read the cached attribute bits under `mask` without a mapping walk
    fn get_attrs(&self, page: PageId, mask: PageAttrs) -> PageAttrs;

    /// Clear the reference bit
    fn clear_ref(&self, page: PageId);

    /// Try to demote a large page to base pages; false if it cannot be split
    fn try_demote(&self, page: PageId) -> bool;

    /// Forcibly unload every mapping of the page
    fn unload_mappings(&self, page: PageId);

    /// Release the page to the free list, consuming the exclusive lock
    fn dispose_free(&self, page: PageId);

    // ------------------------------------------------------------------
    // Vnodes and writeback
    // ------------------------------------------------------------------

    /// Take a hold on a vnode so it outlives a queued request
    fn hold_vnode(&self, vnode: VnodeId);

    /// Drop a vnode hold
    fn release_vnode(&self, vnode: VnodeId);

    /// Write one page out through the filesystem; true on success.
    ///
    /// Called from the writeback master only, with no page lock held. The
    /// host applies its own credentials.
    fn put_page(&self, request: &PushRequest) -> bool;

    // ------------------------------------------------------------------
    // Threads and panic
    // ------------------------------------------------------------------

    /// Spawn a detached daemon thread. The engine never joins these.
    fn spawn_thread(
        &self,
        name: &str,
        body: Box<dyn FnOnce() + Send + 'static>,
    ) -> io::Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map(|_| ())
    }

    /// Whether the system is already going down; the deadman stands aside
    fn is_panicking(&self) -> bool {
        false
    }

    /// Bring the system down with a diagnostic. Must not return.
    fn panic(&self, message: &str) -> ! {
        panic!("{}", message);
    }
}
