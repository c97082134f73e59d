//! Pageout_R - A modern Rust implementation of the SVR4/illumos pageout engine
//!
//! This crate provides the page replacement and pageout control plane of a
//! virtual-memory system: a self-tuning, multi-threaded two-handed clock
//! scanner, the scheduler that sets its page and CPU budgets from
//! instantaneous memory pressure, the per-page reclaim decision, a bounded
//! asynchronous writeback queue, and the deadman that refuses to hang on a
//! wedged filesystem.
//!
//! The engine is embedded, not freestanding: everything it needs from the
//! surrounding VM (the physical page table, the filesystem `put_page`
//! path, the slab and cage reclaimers, zone accounting, threads, and the
//! clock) is a capability behind the [`PageoutHost`] trait, so the whole
//! control plane runs unmodified against a mock host under test.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pageout_r::{PageoutCtx, PageoutHost, Tunables};
//!
//! fn bring_up(host: Arc<dyn PageoutHost>) -> Arc<PageoutCtx> {
//!     let tunables = Tunables::new();
//!     // Operator overrides patched here become sticky at boot.
//!     let ctx = PageoutCtx::new(host, tunables).expect("pageout sizing");
//!     ctx.start().expect("pageout threads");
//!     ctx
//! }
//! ```

pub mod checkpage;
pub mod ctx;
pub(crate) mod deadman;
pub mod error;
pub mod host;
pub(crate) mod probes;
pub mod push;
pub mod scanner;
pub mod schedpaging;
pub mod stats;
pub mod tunables;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkpage::{CheckResult, Hand};
pub use ctx::{PageoutCtx, MAX_PO_SHARE, MIN_PO_SHARE};
pub use error::PageoutError;
pub use host::{
    btop, ptob, PageAttrs, PageClass, PageId, PageoutHost, PushFlags, SyncFlags, VnodeId, ZoneId,
    ZoneStat, PAGESIZE,
};
pub use push::{PushQueue, PushRequest};
pub use schedpaging::SCHEDPAGING_HZ;
pub use stats::StatsSnapshot;
pub use tunables::{ThresholdSnapshot, Tunables, MAX_PSCAN_THREADS};

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
