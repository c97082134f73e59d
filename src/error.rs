//! Unified error types for pageout_r using thiserror

use thiserror::Error;

/// Errors surfaced while constructing or starting the pageout engine.
///
/// Steady-state page-level outcomes are not errors; they are the
/// `CheckResult` modes in `checkpage`.
#[derive(Error, Debug)]
pub enum PageoutError {
    #[error("too few pageable pages to run a clock: {0}")]
    TooFewPages(u64),

    #[error("writeback slot pool size must be nonzero")]
    EmptyPushPool,

    #[error("failed to spawn {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
