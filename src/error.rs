//! Error taxonomy for the dynamic extension core (spec §7).
//!
//! Most failure modes in the core are either recovered silently (capacity
//! exhaustion during `append`, handled by looping and scheduling a merge),
//! reported through a plain `bool`/`0|1` return as spec §6 specifies for
//! `erase`, or are fatal invariant violations that `panic!`/`assert!` on the
//! spot, because there is no consistent state to recover into.
//! Reconstruction (`run_merge`/`apply_task`) is infallible by construction:
//! a shard author's `from_shards`/`from_buffer_view` never returns a
//! `Result`. Only the handful of genuinely recoverable, user-visible
//! outcomes get a variant here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamicExtensionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("query worker panicked before producing a result")]
    QueryWorkerPanicked,
}

pub type Result<T> = std::result::Result<T, DynamicExtensionError>;
