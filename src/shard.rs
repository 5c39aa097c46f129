//! The shard contract (spec §6 "Shard contract (consumed)").
//!
//! Concrete shard implementations (B-tree, ISAM, learned indexes, VP-tree,
//! tries...) are explicitly out of scope for the core (spec §1); this trait
//! is the seam a shard author implements against. Merge logic inside
//! `from_buffer_view`/`from_shards` is expected to route through
//! [`crate::merge::sorted_merge`] to stay consistent with the rest of the
//! core's tombstone-bound invariant.

use crate::buffer::BufferView;
use crate::record::{Record, Wrapped};

pub trait Shard<R: Record>: Send + Sync + Sized {
    /// Build a shard from a single buffer view, e.g. when flushing into L0.
    fn from_buffer_view(view: &BufferView<R>) -> Self;

    /// Build a shard from an ordered (newest-first) list of shards of the
    /// same type, e.g. when reconstructing one level into another.
    fn from_shards(shards: Vec<&Self>) -> Self;

    fn record_count(&self) -> usize;
    fn tombstone_count(&self) -> usize;
    fn memory_usage(&self) -> usize;

    /// Auxiliary structures (bloom filters, fence pointers, ...) not counted
    /// in `memory_usage`. Defaults to 0 for shards that keep none.
    fn aux_memory_usage(&self) -> usize {
        0
    }

    /// `is_filter` is set when the lookup is only being used to test for a
    /// dominating tombstone, letting an implementation skip attaching
    /// payload data it would otherwise need to copy out.
    fn point_lookup(&self, rec: &R, is_filter: bool) -> Option<Wrapped<R>>;

    /// In-place tagged delete (spec §3 "Tagged delete"). Only ever invoked
    /// under the tagging delete policy, which is only legal with the serial
    /// scheduler, so shards that don't support the policy can leave this as
    /// the default no-op. Implementations that do support it need interior
    /// mutability, since shards are otherwise shared read-only via `Arc`.
    fn tagged_delete(&self, _rec: &R) -> bool {
        false
    }
}

/// Additional contract for shards whose internal layout is sorted by record
/// order, letting the planner and query fan-out binary-search them.
pub trait SortedShard<R: Record>: Shard<R> {
    /// Index of the first record `>= key`.
    fn lower_bound(&self, key: &R) -> usize;
    /// Index of the first record `> key`.
    fn upper_bound(&self, key: &R) -> usize;
    fn record_at(&self, i: usize) -> Wrapped<R>;
}
