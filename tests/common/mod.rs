//! Shared shard/query fixtures for the integration scenarios (spec §8).
//! Only the public API is visible from here, so this is a second,
//! independent implementation of the same minimal sorted-merge-backed shard
//! that the unit tests build inside the crate.

use std::sync::Once;

use dynamic_extension::{BufferView, Cursor, Query, Shard, Wrapped};

static TRACING_INIT: Once = Once::new();

/// Installs an `env-filter`-driven subscriber once per test binary, so a
/// scenario can be rerun with `RUST_LOG=dynamic_extension=debug` to watch
/// epoch transitions and reconstruction tasks go by.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[derive(Debug)]
pub struct VecShard {
    records: Vec<Wrapped<i32>>,
    tombstones: usize,
}

impl Shard<i32> for VecShard {
    fn from_buffer_view(view: &BufferView<i32>) -> Self {
        let mut flat: Vec<Wrapped<i32>> = view.iter().collect();
        flat.sort_unstable();
        let run = dynamic_extension::sorted_merge(vec![Cursor::new(&flat)]);
        Self {
            tombstones: run.tombstone_count,
            records: run.records,
        }
    }

    fn from_shards(shards: Vec<&Self>) -> Self {
        let cursors: Vec<Cursor<i32>> = shards.iter().map(|s| Cursor::new(&s.records)).collect();
        let run = dynamic_extension::sorted_merge(cursors);
        Self {
            tombstones: run.tombstone_count,
            records: run.records,
        }
    }

    fn record_count(&self) -> usize {
        self.records.len()
    }

    fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    fn memory_usage(&self) -> usize {
        self.records.len() * std::mem::size_of::<Wrapped<i32>>()
    }

    fn point_lookup(&self, rec: &i32, _is_filter: bool) -> Option<Wrapped<i32>> {
        self.records.iter().rev().find(|w| &w.rec == rec).copied()
    }
}

/// Looks a single key up across every shard/buffer fanned out to.
pub struct PointLookup;

impl Query<i32, VecShard> for PointLookup {
    type Parameters = i32;
    type LocalQuery = ();

    const EARLY_ABORT: bool = true;

    fn local_preproc(_shard: &VecShard, _params: &i32) {}
    fn buffer_preproc(_view: &BufferView<i32>, _params: &i32) {}

    fn query(shard: &VecShard, _local: &(), params: &i32) -> Vec<Wrapped<i32>> {
        shard.point_lookup(params, false).into_iter().collect()
    }

    fn buffer_query(view: &BufferView<i32>, _local: &(), params: &i32) -> Vec<Wrapped<i32>> {
        view.iter().filter(|w| w.rec == *params).collect()
    }

    fn merge(results: Vec<Vec<Wrapped<i32>>>, _params: &i32) -> Vec<i32> {
        results.into_iter().flatten().map(|w| w.rec).collect()
    }
}

/// Returns every live record whose key falls in `[lo, hi]`, used to check
/// the structure's overall content irrespective of which buffer/shard it
/// landed in.
pub struct RangeScan;

impl Query<i32, VecShard> for RangeScan {
    type Parameters = (i32, i32);
    type LocalQuery = ();

    fn local_preproc(_shard: &VecShard, _params: &(i32, i32)) {}
    fn buffer_preproc(_view: &BufferView<i32>, _params: &(i32, i32)) {}

    fn query(shard: &VecShard, _local: &(), params: &(i32, i32)) -> Vec<Wrapped<i32>> {
        let (lo, hi) = *params;
        shard
            .records
            .iter()
            .filter(|w| w.rec >= lo && w.rec <= hi)
            .copied()
            .collect()
    }

    fn buffer_query(view: &BufferView<i32>, _local: &(), params: &(i32, i32)) -> Vec<Wrapped<i32>> {
        let (lo, hi) = *params;
        view.iter().filter(|w| w.rec >= lo && w.rec <= hi).collect()
    }

    fn merge(results: Vec<Vec<Wrapped<i32>>>, _params: &(i32, i32)) -> Vec<i32> {
        let mut out: Vec<i32> = results.into_iter().flatten().map(|w| w.rec).collect();
        out.sort_unstable();
        out
    }
}
