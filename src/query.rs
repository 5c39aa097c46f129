//! Query contract (consumed) (spec §6 "Query contract").
//!
//! Concrete queries (point lookup, range scan, k-NN, ...) live outside the
//! core; this is the seam they implement. A query fans out over the current
//! epoch's buffer(s) and shards, each producing a `LocalQuery` via
//! `local_preproc`/`buffer_preproc`, is optionally refined by
//! `process_query_states` (e.g. sharing a distance bound across parallel
//! searchers), executed shard-by-shard/buffer-by-buffer, and finally
//! combined by `merge`.

use crate::buffer::BufferView;
use crate::record::{Record, Wrapped};
use crate::shard::Shard;

pub trait Query<R: Record, S: Shard<R>>: Send + Sync {
    type Parameters: Send + Sync;
    type LocalQuery: Send;

    /// Stop fanning out to further shards/buffers once a result is found.
    const EARLY_ABORT: bool = false;
    /// Skip the delete-filter pass over `merge`'s output (queries that are
    /// already delete-aware, e.g. count queries, can set this).
    const SKIP_DELETE_FILTER: bool = false;

    fn local_preproc(shard: &S, params: &Self::Parameters) -> Self::LocalQuery;
    fn buffer_preproc(view: &BufferView<R>, params: &Self::Parameters) -> Self::LocalQuery;

    /// Called once, given every fanned-out local query state, before any of
    /// them run; lets implementations share information across shards
    /// (e.g. a running top-k bound).
    fn process_query_states(_params: &Self::Parameters, _local_states: &mut [Self::LocalQuery]) {}

    fn query(shard: &S, local: &Self::LocalQuery, params: &Self::Parameters) -> Vec<Wrapped<R>>;
    fn buffer_query(view: &BufferView<R>, local: &Self::LocalQuery, params: &Self::Parameters) -> Vec<Wrapped<R>>;

    fn merge(results: Vec<Vec<Wrapped<R>>>, params: &Self::Parameters) -> Vec<R>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::tests::VecShard;

    /// A point-lookup query used to exercise the fan-out contract in tests.
    struct PointLookup;

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
            results
                .into_iter()
                .flatten()
                .find(|w| !w.is_tombstone())
                .map(|w| w.rec)
                .into_iter()
                .collect()
        }
    }

    #[test]
    fn early_abort_is_honoured_by_the_query_type() {
        assert!(PointLookup::EARLY_ABORT);
        assert!(!PointLookup::SKIP_DELETE_FILTER);
    }

    #[test]
    fn merge_drops_tombstones() {
        let results = vec![vec![Wrapped::tombstone(1, 0)]];
        assert_eq!(PointLookup::merge(results, &1), Vec::<i32>::new());
    }

    #[test]
    fn merge_keeps_live_records() {
        let results = vec![vec![Wrapped::live(1, 0)]];
        assert_eq!(PointLookup::merge(results, &1), vec![1]);
    }
}
