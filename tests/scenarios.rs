//! End-to-end scenarios (spec §8).

mod common;

use common::{PointLookup, RangeScan, VecShard};
use dynamic_extension::{DeletePolicy, DynamicExtension, ExtensionOptions, LayoutPolicy, SchedulerKind};

#[test]
fn s1_round_trip_insert_and_query() {
    common::init_tracing();
    let opts = ExtensionOptions::new(4, 2, 2)
        .with_layout_policy(LayoutPolicy::Leveling)
        .with_max_delete_prop(0.5);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();

    for k in [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5] {
        ext.insert(k);
    }

    let mut result = ext.query::<RangeScan>((2, 5)).get().unwrap();
    result.sort_unstable();
    assert_eq!(result, vec![2, 3, 3, 4, 5, 5, 5]);
}

#[test]
fn s2_tombstone_cancellation() {
    common::init_tracing();
    let opts = ExtensionOptions::new(2, 1, 2).with_layout_policy(LayoutPolicy::Tiering);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();

    for k in [1, 2, 3, 4] {
        ext.insert(k);
    }
    ext.erase(2);

    let mut result = ext.query::<RangeScan>((1, 4)).get().unwrap();
    result.sort_unstable();
    assert_eq!(result, vec![1, 3, 4]);
}

#[test]
fn s3_tagged_delete_is_serial_only() {
    common::init_tracing();
    let opts = ExtensionOptions::new(4, 2, 2)
        .with_delete_policy(DeletePolicy::Tagging)
        .with_scheduler(SchedulerKind::Serial);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();

    for k in 1..=10 {
        ext.insert(k);
    }
    assert!(ext.erase(5));

    let mut result = ext.query::<RangeScan>((1, 10)).get().unwrap();
    result.sort_unstable();
    assert_eq!(result, vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);
    assert_eq!(result.len(), 9);
}

#[test]
fn s4_reconstruction_does_not_lose_data() {
    common::init_tracing();
    let opts = ExtensionOptions::new(64, 32, 4);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();

    for k in 0..10_000 {
        ext.insert(k);
    }
    for _ in 0..200 {
        if ext.height() >= 2 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert!(ext.height() >= 2);
    assert_eq!(ext.record_count(), 10_000);

    let result = ext.query::<RangeScan>((i32::MIN, i32::MAX)).get().unwrap();
    assert_eq!(result.len(), 10_000);
}

#[test]
fn s5_tombstone_bound_triggers_compaction() {
    common::init_tracing();
    let opts = ExtensionOptions::new(32, 16, 2).with_max_delete_prop(0.3);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();

    for k in 0..1_000 {
        ext.insert(k);
    }
    for k in 0..600 {
        ext.erase(k);
    }

    // Drain any follow-on merges the erase burst may still be running.
    for _ in 0..200 {
        if ext.validate_tombstone_proportion() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(ext.validate_tombstone_proportion());
}

#[test]
fn s6_concurrent_inserts_and_queries_see_a_growing_subset() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    common::init_tracing();
    let opts = ExtensionOptions::new(32, 16, 2);
    let ext: Arc<DynamicExtension<i32, VecShard>> = Arc::new(DynamicExtension::new(opts).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(10));

    let mut handles = Vec::new();
    for t in 0..8i32 {
        let ext = ext.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            start.wait();
            for i in 0..200 {
                ext.insert(t * 10_000 + i);
            }
        }));
    }

    for _ in 0..2 {
        let ext = ext.clone();
        let stop = stop.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            start.wait();
            let mut last_len = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let result = ext.query::<PointLookup>(0).get().unwrap();
                assert!(result.len() <= 1);
                last_len = last_len.max(result.len());
            }
        }));
    }

    for h in handles.drain(..8) {
        h.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ext.record_count(), 8 * 200);
}

#[test]
fn s7_random_workload_keeps_tombstones_in_bound() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    common::init_tracing();

    let opts = ExtensionOptions::new(16, 8, 2).with_max_delete_prop(0.25);
    let ext: DynamicExtension<i32, VecShard> = DynamicExtension::new(opts).unwrap();
    let mut rng = StdRng::seed_from_u64(0xD15_EA5E);
    let mut live = std::collections::HashSet::new();

    for _ in 0..5_000 {
        let key = rng.gen_range(0..500);
        if live.contains(&key) {
            ext.erase(key);
            live.remove(&key);
        } else {
            ext.insert(key);
            live.insert(key);
        }
    }

    for _ in 0..400 {
        if ext.validate_tombstone_proportion() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(ext.validate_tombstone_proportion());

    let mut result = ext.query::<RangeScan>((i32::MIN, i32::MAX)).get().unwrap();
    result.sort_unstable();
    let mut expected: Vec<i32> = live.into_iter().collect();
    expected.sort_unstable();
    assert_eq!(result, expected);
}
