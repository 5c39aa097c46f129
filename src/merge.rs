//! C9: the sorted-merge helper (spec §4.4).
//!
//! A k-way merge over sorted wrapped-record ranges that applies tombstone
//! cancellation, tagged-delete filtering and tombstone accounting in one
//! pass. This is the piece a shard author's `from_buffer_view`/`from_shards`
//! constructor is expected to call to stay consistent with the rest of the
//! core's tombstone-bound invariant (spec §8 property 1); it is also what
//! the buffer-view-to-sorted-array path (used when flushing into L0) runs
//! through with a single cursor.
//!
//! Grounded on the teacher's `iterators/merge_iterator.rs` k-way
//! `BinaryHeap` merge, generalized from byte-slice keys to `Wrapped<R>` and
//! extended with the cancellation/skip rules spec §4.4 adds on top of plain
//! merge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bloom::TombstoneBloom;
use crate::buffer::BufferView;
use crate::record::{Record, Wrapped};

/// A cursor over one sorted, already-deduplicated-within-itself run of
/// wrapped records. Cursors are supplied to [`sorted_merge`] newest-first
/// (buffer first, L0 next, ...).
pub struct Cursor<'a, R: Record> {
    records: &'a [Wrapped<R>],
    pos: usize,
}

impl<'a, R: Record> Cursor<'a, R> {
    pub fn new(records: &'a [Wrapped<R>]) -> Self {
        Self { records, pos: 0 }
    }

    fn peek(&self) -> Option<Wrapped<R>> {
        self.records.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

/// The output of a sorted merge: a new sorted, tombstone-accounted run.
pub struct MergedRun<R: Record> {
    pub records: Vec<Wrapped<R>>,
    pub tombstone_count: usize,
    pub bloom: TombstoneBloom,
}

struct HeapItem<R: Record> {
    item: Wrapped<R>,
    // lower is newer, per the newest-first cursor ordering convention.
    cursor: usize,
}

impl<R: Record> PartialEq for HeapItem<R> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl<R: Record> Eq for HeapItem<R> {}

impl<R: Record> PartialOrd for HeapItem<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: Record> Ord for HeapItem<R> {
    // BinaryHeap is a max-heap; reverse the rec comparison so the smallest
    // key pops first. Cursor order breaks ties before the header: a header's
    // insertion timestamp is only comparable within the buffer that produced
    // it (every buffer restarts its own counter at zero), so only cursor
    // order - newest-first by convention - is safe to compare across
    // sources. The header is a final tie-break within a single cursor, where
    // timestamps are in fact comparable.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .item
            .rec
            .cmp(&self.item.rec)
            .then(self.cursor.cmp(&other.cursor))
            .then(other.item.cmp(&self.item))
    }
}

pub fn sorted_merge<R: Record>(mut cursors: Vec<Cursor<R>>) -> MergedRun<R> {
    let approx_cap: usize = cursors.iter().map(|c| c.records.len() - c.pos).sum();
    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (idx, cursor) in cursors.iter().enumerate() {
        if let Some(item) = cursor.peek() {
            heap.push(HeapItem { item, cursor: idx });
        }
    }

    let mut records = Vec::with_capacity(approx_cap);
    let mut tombstone_count = 0usize;
    let mut bloom = TombstoneBloom::with_capacity(approx_cap.max(1));

    while let Some(top) = heap.pop() {
        cursors[top.cursor].advance();
        if let Some(next) = cursors[top.cursor].peek() {
            heap.push(HeapItem {
                item: next,
                cursor: top.cursor,
            });
        }

        // Rule 1: a live record immediately followed by its own tombstone
        // cancels; neither is emitted.
        if !top.item.is_tombstone() {
            if let Some(second) = heap.peek() {
                if second.item.rec == top.item.rec && second.item.is_tombstone() {
                    let second = heap.pop().expect("just peeked");
                    cursors[second.cursor].advance();
                    if let Some(next) = cursors[second.cursor].peek() {
                        heap.push(HeapItem {
                            item: next,
                            cursor: second.cursor,
                        });
                    }
                    continue;
                }
            }
        }

        // Rule 2: tagged-deleted records are dropped without counting as tombstones.
        if top.item.is_tagged_deleted() {
            continue;
        }

        // Rule 3: emit, accounting for tombstones.
        if top.item.is_tombstone() {
            tombstone_count += 1;
            bloom.insert(&top.item.rec);
        }
        records.push(top.item);
    }

    MergedRun {
        records,
        tombstone_count,
        bloom,
    }
}

/// Materialize a buffer view into a sorted, tombstone-accounted run (spec
/// §4.4 "Buffer-view -> sorted-array"). The view may wrap around the ring,
/// so its two halves are copied into one contiguous, cache-line-aligned
/// vector before sorting.
pub fn flatten_buffer_view<R: Record>(view: &BufferView<R>) -> MergedRun<R> {
    let mut flat: Vec<Wrapped<R>> = view.iter().collect();
    flat.sort_unstable();
    sorted_merge(vec![Cursor::new(&flat)])
}
