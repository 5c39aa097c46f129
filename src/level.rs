//! C4: the internal level (spec §3 "Internal level", §4.2).

use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::BufferView;
use crate::record::{Record, Wrapped};
use crate::shard::Shard;

pub struct InternalLevel<R: Record, S: Shard<R>> {
    pub level_no: i64,
    cap: usize,
    shards: Vec<Option<Arc<S>>>,
    pending: Option<Arc<S>>,
    _marker: PhantomData<R>,
}

impl<R: Record, S: Shard<R>> InternalLevel<R, S> {
    pub fn empty(level_no: i64, cap: usize) -> Self {
        Self {
            level_no,
            cap,
            shards: vec![None; cap.max(1)],
            pending: None,
            _marker: PhantomData,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn shard_count(&self) -> usize {
        self.shards.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_capacity(&self) -> bool {
        self.shard_count() < self.cap
    }

    pub fn is_empty(&self) -> bool {
        self.shard_count() == 0 && self.pending.is_none()
    }

    pub fn present_shards(&self) -> impl Iterator<Item = &Arc<S>> {
        self.shards.iter().filter_map(|s| s.as_ref())
    }

    /// The level's only shard, valid for LEVELING/BSM levels which never
    /// hold more than one.
    pub fn sole_shard(&self) -> Option<&Arc<S>> {
        self.present_shards().next()
    }

    pub fn record_count(&self) -> usize {
        self.present_shards().map(|s| s.record_count()).sum()
    }

    pub fn tombstone_count(&self) -> usize {
        self.present_shards().map(|s| s.tombstone_count()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.present_shards().map(|s| s.memory_usage()).sum()
    }

    pub fn aux_memory_usage(&self) -> usize {
        self.present_shards().map(|s| s.aux_memory_usage()).sum()
    }

    /// Append one shard, placing it in the first free slot, or merging the
    /// whole level (plus the new shard) into `pending` on overflow (spec
    /// §4.2 "tier consolidation").
    pub fn append_shard(&mut self, shard: Arc<S>) {
        if let Some(slot) = self.shards.iter_mut().find(|s| s.is_none()) {
            *slot = Some(shard);
            return;
        }
        // present_shards() yields oldest-to-newest (ascending slot index);
        // from_shards wants newest-first, so the incoming shard goes first
        // and the rest are walked in reverse.
        let mut refs: Vec<&S> = vec![shard.as_ref()];
        refs.extend(self.present_shards().rev().map(|a| a.as_ref()));
        self.pending = Some(Arc::new(S::from_shards(refs)));
    }

    pub fn append_buffer(&mut self, view: &BufferView<R>) {
        self.append_shard(Arc::new(S::from_buffer_view(view)));
    }

    pub fn append_level(&mut self, other: &Self) {
        let shards: Vec<Arc<S>> = other.present_shards().cloned().collect();
        for shard in shards {
            self.append_shard(shard);
        }
    }

    /// Atomically replace all slots with the pending shard as sole
    /// occupant. A no-op if no overflow happened since the last call.
    pub fn finalize(&mut self) {
        if let Some(pending) = self.pending.take() {
            for slot in self.shards.iter_mut() {
                *slot = None;
            }
            self.shards[0] = Some(pending);
        }
    }

    pub fn reconstruct_tiering(&mut self, incoming: &Self) {
        self.append_level(incoming);
        self.finalize();
    }

    /// LEVELING reconstruction: produce a fresh level holding either
    /// `incoming` alone, or the merge of `incoming` with the existing sole
    /// shard of `base` (spec §4.3 "if target already holds a shard, replace
    /// it with the merge of (target, source)").
    pub fn reconstruct_leveling(base: &Self, incoming: Arc<S>) -> Self {
        let merged = match base.sole_shard() {
            Some(existing) => Arc::new(S::from_shards(vec![incoming.as_ref(), existing.as_ref()])),
            None => incoming,
        };
        let mut level = Self::empty(base.level_no, base.cap);
        level.shards[0] = Some(merged);
        level
    }

    /// BSM reconstruction: gather `sources` (newest-first) into one shard.
    pub fn reconstruct_bsm(level_no: i64, sources: &[&Self]) -> Self {
        let shards: Vec<Arc<S>> = sources
            .iter()
            .flat_map(|lvl| lvl.present_shards().cloned())
            .collect();
        let merged = Arc::new(S::from_shards(shards.iter().map(|a| a.as_ref()).collect()));
        let mut level = Self::empty(level_no, 1);
        level.shards[0] = Some(merged);
        level
    }

    /// Scan shards in this level with index greater than `after_idx` for a
    /// dominating tombstone/record (spec §4.2: "scan shards in the same
    /// level with higher index" before moving to lower-numbered levels).
    pub fn point_lookup_after(&self, rec: &R, after_idx: usize) -> Option<Wrapped<R>> {
        self.shards
            .iter()
            .enumerate()
            .skip(after_idx + 1)
            .find_map(|(_, slot)| slot.as_ref().and_then(|s| s.point_lookup(rec, true)))
    }

    pub fn point_lookup(&self, rec: &R) -> Option<(usize, Wrapped<R>)> {
        self.shards.iter().enumerate().find_map(|(idx, slot)| {
            slot.as_ref()
                .and_then(|s| s.point_lookup(rec, false).map(|w| (idx, w)))
        })
    }

    pub fn tagged_delete(&self, rec: &R) -> bool {
        self.present_shards().any(|s| s.tagged_delete(rec))
    }
}


impl<R: Record, S: Shard<R>> Clone for InternalLevel<R, S> {
    fn clone(&self) -> Self {
        Self {
            level_no: self.level_no,
            cap: self.cap,
            shards: self.shards.clone(),
            pending: self.pending.clone(),
            _marker: PhantomData,
        }
    }
}
