//! C5: the extension structure and its reconstruction planner (spec §3
//! "Extension structure (version)", §4.3).
//!
//! The planner never mutates the real level vector directly; it works on
//! scratch [`LevelState`] copies so reconstruction can be *planned* (and,
//! for the scheduler, planned speculatively against a cloned structure)
//! without touching shards until a task actually executes.

use std::sync::Arc;

use crate::config::{ExtensionOptions, LayoutPolicy};
use crate::level::InternalLevel;
use crate::record::Record;
use crate::shard::Shard;

#[derive(Debug, Clone, Copy)]
pub struct LevelState {
    pub reccnt: usize,
    pub reccap: usize,
    pub shardcnt: usize,
    pub shardcap: usize,
}

/// A planned merge: one or more source levels consolidating into
/// `target_level`. Leveling/tiering tasks always carry a single source
/// level; BSM tasks may bundle several (spec §4.3 "gather all source
/// levels listed in the task").
#[derive(Debug, Clone)]
pub struct ReconstructionTask {
    pub source_levels: Vec<usize>,
    pub target_level: usize,
    pub reccnt: usize,
}

pub fn level_record_cap(buffer_hwm: usize, scale_factor: usize, level_idx: usize) -> usize {
    buffer_hwm * scale_factor.pow((level_idx + 1) as u32)
}

fn level_shard_cap(policy: LayoutPolicy, scale_factor: usize) -> usize {
    match policy {
        LayoutPolicy::Leveling | LayoutPolicy::Bsm => 1,
        LayoutPolicy::Tiering => scale_factor,
    }
}

fn can_reconstruct_with(policy: LayoutPolicy, state: &LevelState, incoming: usize) -> bool {
    match policy {
        LayoutPolicy::Leveling => state.reccnt + incoming <= state.reccap,
        LayoutPolicy::Tiering => state.shardcnt < state.shardcap,
        LayoutPolicy::Bsm => state.reccnt == 0,
    }
}

pub struct ExtensionStructure<R: Record, S: Shard<R>> {
    pub levels: Vec<InternalLevel<R, S>>,
}

impl<R: Record, S: Shard<R>> ExtensionStructure<R, S> {
    pub fn empty() -> Self {
        Self { levels: Vec::new() }
    }

    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn record_count(&self) -> usize {
        self.levels.iter().map(|l| l.record_count()).sum()
    }

    pub fn tombstone_count(&self) -> usize {
        self.levels.iter().map(|l| l.tombstone_count()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.levels.iter().map(|l| l.memory_usage()).sum()
    }

    pub fn aux_memory_usage(&self) -> usize {
        self.levels.iter().map(|l| l.aux_memory_usage()).sum()
    }

    fn make_state(&self, idx: usize, opts: &ExtensionOptions) -> LevelState {
        let reccnt = self.levels.get(idx).map(|l| l.record_count()).unwrap_or(0);
        let shardcnt = self.levels.get(idx).map(|l| l.shard_count()).unwrap_or(0);
        LevelState {
            reccnt,
            reccap: level_record_cap(opts.buffer_hwm, opts.scale_factor, idx),
            shardcnt,
            shardcap: level_shard_cap(opts.layout_policy, opts.scale_factor),
        }
    }

    fn state_vector(&self, opts: &ExtensionOptions) -> Vec<LevelState> {
        (0..self.levels.len().max(1))
            .map(|i| self.make_state(i, opts))
            .collect()
    }

    /// Grow `scratch` with fresh empty-level states until index `idx` exists.
    fn ensure_scratch_len(&self, scratch: &mut Vec<LevelState>, idx: usize, opts: &ExtensionOptions) {
        while scratch.len() <= idx {
            let i = scratch.len();
            scratch.push(LevelState {
                reccnt: 0,
                reccap: level_record_cap(opts.buffer_hwm, opts.scale_factor, i),
                shardcnt: 0,
                shardcap: level_shard_cap(opts.layout_policy, opts.scale_factor),
            });
        }
    }

    /// Reconstruction tasks that, once executed, leave L0 with capacity for
    /// `buffer_reccnt` (spec §4.3). Empty when the buffer already fits.
    pub fn get_reconstruction_tasks(
        &self,
        buffer_reccnt: usize,
        opts: &ExtensionOptions,
    ) -> Vec<ReconstructionTask> {
        let mut scratch = self.state_vector(opts);
        if can_reconstruct_with(opts.layout_policy, &scratch[0], buffer_reccnt) {
            return Vec::new();
        }

        if matches!(opts.layout_policy, LayoutPolicy::Bsm) {
            return self.plan_bsm_cascade(&mut scratch, 0, opts);
        }

        let mut b = 1;
        loop {
            self.ensure_scratch_len(&mut scratch, b, opts);
            if can_reconstruct_with(opts.layout_policy, &scratch[b], scratch[b - 1].reccnt) {
                break;
            }
            b += 1;
        }
        self.emit_cascade(&mut scratch, 1, b, opts)
    }

    /// Compaction tasks that reduce level `v`'s tombstone proportion back
    /// under `tau` by cascading its content into deeper levels (spec §4.3
    /// "Additional compaction planner").
    pub fn get_compaction_tasks(&self, opts: &ExtensionOptions) -> Vec<ReconstructionTask> {
        let scratch = self.state_vector(opts);
        let violating = self.levels.iter().enumerate().find(|(i, lvl)| {
            let reccap = scratch.get(*i).map(|s| s.reccap).unwrap_or(1).max(1);
            lvl.record_count() > 0 && (lvl.tombstone_count() as f64 / reccap as f64) > opts.max_delete_prop
        });
        let v = match violating {
            Some((i, _)) => i,
            None => return Vec::new(),
        };

        let mut scratch = scratch;
        if matches!(opts.layout_policy, LayoutPolicy::Bsm) {
            return self.plan_bsm_cascade(&mut scratch, v, opts);
        }

        let mut b = v + 1;
        loop {
            self.ensure_scratch_len(&mut scratch, b, opts);
            if can_reconstruct_with(opts.layout_policy, &scratch[b], scratch[b - 1].reccnt) {
                break;
            }
            b += 1;
        }
        self.emit_cascade(&mut scratch, v + 1, b, opts)
    }

    /// Emit one task per level transition from `lo..=hi`, newest first,
    /// updating `scratch` after each as spec §4.3 step 3 describes.
    fn emit_cascade(
        &self,
        scratch: &mut Vec<LevelState>,
        lo: usize,
        hi: usize,
        opts: &ExtensionOptions,
    ) -> Vec<ReconstructionTask> {
        let mut tasks = Vec::new();
        for i in (lo..=hi).rev() {
            let incoming = scratch[i - 1].reccnt;
            let mut reccnt = incoming;
            if matches!(opts.layout_policy, LayoutPolicy::Leveling) {
                reccnt += scratch[i].reccnt;
            }
            tasks.push(ReconstructionTask {
                source_levels: vec![i - 1],
                target_level: i,
                reccnt,
            });
            scratch[i].reccnt += incoming;
            scratch[i].shardcnt = match opts.layout_policy {
                LayoutPolicy::Leveling | LayoutPolicy::Bsm => 1,
                LayoutPolicy::Tiering => (scratch[i].shardcnt + 1).min(scratch[i].shardcap),
            };
            scratch[i - 1] = self.make_state(i - 1, opts);
            scratch[i - 1].reccnt = 0;
            scratch[i - 1].shardcnt = 0;
        }
        tasks
    }

    /// BSM cascade: find the shallowest fully-empty level at or after
    /// `start` and gather everything from `start` up to it into one task.
    fn plan_bsm_cascade(
        &self,
        scratch: &mut Vec<LevelState>,
        start: usize,
        opts: &ExtensionOptions,
    ) -> Vec<ReconstructionTask> {
        let mut b = start + 1;
        loop {
            self.ensure_scratch_len(scratch, b, opts);
            if scratch[b].reccnt == 0 {
                break;
            }
            b += 1;
        }
        let reccnt: usize = scratch[start..b].iter().map(|s| s.reccnt).sum();
        vec![ReconstructionTask {
            source_levels: (start..b).collect(),
            target_level: b,
            reccnt,
        }]
    }

    /// Execute a planned task against the real structure. Per spec §4.3,
    /// after every task the source level(s) are replaced with fresh empty
    /// internal levels at their indices.
    pub fn apply_task(&mut self, task: &ReconstructionTask, opts: &ExtensionOptions) {
        while self.levels.len() <= task.target_level {
            let idx = self.levels.len();
            self.levels.push(InternalLevel::empty(
                idx as i64,
                level_shard_cap(opts.layout_policy, opts.scale_factor),
            ));
        }

        match opts.layout_policy {
            LayoutPolicy::Leveling => {
                debug_assert_eq!(task.source_levels.len(), 1);
                let source_idx = task.source_levels[0];
                let incoming = self.levels[source_idx].sole_shard().cloned();
                if let Some(incoming) = incoming {
                    self.levels[task.target_level] =
                        InternalLevel::reconstruct_leveling(&self.levels[task.target_level], incoming);
                }
            }
            LayoutPolicy::Tiering => {
                debug_assert_eq!(task.source_levels.len(), 1);
                let source_idx = task.source_levels[0];
                let source = self.levels[source_idx].clone();
                self.levels[task.target_level].reconstruct_tiering(&source);
            }
            LayoutPolicy::Bsm => {
                let sources: Vec<&InternalLevel<R, S>> =
                    task.source_levels.iter().map(|&i| &self.levels[i]).collect();
                let merged = InternalLevel::reconstruct_bsm(task.target_level as i64, &sources);
                self.levels[task.target_level] = merged;
            }
        }

        for &idx in &task.source_levels {
            let cap = level_shard_cap(opts.layout_policy, opts.scale_factor);
            self.levels[idx] = InternalLevel::empty(idx as i64, cap);
        }
    }

    /// Flush a buffer view into L0 (spec §4.3 "Flush"). Under leveling this
    /// merges with L0's existing shard; under tiering/BSM it appends (and
    /// finalizes L0 if it overflows).
    pub fn flush_buffer(
        &mut self,
        view: &crate::buffer::BufferView<R>,
        opts: &ExtensionOptions,
    ) {
        if self.levels.is_empty() {
            self.levels.push(InternalLevel::empty(
                0,
                level_shard_cap(opts.layout_policy, opts.scale_factor),
            ));
        }
        match opts.layout_policy {
            LayoutPolicy::Leveling => {
                let incoming = Arc::new(S::from_buffer_view(view));
                self.levels[0] = InternalLevel::reconstruct_leveling(&self.levels[0], incoming);
            }
            LayoutPolicy::Tiering | LayoutPolicy::Bsm => {
                self.levels[0].append_buffer(view);
                self.levels[0].finalize();
            }
        }
    }

    /// Spec §8 property 1: for every populated level, tombstones <= tau * capacity.
    pub fn validate_tombstone_proportion(&self, opts: &ExtensionOptions) -> bool {
        self.levels.iter().enumerate().all(|(i, lvl)| {
            if lvl.record_count() == 0 {
                return true;
            }
            let cap = level_record_cap(opts.buffer_hwm, opts.scale_factor, i).max(1);
            (lvl.tombstone_count() as f64 / cap as f64) <= opts.max_delete_prop
        })
    }

    pub fn point_lookup(&self, rec: &R) -> Option<(usize, usize, crate::record::Wrapped<R>)> {
        for (lvl_idx, level) in self.levels.iter().enumerate() {
            if let Some((shard_idx, wrapped)) = level.point_lookup(rec) {
                return Some((lvl_idx, shard_idx, wrapped));
            }
        }
        None
    }

    /// Tombstone dominance search used by the tombstone delete-filter (spec
    /// §4.6): does any newer shard than `(level, shard_idx)` hold a
    /// tombstone for `rec`? "Newer" means same level with a higher shard
    /// index, or any lower-numbered level.
    pub fn has_newer_tombstone(&self, rec: &R, level: usize, shard_idx: usize) -> bool {
        if let Some(w) = self.levels[level].point_lookup_after(rec, shard_idx) {
            if w.is_tombstone() {
                return true;
            }
        }
        for lvl in self.levels.iter().take(level) {
            if let Some((_, w)) = lvl.point_lookup(rec) {
                if w.is_tombstone() {
                    return true;
                }
            }
        }
        false
    }

    pub fn tagged_delete(&self, rec: &R) -> bool {
        self.levels.iter().any(|lvl| lvl.tagged_delete(rec))
    }
}

impl<R: Record, S: Shard<R>> Clone for ExtensionStructure<R, S> {
    fn clone(&self) -> Self {
        Self {
            levels: self.levels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletePolicy;

    fn opts(policy: LayoutPolicy) -> ExtensionOptions {
        ExtensionOptions::new(4, 2, 2)
            .with_layout_policy(policy)
            .with_delete_policy(DeletePolicy::Tombstone)
    }

    #[test]
    fn level_record_cap_grows_geometrically() {
        assert_eq!(level_record_cap(4, 2, 0), 8);
        assert_eq!(level_record_cap(4, 2, 1), 16);
        assert_eq!(level_record_cap(4, 2, 2), 32);
    }

    #[test]
    fn leveling_accepts_incoming_while_under_capacity() {
        let state = LevelState {
            reccnt: 2,
            reccap: 8,
            shardcnt: 1,
            shardcap: 1,
        };
        assert!(can_reconstruct_with(LayoutPolicy::Leveling, &state, 4));
        assert!(!can_reconstruct_with(LayoutPolicy::Leveling, &state, 7));
    }

    #[test]
    fn tiering_accepts_incoming_while_shard_slots_remain() {
        let state = LevelState {
            reccnt: 100,
            reccap: 1000,
            shardcnt: 1,
            shardcap: 2,
        };
        assert!(can_reconstruct_with(LayoutPolicy::Tiering, &state, 999));
        let full = LevelState { shardcnt: 2, ..state };
        assert!(!can_reconstruct_with(LayoutPolicy::Tiering, &full, 1));
    }

    #[test]
    fn bsm_only_accepts_into_a_fully_empty_level() {
        let empty = LevelState { reccnt: 0, reccap: 8, shardcnt: 0, shardcap: 1 };
        let nonempty = LevelState { reccnt: 1, ..empty };
        assert!(can_reconstruct_with(LayoutPolicy::Bsm, &empty, 4));
        assert!(!can_reconstruct_with(LayoutPolicy::Bsm, &nonempty, 4));
    }

    #[test]
    fn options_are_constructible_for_every_policy() {
        for policy in [LayoutPolicy::Leveling, LayoutPolicy::Tiering, LayoutPolicy::Bsm] {
            assert_eq!(opts(policy).layout_policy, policy);
        }
    }
}
