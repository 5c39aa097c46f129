//! C7: the dynamic extension façade (spec §4.6, §6 "Public API").
//!
//! Owns epoch transitions and invariant enforcement. `current` is both the
//! "protected reference to the current epoch" and the epoch retirement
//! protocol's shared/exclusive lock from spec §4.5: a read lock is the
//! shared side (taken to clone the current epoch and call `start_job`), a
//! write lock is the exclusive side (taken only to install a freshly
//! published epoch).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::config::{DeletePolicy, ExtensionOptions};
use crate::epoch::Epoch;
use crate::error::Result;
use crate::future::{pair, QueryFuture};
use crate::query::Query;
use crate::record::Record;
use crate::scheduler::Scheduler;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

struct Inner<R: Record, S: Shard<R>> {
    options: ExtensionOptions,
    current: RwLock<Arc<Epoch<R, S>>>,
    epoch_number: AtomicU64,
    epoch_transition_lk: Mutex<()>,
    next_epoch_mu: Mutex<()>,
    next_epoch_cv: Condvar,
}

impl<R: Record, S: Shard<R>> Inner<R, S> {
    fn new_buffer(&self) -> Arc<Buffer<R>> {
        Arc::new(Buffer::new(
            self.options.buffer_cap,
            self.options.buffer_lwm,
            self.options.buffer_hwm,
        ))
    }

    fn acquire_current_epoch(&self) -> Arc<Epoch<R, S>> {
        let epoch = self.current.read().clone();
        epoch.start_job();
        epoch
    }

    fn current_epoch_number(&self) -> u64 {
        self.current.read().number
    }

    fn retire_in_background(epoch: Arc<Epoch<R, S>>) {
        thread::spawn(move || {
            epoch.await_drained();
            debug!(epoch = epoch.number, "epoch retired");
        });
    }

    /// Spec §4.6 `advance_epoch`: enforce the tombstone invariant, install
    /// the finished structure as a new current epoch, and retire the
    /// working epoch that carried the merge.
    fn advance_epoch(
        &self,
        working_epoch: &Arc<Epoch<R, S>>,
        mut structure: ExtensionStructure<R, S>,
        flushed_buffer: &Arc<Buffer<R>>,
    ) {
        let guard = self.epoch_transition_lk.lock();

        loop {
            if structure.validate_tombstone_proportion(&self.options) {
                break;
            }
            let tasks = structure.get_compaction_tasks(&self.options);
            if tasks.is_empty() {
                break;
            }
            for task in &tasks {
                structure.apply_task(task, &self.options);
            }
        }

        let mut remaining: Vec<Arc<Buffer<R>>> = working_epoch
            .buffers_snapshot()
            .into_iter()
            .filter(|b| !Arc::ptr_eq(b, flushed_buffer))
            .collect();
        if remaining.is_empty() {
            remaining.push(flushed_buffer.clone());
        }

        let next_number = self.epoch_number.fetch_add(1, Ordering::AcqRel) + 1;
        let final_epoch = Arc::new(Epoch::new(next_number, Arc::new(structure), remaining));
        *self.current.write() = final_epoch;
        working_epoch.mark_retired();
        drop(guard);

        info!(epoch = next_number, "advanced to new epoch after merge");
        Self::retire_in_background(working_epoch.clone());

        let _n = self.next_epoch_mu.lock();
        self.next_epoch_cv.notify_all();
    }
}

fn run_merge<R: Record, S: Shard<R>>(
    inner: Arc<Inner<R, S>>,
    working_epoch: Arc<Epoch<R, S>>,
    tasks: Vec<crate::structure::ReconstructionTask>,
    opts: ExtensionOptions,
) {
    let mut structure = (*working_epoch.structure).clone();
    for task in &tasks {
        structure.apply_task(task, &opts);
    }

    let flushed = working_epoch.oldest_buffer();
    let view = flushed.get_buffer_view();
    structure.flush_buffer(&view, &opts);
    let new_head = flushed.tail();
    drop(view);
    if new_head > 0 {
        flushed.advance_head(new_head);
    }

    inner.advance_epoch(&working_epoch, structure, &flushed);
    working_epoch.end_job();
}

/// The public façade (spec §6). `R` is the opaque record type; `S` the
/// shard implementation plugged in by the caller.
pub struct DynamicExtension<R: Record, S: Shard<R>> {
    inner: Arc<Inner<R, S>>,
    scheduler: Scheduler,
}

impl<R: Record, S: Shard<R>> DynamicExtension<R, S> {
    pub fn new(options: ExtensionOptions) -> Result<Self> {
        options.validate()?;
        let buffer = Arc::new(Buffer::new(options.buffer_cap, options.buffer_lwm, options.buffer_hwm));
        let structure = Arc::new(ExtensionStructure::empty());
        let epoch = Arc::new(Epoch::new(0, structure, vec![buffer]));
        let scheduler = Scheduler::new(options.scheduler, options.thread_count);
        let inner = Arc::new(Inner {
            options,
            current: RwLock::new(epoch),
            epoch_number: AtomicU64::new(0),
            epoch_transition_lk: Mutex::new(()),
            next_epoch_mu: Mutex::new(()),
            next_epoch_cv: Condvar::new(),
        });
        Ok(Self { inner, scheduler })
    }

    fn schedule_merge(&self, old_epoch: &Arc<Epoch<R, S>>) {
        let guard = self.inner.epoch_transition_lk.lock();
        if !Arc::ptr_eq(&*self.inner.current.read(), old_epoch) {
            return;
        }

        let next_number = self.inner.epoch_number.fetch_add(1, Ordering::AcqRel) + 1;
        let mut working = old_epoch.clone_for(next_number);
        working.start_job();
        let buffer_reccnt = old_epoch.oldest_buffer().len() as usize;
        let tasks = working.structure.get_reconstruction_tasks(buffer_reccnt, &self.inner.options);
        let working = Arc::new(working);

        *self.inner.current.write() = working.clone();
        old_epoch.mark_retired();
        drop(guard);
        debug!(epoch = next_number, tasks = tasks.len(), "scheduled merge");

        Inner::retire_in_background(old_epoch.clone());

        let inner = self.inner.clone();
        let opts = self.inner.options.clone();
        self.scheduler.submit(move || run_merge(inner, working, tasks, opts));
    }

    fn insert_inner(&self, rec: R, tombstone: bool) {
        loop {
            let epoch = self.inner.acquire_current_epoch();
            let mut buf = epoch.active_buffer();
            if buf.is_full() {
                if self.scheduler.is_serial() {
                    epoch.end_job();
                    self.schedule_merge(&epoch);
                    continue;
                } else if epoch.prepare_reconstruction() {
                    let fresh = self.inner.new_buffer();
                    buf = epoch.add_buffer(fresh, &buf);
                    self.schedule_merge(&epoch);
                } else {
                    let fresh = self.inner.new_buffer();
                    buf = epoch.add_buffer(fresh, &buf);
                }
            }
            let ok = buf.append(rec, tombstone);
            epoch.end_job();
            if ok {
                return;
            }
        }
    }

    /// Always eventually succeeds (spec §6 `insert(rec) -> 1`).
    pub fn insert(&self, rec: R) {
        self.insert_inner(rec, false);
    }

    /// Returns `false` only in the tagging policy, when `rec` was not found
    /// anywhere (spec §6 `erase(rec) -> 0|1`).
    pub fn erase(&self, rec: R) -> bool {
        match self.inner.options.delete_policy {
            DeletePolicy::Tombstone => {
                self.insert_inner(rec, true);
                true
            }
            DeletePolicy::Tagging => {
                let epoch = self.inner.acquire_current_epoch();
                let found_in_buffers = epoch
                    .buffers_snapshot()
                    .iter()
                    .any(|b| b.tagged_delete(&rec));
                let found = found_in_buffers || epoch.structure.tagged_delete(&rec);
                epoch.end_job();
                found
            }
        }
    }

    pub fn query<Q>(&self, params: Q::Parameters) -> QueryFuture<Vec<R>>
    where
        Q: Query<R, S> + 'static,
        Q::Parameters: 'static,
        Q::LocalQuery: 'static,
    {
        let (promise, future) = pair();
        let epoch = self.inner.acquire_current_epoch();
        let delete_policy = self.inner.options.delete_policy;
        self.scheduler.submit(move || {
            let result = run_query::<R, S, Q>(&epoch, &params, delete_policy);
            epoch.end_job();
            promise.resolve(result);
        });
        future
    }

    /// Blocks until the epoch-transition condvar fires at least once after
    /// this call (spec §5 "await_next_epoch blocks... until current_epoch
    /// == newest_epoch").
    pub fn await_next_epoch(&self) {
        let starting = self.inner.current_epoch_number();
        let mut guard = self.inner.next_epoch_mu.lock();
        while self.inner.current_epoch_number() == starting {
            self.inner.next_epoch_cv.wait(&mut guard);
        }
    }

    /// Materialises a single shard from the current state (spec §6
    /// "hand-off to a read-only snapshot"). If `wait`, first waits out any
    /// reconstruction already in flight so the snapshot reflects it.
    pub fn create_static_structure(&self, wait: bool) -> S {
        if wait {
            while self.inner.current.read().is_merging() {
                thread::yield_now();
            }
        }
        let epoch = self.inner.acquire_current_epoch();
        let mut shards: Vec<Arc<S>> = Vec::new();
        for level in epoch.structure.levels.iter() {
            shards.extend(level.present_shards().cloned());
        }
        for buffer in epoch.buffers_snapshot() {
            let view = buffer.get_buffer_view();
            shards.push(Arc::new(S::from_buffer_view(&view)));
        }
        epoch.end_job();
        let refs: Vec<&S> = shards.iter().map(|a| a.as_ref()).collect();
        S::from_shards(refs)
    }

    pub fn record_count(&self) -> usize {
        let epoch = self.inner.current.read().clone();
        let buffered: usize = epoch.buffers_snapshot().iter().map(|b| b.len() as usize).sum();
        buffered + epoch.structure.record_count()
    }

    pub fn tombstone_count(&self) -> usize {
        let epoch = self.inner.current.read().clone();
        let buffered: usize = epoch.buffers_snapshot().iter().map(|b| b.tombstone_count()).sum();
        buffered + epoch.structure.tombstone_count()
    }

    pub fn height(&self) -> usize {
        self.inner.current.read().structure.height()
    }

    pub fn memory_usage(&self) -> usize {
        let epoch = self.inner.current.read().clone();
        let buffered: usize = epoch.buffers_snapshot().iter().map(|b| b.memory_usage()).sum();
        buffered + epoch.structure.memory_usage()
    }

    pub fn aux_memory_usage(&self) -> usize {
        self.inner.current.read().structure.aux_memory_usage()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.options.buffer_cap
    }

    /// Spec §8 property 1 surfaced as a metric, grounded on the same
    /// per-level check the compaction planner runs.
    pub fn validate_tombstone_proportion(&self) -> bool {
        self.inner
            .current
            .read()
            .structure
            .validate_tombstone_proportion(&self.inner.options)
    }

    /// `(level, record_count, tombstone_count, shard_count)` per populated
    /// level, used by [`crate::debug`]'s structure dump.
    pub(crate) fn level_snapshot(&self) -> Vec<(usize, usize, usize, usize)> {
        self.inner
            .current
            .read()
            .structure
            .levels
            .iter()
            .enumerate()
            .map(|(i, lvl)| (i, lvl.record_count(), lvl.tombstone_count(), lvl.shard_count()))
            .collect()
    }

    /// One `(len, capacity, tombstone_count)` triple per buffer currently
    /// held by the epoch, oldest first.
    pub(crate) fn buffer_snapshot(&self) -> Vec<(u64, usize, usize)> {
        self.inner
            .current
            .read()
            .buffers_snapshot()
            .iter()
            .map(|b| (b.len(), b.capacity(), b.tombstone_count()))
            .collect()
    }
}

impl<R: Record, S: Shard<R>> Drop for DynamicExtension<R, S> {
    /// Awaits any in-flight epoch then shuts the scheduler down, draining
    /// outstanding reconstruction/query jobs before releasing epochs,
    /// buffers and structures (spec §6 `drop(Handle)`).
    fn drop(&mut self) {
        let epoch = self.inner.current.read().clone();
        epoch.await_drained();
        self.scheduler.shutdown();
    }
}

/// Spec §4.6 "Query path": fan out to every buffer and shard, apply the
/// delete filter, and combine via `Q::merge`.
fn run_query<R: Record, S: Shard<R>, Q: Query<R, S>>(
    epoch: &Arc<Epoch<R, S>>,
    params: &Q::Parameters,
    delete_policy: DeletePolicy,
) -> Vec<R> {
    let buffers = epoch.buffers_snapshot();
    let views: Vec<_> = buffers.iter().map(|b| b.get_buffer_view()).collect();

    let mut shard_refs: Vec<(usize, usize, &S)> = Vec::new();
    for (lvl_idx, level) in epoch.structure.levels.iter().enumerate() {
        for (shard_idx, shard) in level.present_shards().enumerate() {
            shard_refs.push((lvl_idx, shard_idx, shard.as_ref()));
        }
    }

    let mut combined: Vec<Q::LocalQuery> = views.iter().map(|v| Q::buffer_preproc(v, params)).collect();
    combined.extend(shard_refs.iter().map(|(_, _, s)| Q::local_preproc(s, params)));
    Q::process_query_states(params, &mut combined);
    let shard_states = combined.split_off(views.len());
    let buffer_states = combined;

    let mut results: Vec<Vec<crate::record::Wrapped<R>>> = Vec::new();
    let mut origins: Vec<Option<(usize, usize)>> = Vec::new();
    let mut found_any = false;

    for (view, state) in views.iter().zip(buffer_states.iter()) {
        let r = Q::buffer_query(view, state, params);
        found_any |= !r.is_empty();
        results.push(r);
        origins.push(None);
        if Q::EARLY_ABORT && found_any {
            break;
        }
    }

    if !(Q::EARLY_ABORT && found_any) {
        for ((lvl_idx, shard_idx, shard), state) in shard_refs.iter().zip(shard_states.iter()) {
            let r = Q::query(shard, state, params);
            found_any |= !r.is_empty();
            results.push(r);
            origins.push(Some((*lvl_idx, *shard_idx)));
            if Q::EARLY_ABORT && found_any {
                break;
            }
        }
    }

    if !Q::SKIP_DELETE_FILTER {
        for (result, origin) in results.iter_mut().zip(origins.iter()) {
            result.retain(|w| keep_after_delete_filter(w, *origin, &epoch.structure, &views, delete_policy));
        }
    }

    Q::merge(results, params)
}

fn keep_after_delete_filter<R: Record, S: Shard<R>>(
    w: &crate::record::Wrapped<R>,
    origin: Option<(usize, usize)>,
    structure: &ExtensionStructure<R, S>,
    views: &[crate::buffer::BufferView<R>],
    delete_policy: DeletePolicy,
) -> bool {
    if w.is_tombstone() {
        return false;
    }
    match delete_policy {
        DeletePolicy::Tagging => !w.is_tagged_deleted(),
        DeletePolicy::Tombstone => {
            if let Some((lvl, idx)) = origin {
                if structure.has_newer_tombstone(&w.rec, lvl, idx) {
                    return false;
                }
            }
            !views.iter().any(|v| v.may_contain_tombstone(&w.rec))
        }
    }
}
