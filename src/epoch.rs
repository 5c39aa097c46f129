//! C6: the epoch (spec §3 "Epoch", §4.5 "Epoch and reclamation").
//!
//! An epoch is the unit of snapshot isolation: it owns strong references to
//! one structure version and to the buffers active when it was cloned. At
//! most one epoch is current at any time; a retired epoch is destroyed once
//! every job it spawned has finished.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::Buffer;
use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

pub struct Epoch<R: Record, S: Shard<R>> {
    pub number: u64,
    pub structure: Arc<ExtensionStructure<R, S>>,
    buffers: Mutex<Vec<Arc<Buffer<R>>>>,
    active_jobs: AtomicU64,
    jobs_drained: Condvar,
    active: AtomicBool,
    merge_in_progress: AtomicBool,
}

impl<R: Record, S: Shard<R>> Epoch<R, S> {
    pub fn new(number: u64, structure: Arc<ExtensionStructure<R, S>>, buffers: Vec<Arc<Buffer<R>>>) -> Self {
        Self {
            number,
            structure,
            buffers: Mutex::new(buffers),
            active_jobs: AtomicU64::new(0),
            jobs_drained: Condvar::new(),
            active: AtomicBool::new(true),
            merge_in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_merging(&self) -> bool {
        self.merge_in_progress.load(Ordering::Acquire)
    }

    pub fn mark_retired(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn start_job(&self) {
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_job(&self) {
        if self.active_jobs.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last job to leave wakes up anyone waiting to retire this epoch.
            let _guard = self.buffers.lock();
            self.jobs_drained.notify_all();
        }
    }

    pub fn active_job_count(&self) -> u64 {
        self.active_jobs.load(Ordering::Acquire)
    }

    /// Blocks until `active_jobs` reaches zero (spec §4.5 retirement
    /// protocol: "the retirement worker... confirms active_jobs == 0").
    pub fn await_drained(&self) {
        let mut guard = self.buffers.lock();
        while self.active_jobs.load(Ordering::Acquire) != 0 {
            self.jobs_drained.wait(&mut guard);
        }
    }

    /// CAS on `merge_in_progress`: the first caller wins and runs the merge;
    /// everyone else keeps inserting into a freshly added buffer.
    pub fn prepare_reconstruction(&self) -> bool {
        self.merge_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn active_buffer(&self) -> Arc<Buffer<R>> {
        self.buffers
            .lock()
            .last()
            .cloned()
            .expect("an epoch always holds at least one buffer")
    }

    pub fn buffers_snapshot(&self) -> Vec<Arc<Buffer<R>>> {
        self.buffers.lock().clone()
    }

    pub fn oldest_buffer(&self) -> Arc<Buffer<R>> {
        self.buffers
            .lock()
            .first()
            .cloned()
            .expect("an epoch always holds at least one buffer")
    }

    /// Mini-CAS over the buffer vector: appends `new` iff the current active
    /// buffer is still `expected_current`, else returns the racer's buffer.
    pub fn add_buffer(&self, new: Arc<Buffer<R>>, expected_current: &Arc<Buffer<R>>) -> Arc<Buffer<R>> {
        let mut buffers = self.buffers.lock();
        let current = buffers.last().expect("an epoch always holds at least one buffer");
        if Arc::ptr_eq(current, expected_current) {
            buffers.push(new.clone());
            new
        } else {
            current.clone()
        }
    }

    /// Copies the buffer list (bumping each `Arc`'s refcount) and the
    /// structure (shallow level clone), returning a detached epoch with its
    /// own refcount of 1 that is not yet installed anywhere.
    pub fn clone_for(&self, new_number: u64) -> Self {
        let structure = Arc::new((*self.structure).clone());
        let buffers = self.buffers_snapshot();
        Self::new(new_number, structure, buffers)
    }
}
