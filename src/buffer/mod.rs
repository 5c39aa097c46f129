//! C2: the mutable buffer (spec §3 "Mutable buffer `B`", §4.1).
//!
//! A fixed-capacity circular array with a lock-free, CAS-reserved append
//! path (grounded on the reservation protocol of a SPSC ring buffer from the
//! example pack, generalized here to multiple concurrent producers: slots
//! are reserved with a CAS on `tail`, written without further
//! synchronization since each producer owns a distinct slot, then published
//! via a per-slot `ready` flag consumers spin on).
//!
//! `head`/`old_head` bookkeeping (the ring's consumer side) is *not* on the
//! wait-free path the spec calls out for `append` (spec §4.1 only requires
//! the non-contended append itself to be wait-free), so it is guarded by a
//! single lock here rather than hand-rolled lock-free CAS choreography. See
//! DESIGN.md ("old-head refcount race") for why that is a safe
//! simplification of the design note in spec §9.

pub mod view;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::bloom::TombstoneBloom;
use crate::record::{Record, Wrapped};

pub use view::BufferView;

struct HeadState {
    head: u64,
    old_head: u64,
    head_refcnt: usize,
    old_head_refcnt: usize,
}

pub struct Buffer<R: Record> {
    capacity: usize,
    pub(crate) lwm: usize,
    pub(crate) hwm: usize,
    slots: Box<[UnsafeCell<MaybeUninit<Wrapped<R>>>]>,
    ready: Box<[AtomicBool]>,
    tail: AtomicU64,
    head_state: Mutex<HeadState>,
    tombstone_count: AtomicU64,
    bloom: parking_lot::RwLock<TombstoneBloom>,
}

unsafe impl<R: Record> Send for Buffer<R> {}
unsafe impl<R: Record> Sync for Buffer<R> {}

impl<R: Record> Buffer<R> {
    pub fn new(capacity: usize, lwm: usize, hwm: usize) -> Self {
        assert!(lwm < hwm, "low watermark must be below high watermark");
        assert!(hwm <= capacity, "high watermark must not exceed capacity");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        let mut ready = Vec::with_capacity(capacity);
        ready.resize_with(capacity, || AtomicBool::new(false));

        Self {
            capacity,
            lwm,
            hwm,
            slots: slots.into_boxed_slice(),
            ready: ready.into_boxed_slice(),
            tail: AtomicU64::new(0),
            head_state: Mutex::new(HeadState {
                head: 0,
                old_head: 0,
                head_refcnt: 0,
                old_head_refcnt: 0,
            }),
            tombstone_count: AtomicU64::new(0),
            bloom: parking_lot::RwLock::new(TombstoneBloom::with_capacity(hwm)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn head(&self) -> u64 {
        self.head_state.lock().head
    }

    fn old_head(&self) -> u64 {
        self.head_state.lock().old_head
    }

    pub fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn len(&self) -> u64 {
        self.tail() - self.head()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` once the buffer has reached its mandatory-merge threshold.
    pub fn is_full(&self) -> bool {
        self.len() >= self.hwm as u64
    }

    /// `true` past the opportunistic-compaction threshold.
    pub fn past_low_watermark(&self) -> bool {
        self.len() >= self.lwm as u64
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstone_count.load(Ordering::Relaxed) as usize
    }

    pub fn memory_usage(&self) -> usize {
        self.capacity * std::mem::size_of::<Wrapped<R>>()
    }

    /// Reserve the next slot via CAS on `tail` and publish the record. Wait-free
    /// on the non-contended path: a single compare-exchange succeeds and the
    /// function returns without retrying.
    pub fn append(&self, rec: R, tombstone: bool) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let old_head = self.old_head();
            if tail - old_head >= self.capacity as u64 || self.is_full() {
                return false;
            }
            if self
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let idx = (tail as usize) % self.capacity;
                // per-buffer insertion timestamp occupies 29 bits (spec §3); truncating the
                // monotonic tail counter into that range is fine since a buffer is retired
                // long before its tail wraps the 2^29 horizon.
                let ts = (tail as u32) & 0x1FFF_FFFF;
                let wrapped = Wrapped::new(rec, ts, tombstone);
                unsafe {
                    (*self.slots[idx].get()).write(wrapped);
                }
                if tombstone {
                    self.tombstone_count.fetch_add(1, Ordering::Relaxed);
                    self.bloom.write().insert(&rec);
                }
                self.ready[idx].store(true, Ordering::Release);
                return true;
            }
        }
    }

    fn read_slot(&self, logical_pos: u64) -> Wrapped<R> {
        let idx = (logical_pos as usize) % self.capacity;
        // spin until the producer that reserved this slot finishes its write;
        // tail is bumped before the write completes, so a reader racing the
        // producer can briefly observe an unready slot.
        while !self.ready[idx].load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
        unsafe { (*self.slots[idx].get()).assume_init() }
    }

    /// Linear scan over `[head, tail)` with a bloom-filter short-circuit,
    /// used by the tombstone-policy delete filter (spec §4.1).
    pub fn check_tombstone(&self, rec: &R) -> bool {
        if !self.bloom.read().may_contain(rec) {
            return false;
        }
        let (head, tail) = {
            let st = self.head_state.lock();
            (st.head, self.tail())
        };
        for pos in head..tail {
            let wrapped = self.read_slot(pos);
            if wrapped.is_tombstone() && wrapped.rec == *rec {
                return true;
            }
        }
        false
    }

    /// Linear scan over `[head, tail)` mutating the first matching record in
    /// place, used by the tagging delete policy (serial scheduler only).
    pub fn tagged_delete(&self, rec: &R) -> bool {
        let (head, tail) = {
            let st = self.head_state.lock();
            (st.head, self.tail())
        };
        for pos in head..tail {
            let idx = (pos as usize) % self.capacity;
            while !self.ready[idx].load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            unsafe {
                let slot = &mut *self.slots[idx].get();
                let current = slot.assume_init_mut();
                if current.rec == *rec && !current.is_tagged_deleted() {
                    current.set_tagged_deleted();
                    return true;
                }
            }
        }
        false
    }

    pub fn get_buffer_view(self: &std::sync::Arc<Self>) -> BufferView<R> {
        let mut st = self.head_state.lock();
        st.head_refcnt += 1;
        let head = st.head;
        let tail = self.tail();
        drop(st);
        BufferView::new(self.clone(), head, tail, self.tombstone_count())
    }

    pub(crate) fn release_view(&self, head: u64) {
        let mut st = self.head_state.lock();
        if head == st.head {
            st.head_refcnt -= 1;
        } else {
            debug_assert_eq!(head, st.old_head);
            st.old_head_refcnt -= 1;
            if st.old_head_refcnt == 0 {
                st.old_head = st.head;
            }
        }
    }

    /// Called exactly once by the reconstruction that consumed records up to
    /// `new_head`. Preconditions per spec §4.1: `h < new_head <= t` and
    /// `old_head_refcnt == 0`.
    pub fn advance_head(&self, new_head: u64) {
        let mut st = self.head_state.lock();
        assert!(
            st.old_head_refcnt == 0,
            "advance_head called while old head still referenced"
        );
        assert!(st.head < new_head, "new_head must move the head forward");
        assert!(
            new_head <= self.tail(),
            "new_head must not run past tail"
        );
        st.old_head = st.head;
        st.old_head_refcnt = st.head_refcnt;
        st.head = new_head;
        st.head_refcnt = 0;
        // No view was outstanding against the previous head at the moment of
        // the shift, so nothing will ever call release_view to notice
        // old_head_refcnt is already 0; advance it here or old_head would
        // never catch up and the ring would permanently lose capacity.
        if st.old_head_refcnt == 0 {
            st.old_head = st.head;
        }
    }

    pub(crate) fn slice(&self, head: u64, tail: u64) -> Vec<Wrapped<R>> {
        (head..tail).map(|pos| self.read_slot(pos)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_rejects_once_high_watermark_is_reached() {
        let buf: Buffer<i32> = Buffer::new(8, 2, 4);
        for i in 0..4 {
            assert!(buf.append(i, false));
        }
        assert!(!buf.append(99, false));
    }

    #[test]
    fn buffer_view_sees_exactly_the_records_appended_so_far() {
        let buf = Arc::new(Buffer::<i32>::new(8, 2, 6));
        buf.append(1, false);
        buf.append(2, false);
        let view = buf.get_buffer_view();
        buf.append(3, false);
        let seen: Vec<i32> = view.iter().map(|w| w.rec).collect();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn advance_head_then_release_recycles_old_head() {
        let buf = Arc::new(Buffer::<i32>::new(4, 1, 3));
        buf.append(1, false);
        buf.append(2, false);
        let view = buf.get_buffer_view();
        buf.advance_head(2);
        assert_eq!(buf.old_head(), 0);
        drop(view);
        assert_eq!(buf.old_head(), buf.head());
    }

    #[test]
    fn ring_never_exceeds_capacity_minus_old_head() {
        let buf = Arc::new(Buffer::<i32>::new(4, 1, 4));
        for i in 0..4 {
            assert!(buf.append(i, false));
        }
        // full: old_head hasn't moved, so append must fail even though hwm == capacity.
        assert!(!buf.append(99, false));
    }

    #[test]
    fn tombstone_check_uses_bloom_short_circuit_and_scan() {
        let buf = Arc::new(Buffer::<i32>::new(8, 2, 6));
        buf.append(1, false);
        buf.append(1, true);
        assert!(buf.check_tombstone(&1));
        assert!(!buf.check_tombstone(&2));
    }

    #[test]
    fn tagged_delete_flips_first_matching_record() {
        let buf = Arc::new(Buffer::<i32>::new(8, 2, 6));
        buf.append(5, false);
        assert!(buf.tagged_delete(&5));
        assert!(!buf.tagged_delete(&5));
    }
}
