//! C3: the buffer view (spec §3 "Buffer view `V`").
//!
//! An immutable, move-only snapshot of a buffer's `[head, tail)` range.
//! Dropping a view invokes the buffer's release callback, which decrements
//! whichever head refcount the view was born under (spec §4.1
//! `get_buffer_view`/`advance_head`).

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::record::{Record, Wrapped};

pub struct BufferView<R: Record> {
    buffer: Arc<Buffer<R>>,
    head: u64,
    tail: u64,
    approx_tombstone_count: usize,
}

impl<R: Record> BufferView<R> {
    pub(crate) fn new(buffer: Arc<Buffer<R>>, head: u64, tail: u64, approx_tombstone_count: usize) -> Self {
        Self {
            buffer,
            head,
            tail,
            approx_tombstone_count,
        }
    }

    pub fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn approx_tombstone_count(&self) -> usize {
        self.approx_tombstone_count
    }

    pub fn may_contain_tombstone(&self, rec: &R) -> bool {
        self.buffer.bloom.read().may_contain(rec)
    }

    pub fn iter(&self) -> impl Iterator<Item = Wrapped<R>> + '_ {
        self.buffer.slice(self.head, self.tail).into_iter()
    }
}

impl<R: Record> Drop for BufferView<R> {
    fn drop(&mut self) {
        self.buffer.release_view(self.head);
    }
}
