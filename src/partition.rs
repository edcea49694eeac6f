//! Work partitioning for worker processes
//!
//! Two strategies divide `count` input indices among workers:
//!
//! - **Static**: [`partitions`] precomputes one contiguous range per worker
//!   in the parent, before any fork. Deterministic, zero coordination.
//! - **Dynamic**: a [`WorkCursor`], an atomic counter living inside the
//!   shared region, lets each worker claim fixed-size chunks with
//!   fetch-and-add until the input is exhausted. Workers that finish their
//!   chunks faster simply claim more, so load balances itself without a
//!   coordinator.
//!
//! Either way, the output slot for input index `i` is slot `i`, so the result
//! order never depends on which worker produced which slot.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A contiguous range of input indices assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// First index in the partition
    pub start: usize,
    /// Number of indices in the partition
    pub len: usize,
}

impl Partition {
    /// One-past-the-last index in the partition.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Returns true if this partition has no indices.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The indices as a range, for iteration.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

/// Divide `[0, count)` into `process_count` contiguous partitions.
///
/// Worker `p` receives `count / process_count` indices, plus one more if
/// `p < count % process_count`. Partitions are laid out in ascending input
/// order with no gaps or overlaps; their union is exactly `[0, count)` and
/// their sizes differ by at most one. With more workers than indices the
/// trailing partitions are empty.
///
/// `process_count` must be greater than zero (validated by the callers in
/// [`crate::transform`]).
pub fn partitions(count: usize, process_count: usize) -> Vec<Partition> {
    debug_assert!(process_count > 0);
    let base = count / process_count;
    let remainder = count % process_count;

    let mut parts = Vec::with_capacity(process_count);
    let mut start = 0;
    for p in 0..process_count {
        let len = base + usize::from(p < remainder);
        parts.push(Partition { start, len });
        start += len;
    }
    parts
}

/// Atomic claim cursor for dynamic scheduling
///
/// Views an `AtomicUsize` placed inside the shared region, so every worker
/// forked after [`WorkCursor::init`] contends on the *same* memory word. An
/// atomic on any process's private heap would not work: each child would see
/// its own copy-on-write copy.
#[derive(Clone, Copy)]
pub(crate) struct WorkCursor {
    cell: *const AtomicUsize,
}

impl WorkCursor {
    /// Construct the cursor at `ptr`, initialized to zero.
    ///
    /// # Safety
    ///
    /// `ptr` must be aligned for `AtomicUsize`, valid for writes of one
    /// `AtomicUsize`, and not yet visible to any other process. Must be
    /// called before the first fork.
    pub(crate) unsafe fn init(ptr: *mut u8) -> Self {
        let cell = ptr as *mut AtomicUsize;
        unsafe { cell.write(AtomicUsize::new(0)) };
        Self { cell }
    }

    /// Claim the next `chunk_size` indices, returning the pre-increment
    /// offset. An offset at or past the input length means no work remains.
    pub(crate) fn claim(&self, chunk_size: usize) -> usize {
        // Relaxed suffices: only the counter itself is contended. Visibility
        // of the results a worker writes is established by its exit and the
        // parent's waitpid, not by this operation.
        unsafe { &*self.cell }.fetch_add(chunk_size, Ordering::Relaxed)
    }
}

/// Byte offset of the work cursor within the shared region: the first
/// `AtomicUsize`-aligned position past `result_bytes` bytes of output.
/// `None` if aligning up overflows.
pub(crate) fn cursor_offset(result_bytes: usize) -> Option<usize> {
    let align = std::mem::align_of::<AtomicUsize>();
    result_bytes.div_ceil(align).checked_mul(align)
}
