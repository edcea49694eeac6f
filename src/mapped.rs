//! Owning handle over results in a shared mapping
//!
//! [`MappedRange`] is what a transform call returns: the sole owner of the
//! shared output buffer once every worker has been joined. It reads like a
//! slice (`Deref<Target = [T]>`) but its memory lives in an anonymous shared
//! mapping rather than on any process's heap, so it is freed by `munmap`, not
//! by the allocator.
//!
//! The handle is move-only. Rust's move semantics already guarantee that a
//! moved-from handle can never run its destructor, so exactly one handle ever
//! drops the elements and releases the region.

use std::fmt;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::shared;

/// Owning view over `len` results of type `T` constructed inside a shared
/// mapping of `region_bytes` bytes.
///
/// `region_bytes` may exceed `len * size_of::<T>()`: the dynamic scheduler
/// stores its claim cursor in the same mapping, past the results. Drop always
/// releases the whole region.
pub struct MappedRange<T> {
    base: NonNull<T>,
    len: usize,
    region_bytes: usize,
}

// The handle is the unique owner of the mapping; sending it to another thread
// is sound whenever the element type itself is sendable.
unsafe impl<T: Send> Send for MappedRange<T> {}
unsafe impl<T: Sync> Sync for MappedRange<T> {}

impl<T> MappedRange<T> {
    /// A range over zero elements, backed by no mapping. Dropping it does
    /// nothing.
    pub fn empty() -> Self {
        Self {
            base: NonNull::dangling(),
            len: 0,
            region_bytes: 0,
        }
    }

    /// Assume ownership of `len` elements at `base` inside a shared mapping
    /// of `region_bytes` bytes.
    ///
    /// # Safety
    ///
    /// `base` must be the base address of a live mapping obtained from
    /// [`SharedRegion::into_raw`](crate::shared::SharedRegion::into_raw) with
    /// length `region_bytes`, properly aligned for `T`, with `len` fully
    /// initialized values of `T` at its start. No other owner may release the
    /// mapping.
    pub unsafe fn from_raw_parts(base: *mut T, len: usize, region_bytes: usize) -> Self {
        debug_assert!(len * std::mem::size_of::<T>() <= region_bytes);
        Self {
            base: unsafe { NonNull::new_unchecked(base) },
            len,
            region_bytes,
        }
    }

    /// Number of results in the range.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the range holds no results.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the first result. Dangling (but aligned) for an empty range.
    pub fn as_ptr(&self) -> *const T {
        self.base.as_ptr()
    }

    /// The results as a slice.
    pub fn as_slice(&self) -> &[T] {
        // Safety: construction guarantees len initialized elements at base;
        // a dangling base is only ever paired with len == 0.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }
}

impl<T> Deref for MappedRange<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: fmt::Debug> fmt::Debug for MappedRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<'a, T> IntoIterator for &'a MappedRange<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<T> Drop for MappedRange<T> {
    fn drop(&mut self) {
        if self.region_bytes == 0 {
            return;
        }
        // Safety: we are the unique owner; elements were initialized before
        // the handle was constructed. The whole region is released, including
        // any trailing bytes past the results.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.len));
            shared::release(self.base.as_ptr() as *mut u8, self.region_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedRegion;

    fn mapped_of(values: &[u32]) -> MappedRange<u32> {
        let region = SharedRegion::allocate(values.len() * std::mem::size_of::<u32>()).unwrap();
        let ptr = region.as_ptr() as *mut u32;
        for (i, v) in values.iter().enumerate() {
            unsafe { ptr.add(i).write(*v) };
        }
        let (base, bytes) = region.into_raw();
        unsafe { MappedRange::from_raw_parts(base as *mut u32, values.len(), bytes) }
    }

    #[test]
    fn test_slice_view() {
        let range = mapped_of(&[1, 2, 3, 4, 5]);
        assert_eq!(range.len(), 5);
        assert_eq!(&range[..], &[1, 2, 3, 4, 5]);
        assert_eq!(range[2], 3);
        assert_eq!(range.iter().sum::<u32>(), 15);
    }

    #[test]
    fn test_empty_range_drop_is_noop() {
        let range = MappedRange::<u64>::empty();
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(&range[..], &[] as &[u64]);
        drop(range);
    }

    #[test]
    fn test_move_transfers_ownership() {
        let range = mapped_of(&[10, 20, 30]);
        let moved = range;
        // The moved-to handle still reads the same memory and performs the
        // single release when it goes out of scope.
        assert_eq!(&moved[..], &[10, 20, 30]);
    }

    #[test]
    fn test_move_through_function_boundary() {
        fn pass_through(r: MappedRange<u32>) -> MappedRange<u32> {
            r
        }
        let range = pass_through(mapped_of(&[7, 8, 9]));
        assert_eq!(range.to_vec(), vec![7, 8, 9]);
    }

    #[test]
    fn test_debug_formats_as_list() {
        let range = mapped_of(&[1, 2]);
        assert_eq!(format!("{range:?}"), "[1, 2]");
    }
}
