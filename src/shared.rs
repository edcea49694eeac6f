//! Anonymous shared memory regions
//!
//! This module provides the one primitive every other component builds on: an
//! anonymous, kernel-zeroed memory region mapped with `MAP_SHARED`, so that
//! processes forked *after* the mapping is established all see the same pages
//! at the same address. This is what lets workers construct results in place
//! and lets the parent read them back after the workers have exited.
//!
//! The region is deliberately low-level: it hands out a raw base pointer and
//! either unmaps on drop or transfers the mapping to another owner via
//! [`SharedRegion::into_raw`] (the result handle takes over from there).

use std::io;
use thiserror::Error;

/// Errors that can occur while establishing a shared mapping
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("failed to map {len} bytes of shared memory: {source}")]
    Map { len: usize, source: io::Error },
}

/// An anonymous `MAP_SHARED` memory region owned by this handle
///
/// The pages are zeroed by the kernel and writer-shared: a child forked while
/// the region is alive inherits the same physical pages, not a copy-on-write
/// snapshot, so writes made by the child remain visible to the parent after
/// the child exits.
#[derive(Debug)]
pub struct SharedRegion {
    base: *mut u8,
    len: usize,
}

impl SharedRegion {
    /// Map `len` bytes of anonymous shared memory.
    ///
    /// `len` must be greater than zero. Fails with [`ShmError::Map`] carrying
    /// the OS error if the mapping cannot be established; no retry is made.
    pub fn allocate(len: usize) -> Result<Self, ShmError> {
        // Safety: MAP_ANONYMOUS requires no file descriptor and MAP_SHARED
        // keeps the pages shared across fork(). The kernel zeroes the pages.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ShmError::Map {
                len,
                source: io::Error::last_os_error(),
            });
        }
        tracing::debug!(len, "mapped anonymous shared region");
        Ok(Self {
            base: base as *mut u8,
            len,
        })
    }

    /// Base address of the mapping. Page-aligned.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is zero bytes long (never the case for a
    /// region produced by [`allocate`](Self::allocate)).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release ownership of the mapping without unmapping it.
    ///
    /// The caller becomes responsible for eventually calling [`release`] with
    /// the returned base and length.
    pub fn into_raw(self) -> (*mut u8, usize) {
        let parts = (self.base, self.len);
        std::mem::forget(self);
        parts
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Safety: base/len came from a successful mmap and ownership was not
        // transferred via into_raw.
        unsafe { release(self.base, self.len) };
    }
}

/// Unmap a region previously obtained from [`SharedRegion::into_raw`].
///
/// # Safety
///
/// `base` and `len` must describe a live mapping produced by
/// [`SharedRegion::allocate`], and the mapping must not be used afterwards.
pub unsafe fn release(base: *mut u8, len: usize) {
    unsafe {
        libc::munmap(base as *mut libc::c_void, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_write_read() {
        let region = SharedRegion::allocate(4096).unwrap();
        let ptr = region.as_ptr();
        assert!(!ptr.is_null());
        assert_eq!(region.len(), 4096);

        unsafe {
            *ptr = 42;
            *ptr.add(4095) = 99;
            assert_eq!(*ptr, 42);
            assert_eq!(*ptr.add(4095), 99);
        }
    }

    #[test]
    fn test_zeroed_on_alloc() {
        let region = SharedRegion::allocate(1024).unwrap();
        let ptr = region.as_ptr();
        unsafe {
            for i in 0..1024 {
                assert_eq!(*ptr.add(i), 0);
            }
        }
    }

    #[test]
    fn test_allocation_failure_surfaces_os_error() {
        // An address-space-sized request cannot be satisfied.
        let result = SharedRegion::allocate(usize::MAX - 4096);
        assert!(matches!(result, Err(ShmError::Map { .. })));
    }

    #[test]
    fn test_into_raw_transfers_ownership() {
        let region = SharedRegion::allocate(4096).unwrap();
        let (base, len) = region.into_raw();
        assert_eq!(len, 4096);
        unsafe {
            *base = 7;
            assert_eq!(*base, 7);
            release(base, len);
        }
    }
}
