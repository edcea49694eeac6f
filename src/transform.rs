//! Process-parallel transform entry points
//!
//! [`transform_static`] and [`transform_dynamic`] are the public face of the
//! crate. Both size and map the shared output buffer, fork the requested
//! number of workers, let each construct its results directly into its
//! assigned output slots, join every worker, and hand the buffer back as a
//! [`MappedRange`]. They differ only in how input indices are assigned:
//! fixed contiguous partitions versus chunks claimed at runtime through an
//! atomic cursor in the shared region.
//!
//! The `Out: Copy` bound is the relocation contract: results are constructed
//! inside a worker's address space and consumed by the parent after that
//! worker has exited, so only their raw bytes survive. A `Copy` type cannot
//! own process-local resources (file descriptors, heap allocations with
//! destructors), which is exactly what makes that byte-level handoff sound.

use std::mem::size_of;
use std::sync::atomic::AtomicUsize;
use thiserror::Error;

use crate::mapped::MappedRange;
use crate::partition::{self, WorkCursor};
use crate::pool::{self, PoolError};
use crate::shared::{SharedRegion, ShmError};

/// Errors reported by the transform entry points
///
/// Only the setup phase is checked: argument validation, mapping the shared
/// region, and forking workers. Once workers are computing, nothing is
/// monitored (see the crate documentation on silent worker failure).
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("process_count must be greater than 0")]
    NoWorkers,

    #[error("chunk_size must be greater than 0")]
    ZeroChunkSize,

    #[error("output buffer of {count} results ({elem_bytes} bytes each) overflows usize")]
    OutputTooLarge { count: usize, elem_bytes: usize },

    #[error(transparent)]
    Allocation(#[from] ShmError),

    #[error(transparent)]
    Fork(#[from] PoolError),
}

/// Byte size of `count` results, rejecting sizes the address space cannot
/// express.
fn output_bytes<Out>(count: usize) -> Result<usize, TransformError> {
    count
        .checked_mul(size_of::<Out>())
        .ok_or(TransformError::OutputTooLarge {
            count,
            elem_bytes: size_of::<Out>(),
        })
}

/// Apply `func` to every element of `input` across `process_count` forked
/// workers, with partition boundaries fixed up front.
///
/// Worker `p` receives the `p`-th contiguous partition of the input (sizes
/// differ by at most one element) and writes each result into the output slot
/// matching its input index, so the returned range preserves input order.
///
/// # Errors
///
/// [`TransformError::NoWorkers`] if `process_count` is zero,
/// [`TransformError::OutputTooLarge`] if the output buffer size overflows
/// `usize`, [`TransformError::Allocation`] if the shared mapping fails,
/// [`TransformError::Fork`] if a fork fails (after joining the workers that
/// were already spawned). An empty input yields an empty range without
/// spawning anything.
///
/// # Example
///
/// ```
/// let xs: Vec<u64> = (0..1000).collect();
/// let doubled = forkmap::transform_static(&xs, |x| x * 2, 4).unwrap();
/// assert_eq!(doubled[499], 998);
/// ```
pub fn transform_static<In, Out, F>(
    input: &[In],
    func: F,
    process_count: usize,
) -> Result<MappedRange<Out>, TransformError>
where
    F: Fn(&In) -> Out,
    Out: Copy,
{
    if process_count == 0 {
        return Err(TransformError::NoWorkers);
    }
    let count = input.len();
    if count == 0 {
        return Ok(MappedRange::empty());
    }

    let region = SharedRegion::allocate(output_bytes::<Out>(count)?)?;
    let out = region.as_ptr() as *mut Out;
    let parts = partition::partitions(count, process_count);
    tracing::debug!(count, process_count, "static transform starting");

    pool::run_workers(process_count, |worker| {
        // Safety: partitions are in-bounds and pairwise disjoint; this worker
        // is the only process writing the slots in its partition.
        for i in parts[worker].range() {
            unsafe { out.add(i).write(func(&input[i])) };
        }
    })?;

    let (base, region_bytes) = region.into_raw();
    // Safety: the partitions cover [0, count) exactly, and every worker wrote
    // its slots before exiting; the mapping is now solely ours.
    Ok(unsafe { MappedRange::from_raw_parts(base as *mut Out, count, region_bytes) })
}

/// Apply `func` to every element of `input` across `process_count` forked
/// workers, with chunks of `chunk_size` indices claimed at runtime.
///
/// An atomic cursor in the shared region assigns chunks by fetch-and-add:
/// workers that finish faster claim more chunks, balancing uneven per-element
/// cost without a coordinator. A worker whose claim lands at or past the
/// input length exits. Output order still matches input order, because each
/// result's slot is determined by its input index, not by claim order.
///
/// # Errors
///
/// As [`transform_static`], plus [`TransformError::ZeroChunkSize`] if
/// `chunk_size` is zero (a zero chunk would re-claim the same offset
/// forever).
///
/// # Example
///
/// ```
/// let xs: Vec<u64> = (0..1000).collect();
/// let squared = forkmap::transform_dynamic(&xs, |x| x * x, 4, 64).unwrap();
/// assert_eq!(squared[30], 900);
/// ```
pub fn transform_dynamic<In, Out, F>(
    input: &[In],
    func: F,
    process_count: usize,
    chunk_size: usize,
) -> Result<MappedRange<Out>, TransformError>
where
    F: Fn(&In) -> Out,
    Out: Copy,
{
    if process_count == 0 {
        return Err(TransformError::NoWorkers);
    }
    if chunk_size == 0 {
        return Err(TransformError::ZeroChunkSize);
    }
    let count = input.len();
    if count == 0 {
        return Ok(MappedRange::empty());
    }

    let result_bytes = output_bytes::<Out>(count)?;
    let too_large = || TransformError::OutputTooLarge {
        count,
        elem_bytes: size_of::<Out>(),
    };
    let cursor_offset = partition::cursor_offset(result_bytes).ok_or_else(too_large)?;
    let region_len = cursor_offset
        .checked_add(size_of::<AtomicUsize>())
        .ok_or_else(too_large)?;
    let region = SharedRegion::allocate(region_len)?;
    let out = region.as_ptr() as *mut Out;
    // The cursor lives in the same shared pages as the output so every worker
    // contends on the same word. It must exist before the first fork.
    let cursor = unsafe { WorkCursor::init(region.as_ptr().add(cursor_offset)) };
    tracing::debug!(count, process_count, chunk_size, "dynamic transform starting");

    pool::run_workers(process_count, |_worker| loop {
        let start = cursor.claim(chunk_size);
        if start >= count {
            break;
        }
        let end = (start + chunk_size).min(count);
        // Safety: fetch-and-add hands out pairwise disjoint chunks, so this
        // worker is the only process writing slots in [start, end).
        for i in start..end {
            unsafe { out.add(i).write(func(&input[i])) };
        }
    })?;

    let (base, region_bytes) = region.into_raw();
    // Safety: the claimed chunks cover [0, count) exactly once; region_bytes
    // includes the trailing cursor word, released together with the results.
    Ok(unsafe { MappedRange::from_raw_parts(base as *mut Out, count, region_bytes) })
}
