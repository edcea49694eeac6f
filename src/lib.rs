//! forkmap: process-based parallel map over anonymous shared memory
//!
//! Applies a pure element transform to a contiguous input slice by forking
//! OS processes (not threads) and collecting results, in input order, into an
//! anonymous `MAP_SHARED` region mapped before the first fork. The caller
//! gets back a [`MappedRange`]: a move-only handle that reads like a slice
//! and unmaps the region when dropped.
//!
//! Two scheduling strategies are provided:
//! - [`transform_static`]: contiguous partitions fixed before any fork.
//! - [`transform_dynamic`]: chunks claimed at runtime through an atomic
//!   cursor living in the shared region, self-balancing under uneven
//!   per-element cost.
//!
//! ```
//! let xs: Vec<u64> = (0..10_000).collect();
//! let ys = forkmap::transform_dynamic(&xs, |x| x + 1, 8, 64).unwrap();
//! assert_eq!(ys[0], 1);
//! assert_eq!(ys[9_999], 10_000);
//! ```
//!
//! # Silent worker failure
//!
//! Only the setup phase (mapping, forking) is checked. A worker that crashes
//! or whose transform panics leaves its output slots at their kernel-zeroed
//! values, and the join does not inspect exit status, so the call still
//! returns a seemingly valid range. This is a known limitation of the design;
//! callers needing per-element failure reporting would have to layer a
//! per-slot status tag or a child-to-parent pipe on top.
//!
//! Unix-only: the implementation relies on `fork()` and anonymous shared
//! mappings.

pub mod mapped;
pub mod partition;
pub mod pool;
pub mod shared;
pub mod transform;

pub use mapped::MappedRange;
pub use partition::{partitions, Partition};
pub use pool::PoolError;
pub use shared::{SharedRegion, ShmError};
pub use transform::{transform_dynamic, transform_static, TransformError};
