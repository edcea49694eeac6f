//! Fork/join worker process pool
//!
//! Spawns one `fork()`ed child per worker, hands each its worker index, and
//! joins all of them before returning. Children never return into the
//! parent's control flow: a forked child is a full copy of the parent's
//! execution state and must diverge immediately, so each child calls its work
//! closure and then `_exit`s.
//!
//! Exit status is deliberately not inspected. A worker that crashes or whose
//! transform panics simply leaves its output slots untouched, with no signal
//! to the caller (see the crate documentation on silent worker failure).

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors that can occur while spawning workers
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to fork worker {worker} of {process_count}: {source}")]
    Fork {
        worker: usize,
        process_count: usize,
        source: io::Error,
    },
}

/// Fork `process_count` workers, run `work(worker_index)` in each, and join
/// them all.
///
/// If a fork fails partway through, every already-spawned child is joined
/// before the error is returned, so no zombies are left behind either way.
///
/// Children must not allocate before exiting: another thread of the parent
/// may hold the allocator lock at fork time. The closure itself is the
/// caller's responsibility; panics inside it are caught so the child still
/// `_exit`s instead of unwinding through the fork point.
pub(crate) fn run_workers<F>(process_count: usize, work: F) -> Result<(), PoolError>
where
    F: Fn(usize),
{
    // Safety: plain fork; the child branch in the spawn loop diverges via
    // _exit and never touches parent-side state.
    run_with_spawn(process_count, work, || unsafe { libc::fork() })
}

/// Spawn loop generic over the fork call, so the failure path can be driven
/// without exhausting the real process table.
fn run_with_spawn<F, S>(process_count: usize, work: F, mut spawn: S) -> Result<(), PoolError>
where
    F: Fn(usize),
    S: FnMut() -> libc::pid_t,
{
    let mut children = Vec::with_capacity(process_count);
    for worker in 0..process_count {
        let pid = spawn();
        if pid == -1 {
            let source = io::Error::last_os_error();
            tracing::debug!(worker, spawned = children.len(), "fork failed, reaping spawned workers");
            join(&children);
            return Err(PoolError::Fork {
                worker,
                process_count,
                source,
            });
        }
        if pid == 0 {
            // Child. The unwind result is ignored: a failed worker leaves
            // its slots unwritten and exits like any other.
            let _ = catch_unwind(AssertUnwindSafe(|| work(worker)));
            unsafe { libc::_exit(0) };
        }
        children.push(pid);
    }

    tracing::debug!(process_count, "workers spawned, joining");
    join(&children);
    Ok(())
}

/// Wait for each child pid in turn, retrying on EINTR.
///
/// Targeted `waitpid` rather than `wait(-1)`: concurrent pools in the same
/// process (e.g. parallel test threads) must not reap each other's children.
fn join(children: &[libc::pid_t]) {
    for &pid in children {
        loop {
            // Exit status is not inspected.
            let rc = unsafe { libc::waitpid(pid, std::ptr::null_mut(), 0) };
            if rc == pid {
                break;
            }
            if rc == -1 && io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::shared::SharedRegion;

    #[test]
    fn test_each_worker_runs_once_with_its_index() {
        let region = SharedRegion::allocate(8 * std::mem::size_of::<AtomicUsize>()).unwrap();
        let slots = region.as_ptr() as *mut AtomicUsize;
        for i in 0..8 {
            unsafe { slots.add(i).write(AtomicUsize::new(0)) };
        }

        run_workers(8, |worker| {
            let slot = unsafe { &*slots.add(worker) };
            slot.fetch_add(worker + 1, Ordering::Relaxed);
        })
        .unwrap();

        for i in 0..8 {
            let slot = unsafe { &*slots.add(i) };
            assert_eq!(slot.load(Ordering::Relaxed), i + 1);
        }
    }

    #[test]
    fn test_join_blocks_until_workers_exit() {
        let region = SharedRegion::allocate(std::mem::size_of::<AtomicUsize>()).unwrap();
        let counter = region.as_ptr() as *mut AtomicUsize;
        unsafe { counter.write(AtomicUsize::new(0)) };

        run_workers(4, |_| {
            let counter = unsafe { &*counter };
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        // All increments are visible because run_workers only returns after
        // every child has been reaped.
        let counter = unsafe { &*counter };
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_zero_workers_is_a_noop() {
        run_workers(0, |_| unreachable!()).unwrap();
    }

    #[test]
    fn test_fork_failure_reaps_spawned_workers() {
        use std::cell::RefCell;

        let region = SharedRegion::allocate(std::mem::size_of::<AtomicUsize>()).unwrap();
        let counter = region.as_ptr() as *mut AtomicUsize;
        unsafe { counter.write(AtomicUsize::new(0)) };

        let spawned = RefCell::new(Vec::new());
        let mut calls = 0;
        let result = run_with_spawn(
            4,
            |_| {
                unsafe { &*counter }.fetch_add(1, Ordering::Relaxed);
            },
            || {
                calls += 1;
                if calls > 2 {
                    // Simulated process-table exhaustion at worker 2.
                    unsafe { *libc::__errno_location() = libc::EAGAIN };
                    return -1;
                }
                let pid = unsafe { libc::fork() };
                if pid > 0 {
                    spawned.borrow_mut().push(pid);
                }
                pid
            },
        );

        match result {
            Err(PoolError::Fork {
                worker,
                process_count,
                source,
            }) => {
                assert_eq!(worker, 2);
                assert_eq!(process_count, 4);
                assert_eq!(source.raw_os_error(), Some(libc::EAGAIN));
            }
            other => panic!("expected fork error, got {other:?}"),
        }

        // The two workers spawned before the failure ran to completion and
        // were reaped before the error surfaced: their increments are visible
        // and neither is waitable any more.
        assert_eq!(unsafe { &*counter }.load(Ordering::Relaxed), 2);
        for &pid in spawned.borrow().iter() {
            let rc = unsafe { libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG) };
            let err = io::Error::last_os_error();
            assert_eq!(rc, -1, "child {pid} was not reaped");
            assert_eq!(err.raw_os_error(), Some(libc::ECHILD));
        }
    }

    #[test]
    fn test_failed_worker_goes_unreported() {
        let region = SharedRegion::allocate(2 * std::mem::size_of::<AtomicUsize>()).unwrap();
        let slots = region.as_ptr() as *mut AtomicUsize;
        unsafe {
            slots.write(AtomicUsize::new(0));
            slots.add(1).write(AtomicUsize::new(0));
        }

        // Worker 1 dies before doing its work. The pool still reports
        // success and worker 1's slot keeps its kernel-zeroed value.
        run_workers(2, |worker| {
            if worker == 1 {
                unsafe { libc::_exit(3) };
            }
            unsafe { &*slots.add(worker) }.store(worker + 1, Ordering::Relaxed);
        })
        .unwrap();

        unsafe {
            assert_eq!((*slots).load(Ordering::Relaxed), 1);
            assert_eq!((*slots.add(1)).load(Ordering::Relaxed), 0);
        }
    }
}
