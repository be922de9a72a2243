//! Optional CPU pinning for worker processes.
//!
//! Each worker is pinned to a single CPU via `sched_setaffinity`, picked
//! by `worker_id % available_cpus` so workers spread evenly across the
//! online CPU set. The CPU count comes from
//! `std::thread::available_parallelism()` rather than reading the
//! process's actual affinity mask back, which is close enough for an
//! optimization that's a no-op on failure anyway.

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// Pins the calling process to `worker_id % available_cpus`. Silently a
/// no-op's worth of effort on failure — it's an optimization, not a
/// correctness requirement, so a permission or platform failure just
/// leaves the process unpinned.
pub fn pin_to_cpu(worker_id: usize) {
    let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let target = worker_id % cpu_count;

    let mut set = CpuSet::new();
    if set.set(target).is_err() {
        return;
    }
    let _ = sched_setaffinity(Pid::from_raw(0), &set);
}
