//! File descriptor limit detection for capping concurrent workers (Unix).

/// Estimated file descriptors held by one worker (log file, two SQLite files and their WAL/SHM,
/// pipes for process workers).
pub const FDS_PER_WORKER: usize = 10;

/// Fraction of the process FD limit to use (leave headroom for the controller).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Returns the soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0 or u64::MAX; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Suggested max number of simultaneous workers so we stay under ~80% of the FD limit.
/// Returns `None` if no limit is available (use caller's default).
pub fn max_workers_by_fd_limit() -> Option<usize> {
    let limit = max_open_fds()?;
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    if usable < FDS_PER_WORKER {
        return Some(1);
    }
    Some(usable / FDS_PER_WORKER)
}

/// Scale `(generators, loaders)` down proportionally when together they would exceed the FD
/// budget. Each side keeps at least one worker.
pub fn cap_worker_counts(generators: usize, loaders: usize) -> (usize, usize) {
    let Some(cap) = max_workers_by_fd_limit() else {
        return (generators, loaders);
    };
    let total = generators + loaders;
    if total <= cap || total == 0 {
        return (generators, loaders);
    }
    let scale = cap as f64 / total as f64;
    let g = ((generators as f64 * scale) as usize).max(1);
    let l = ((loaders as f64 * scale) as usize).max(1);
    log::debug!(
        "Capping workers {}+{} -> {}+{} (FD limit ~80%)",
        generators,
        loaders,
        g,
        l
    );
    (g, l)
}
